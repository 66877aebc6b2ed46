//! Error types and handling
//!
//! Common error types used across the pipeline.

use crate::export::ExportError;
use crate::recorder::channel::CaptureError;
use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl AppError {
    /// Stable error code reported to the UI layer
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Capture(err) => match err {
                CaptureError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
                CaptureError::AlreadyRecording | CaptureError::NotRecording => "INVALID_STATE",
                CaptureError::WriteFailure(_) | CaptureError::Io(_) => "WRITE_FAILURE",
            },
            AppError::Export(_) => "EXPORT_FAILURE",
            AppError::Storage(_) => "PERSISTENCE_FAILURE",
            AppError::InvalidState(_) => "INVALID_STATE",
        }
    }
}

/// Error response for the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_codes() {
        let err = AppError::from(CaptureError::DeviceUnavailable("no camera".into()));
        assert_eq!(err.code(), "DEVICE_UNAVAILABLE");

        let err = AppError::from(CaptureError::WriteFailure("disk full".into()));
        assert_eq!(err.code(), "WRITE_FAILURE");
    }

    #[test]
    fn test_error_response_carries_message() {
        let err = AppError::from(ExportError::NoVideoTrack);
        let response = ErrorResponse::from(&err);
        assert_eq!(response.code, "EXPORT_FAILURE");
        assert!(response.message.contains("video track"));
    }
}
