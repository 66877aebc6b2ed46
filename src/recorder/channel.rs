//! Capture backend abstraction
//!
//! A backend owns the platform camera and microphone and writes one segment
//! file at a time. `CaptureSession` drives it through this trait.

use crate::capture::traits::{AudioDeviceInfo, CameraFacing, CameraInfo};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Capture-related errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Write failure: {0}")]
    WriteFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Platform camera/microphone input feeding segment files
#[async_trait]
pub trait CaptureBackend: Send {
    /// Backend identifier, used in logs
    fn id(&self) -> &str;

    /// Bind the camera for `facing`, replacing any bound camera
    async fn bind_video(&mut self, facing: CameraFacing) -> CaptureResult<CameraInfo>;

    /// Release the bound camera, if any
    async fn unbind_video(&mut self);

    /// Bind the default microphone
    async fn bind_audio(&mut self) -> CaptureResult<AudioDeviceInfo>;

    /// Whether a camera is currently bound
    fn has_video(&self) -> bool;

    /// Begin writing a new segment to `output`
    async fn start_writing(&mut self, output: &Path) -> CaptureResult<()>;

    /// Finalize the current segment and return the written file
    async fn finish_writing(&mut self) -> CaptureResult<PathBuf>;

    /// Whether a segment is currently being written
    fn is_writing(&self) -> bool;
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory backend writing small placeholder files.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    pub struct FakeControls {
        pub no_camera: Arc<AtomicBool>,
        pub no_microphone: Arc<AtomicBool>,
        pub fail_finish: Arc<AtomicBool>,
        pub bound: Arc<Mutex<Vec<CameraFacing>>>,
        pub written: Arc<Mutex<Vec<PathBuf>>>,
    }

    pub struct FakeBackend {
        controls: FakeControls,
        video: Option<CameraFacing>,
        writing: Option<PathBuf>,
    }

    impl FakeBackend {
        pub fn new() -> (Self, FakeControls) {
            let controls = FakeControls::default();
            (
                Self {
                    controls: controls.clone(),
                    video: None,
                    writing: None,
                },
                controls,
            )
        }
    }

    #[async_trait]
    impl CaptureBackend for FakeBackend {
        fn id(&self) -> &str {
            "fake"
        }

        async fn bind_video(&mut self, facing: CameraFacing) -> CaptureResult<CameraInfo> {
            if self.controls.no_camera.load(Ordering::SeqCst) {
                return Err(CaptureError::DeviceUnavailable("no camera".to_string()));
            }
            self.video = Some(facing);
            self.controls.bound.lock().push(facing);
            Ok(CameraInfo {
                id: format!("{:?}", facing),
                name: "Fake Camera".to_string(),
                facing,
                supported_resolutions: vec![],
            })
        }

        async fn unbind_video(&mut self) {
            self.video = None;
        }

        async fn bind_audio(&mut self) -> CaptureResult<AudioDeviceInfo> {
            if self.controls.no_microphone.load(Ordering::SeqCst) {
                return Err(CaptureError::DeviceUnavailable("no microphone".to_string()));
            }
            Ok(AudioDeviceInfo {
                id: "mic".to_string(),
                name: "Fake Microphone".to_string(),
                is_default: true,
            })
        }

        fn has_video(&self) -> bool {
            self.video.is_some()
        }

        async fn start_writing(&mut self, output: &Path) -> CaptureResult<()> {
            if self.writing.is_some() {
                return Err(CaptureError::AlreadyRecording);
            }
            std::fs::write(output, b"")?;
            self.writing = Some(output.to_path_buf());
            Ok(())
        }

        async fn finish_writing(&mut self) -> CaptureResult<PathBuf> {
            let path = self.writing.take().ok_or(CaptureError::NotRecording)?;
            if self.controls.fail_finish.load(Ordering::SeqCst) {
                let _ = std::fs::remove_file(&path);
                return Err(CaptureError::WriteFailure("encoder failed".to_string()));
            }
            std::fs::write(&path, b"segment")?;
            self.controls.written.lock().push(path.clone());
            Ok(path)
        }

        fn is_writing(&self) -> bool {
            self.writing.is_some()
        }
    }
}
