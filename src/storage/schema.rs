//! Persisted recording schema
//!
//! A `Recording` is one saved take: its script text, the durable video file
//! it refers to and a display timestamp. Field names on disk are the column
//! names of the recording table.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Display format of `created_at`, e.g. "3/07/2025 14:05"
pub const CREATED_LABEL_FORMAT: &str = "%-m/%d/%Y %H:%M";

const CREATED_LABEL_PARSE_FORMAT: &str = "%m/%d/%Y %H:%M";

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Recording not found: {0}")]
    NotFound(Uuid),

    #[error("Video reference is outside durable storage: {0}")]
    NotDurable(String),

    #[error("Missing required file: {0}")]
    MissingFile(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A saved take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: Uuid,
    pub script_text: String,
    /// Absolute `file://` URI of the durable video file
    #[serde(rename = "videoURL")]
    pub video_url: String,
    /// Creation label in `CREATED_LABEL_FORMAT`
    pub created_at: String,
}

impl Recording {
    /// New record labelled with the current local time
    pub fn new(script_text: impl Into<String>, video_path: &Path) -> Self {
        Self {
            id: Uuid::new_v4(),
            script_text: script_text.into(),
            video_url: path_to_file_uri(video_path),
            created_at: format_created_label(&Local::now()),
        }
    }

    /// Local path of the video file, if the reference is a file URI
    pub fn video_path(&self) -> Option<PathBuf> {
        file_uri_to_path(&self.video_url)
    }

    /// Parsed creation label
    pub fn created(&self) -> Option<NaiveDateTime> {
        parse_created_label(&self.created_at)
    }
}

/// Fields to change on an existing record; `None` leaves a field as is
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingUpdate {
    pub script_text: Option<String>,
    pub video_path: Option<PathBuf>,
    pub created_at: Option<String>,
}

impl RecordingUpdate {
    pub fn script(text: impl Into<String>) -> Self {
        Self {
            script_text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.script_text.is_none() && self.video_path.is_none() && self.created_at.is_none()
    }
}

pub fn format_created_label<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format(CREATED_LABEL_FORMAT).to_string()
}

pub fn parse_created_label(label: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(label.trim(), CREATED_LABEL_PARSE_FORMAT).ok()
}

/// Absolute `file://` URI with percent-encoded path segments
///
/// Relative paths are resolved against the working directory first.
pub fn path_to_file_uri(path: &Path) -> String {
    let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let segments: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(urlencoding::encode(&s.to_string_lossy()).into_owned()),
            _ => None,
        })
        .collect();
    format!("file:///{}", segments.join("/"))
}

/// Inverse of `path_to_file_uri`; `None` for other schemes
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file://")?;
    // Optional host part, only "localhost" is meaningful
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);
    if !rest.starts_with('/') {
        return None;
    }

    let mut path = PathBuf::from("/");
    for segment in rest.split('/').filter(|s| !s.is_empty()) {
        path.push(urlencoding::decode(segment).ok()?.as_ref());
    }
    Some(path)
}
