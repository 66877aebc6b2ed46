//! Recording state management
//!
//! Defines the capture and take state machines, segment tracking and the
//! per-take teleprompter settings.

use crate::capture::traits::CameraFacing;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current state of the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    /// No take in progress
    #[default]
    Idle,
    /// A segment is being written
    Recording,
    /// The take is open but no segment is being written
    Paused,
}

/// One continuous capture interval written to one temporary file
///
/// A new segment is created each time recording starts or resumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Segment index within the take (0, 1, 2, ...)
    pub index: usize,

    /// File the segment is written to
    pub path: PathBuf,

    /// Camera the segment was recorded from
    pub facing: CameraFacing,

    /// Duration of this segment in milliseconds
    pub duration_ms: f64,

    /// Process time when the segment started (relative to take start)
    pub process_time_start_ms: f64,

    /// Process time when the segment was sealed
    pub process_time_end_ms: f64,

    /// Unix timestamp when the segment started
    pub unix_start_ms: u64,

    /// Unix timestamp when the segment was sealed
    pub unix_end_ms: u64,

    /// Whether the file has been finalized
    pub sealed: bool,
}

impl Segment {
    /// Create a new segment starting now
    pub fn new(index: usize, path: PathBuf, facing: CameraFacing, process_time_ms: f64) -> Self {
        let now = Utc::now().timestamp_millis() as u64;
        Self {
            index,
            path,
            facing,
            duration_ms: 0.0,
            process_time_start_ms: process_time_ms,
            process_time_end_ms: process_time_ms,
            unix_start_ms: now,
            unix_end_ms: now,
            sealed: false,
        }
    }

    /// Seal the segment
    pub fn seal(&mut self, process_time_ms: f64) {
        self.process_time_end_ms = process_time_ms;
        self.duration_ms = self.process_time_end_ms - self.process_time_start_ms;
        self.unix_end_ms = Utc::now().timestamp_millis() as u64;
        self.sealed = true;
    }
}

/// Everything a finished take produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedTake {
    /// Sealed segments, in recording order
    pub segments: Vec<Segment>,

    /// Elapsed take time at one-second resolution
    pub elapsed_secs: u64,

    /// Sum of the segment durations in milliseconds
    pub recorded_ms: f64,
}

impl SealedTake {
    /// Segment files in recording order
    pub fn files(&self) -> Vec<PathBuf> {
        self.segments.iter().map(|s| s.path.clone()).collect()
    }

    /// File of the final segment
    pub fn last_file(&self) -> Option<&Path> {
        self.segments.last().map(|s| s.path.as_path())
    }
}

pub const MAX_COUNTDOWN_SECS: u8 = 10;
pub const MAX_FONT_SIZE: f64 = 100.0;
pub const MAX_SCROLL_SPEED: f64 = 100.0;

/// Teleprompter settings for the current take
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeleprompterSettings {
    /// Countdown before recording starts, 0-10 seconds
    pub countdown_secs: u8,

    /// Script font size, 0-100
    pub font_size: f64,

    /// Scroll speed in points per second, 0-100
    pub scroll_speed: f64,

    /// Whether the script overlay is mirrored
    pub mirrored: bool,
}

impl Default for TeleprompterSettings {
    fn default() -> Self {
        Self {
            countdown_secs: 3,
            font_size: 44.0,
            scroll_speed: 30.0,
            mirrored: false,
        }
    }
}

impl TeleprompterSettings {
    /// Clamp every field into its allowed range
    pub fn normalized(self) -> Self {
        Self {
            countdown_secs: self.countdown_secs.min(MAX_COUNTDOWN_SECS),
            font_size: clamp_or_zero(self.font_size, MAX_FONT_SIZE),
            scroll_speed: clamp_or_zero(self.scroll_speed, MAX_SCROLL_SPEED),
            mirrored: self.mirrored,
        }
    }

    pub fn set_countdown_secs(&mut self, secs: u8) {
        self.countdown_secs = secs.min(MAX_COUNTDOWN_SECS);
    }

    pub fn set_font_size(&mut self, size: f64) {
        self.font_size = clamp_or_zero(size, MAX_FONT_SIZE);
    }

    pub fn set_scroll_speed(&mut self, speed: f64) {
        self.scroll_speed = clamp_or_zero(speed, MAX_SCROLL_SPEED);
    }
}

fn clamp_or_zero(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, max)
    }
}

/// Durable and volatile storage roots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Per-app documents directory that survives restarts
    pub documents_dir: PathBuf,

    /// Volatile directory for capture segments and crop intermediates
    pub temp_dir: PathBuf,
}

impl StorageConfig {
    /// Both roots below a single directory
    pub fn under(root: &Path) -> Self {
        Self {
            documents_dir: root.join("Documents"),
            temp_dir: root.join("tmp"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let temp = std::env::temp_dir();
        Self {
            documents_dir: temp.join("teleprompter-documents"),
            temp_dir: temp.join("teleprompter"),
        }
    }
}
