//! Export types and configuration
//!
//! This module defines the aspect ratios, crop geometry, probe metadata and
//! error types used by the crop/export step.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Target aspect ratio chosen once per take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "9:16")]
    NineSixteen,
    #[serde(rename = "16:9")]
    SixteenNine,
    #[serde(rename = "4:5")]
    FourFive,
    #[serde(rename = "1:1")]
    OneOne,
    #[serde(rename = "5:4")]
    FiveFour,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::NineSixteen,
        AspectRatio::SixteenNine,
        AspectRatio::FourFive,
        AspectRatio::OneOne,
        AspectRatio::FiveFour,
    ];

    /// Width divided by height
    pub fn ratio(&self) -> f64 {
        match self {
            AspectRatio::NineSixteen => 9.0 / 16.0,
            AspectRatio::SixteenNine => 16.0 / 9.0,
            AspectRatio::FourFive => 4.0 / 5.0,
            AspectRatio::OneOne => 1.0,
            AspectRatio::FiveFour => 5.0 / 4.0,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AspectRatio::NineSixteen => "9:16",
            AspectRatio::SixteenNine => "16:9",
            AspectRatio::FourFive => "4:5",
            AspectRatio::OneOne => "1:1",
            AspectRatio::FiveFour => "5:4",
        }
    }
}

/// Display orientation stored in the source's rotation metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Up,
    /// Rotated 90 degrees clockwise for display
    Right,
    /// Rotated 180 degrees
    Down,
    /// Rotated 90 degrees counter-clockwise for display
    Left,
}

impl Orientation {
    /// From a clockwise display rotation in degrees (any multiple of 90)
    pub fn from_clockwise_degrees(degrees: i64) -> Self {
        match degrees.rem_euclid(360) {
            90 => Orientation::Right,
            180 => Orientation::Down,
            270 => Orientation::Left,
            _ => Orientation::Up,
        }
    }

    /// Whether display width and height are swapped relative to the coded frame
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Orientation::Right | Orientation::Left)
    }

    /// FFmpeg filter applying the rotation to coded frames
    pub fn filter(&self) -> Option<&'static str> {
        match self {
            Orientation::Up => None,
            Orientation::Right => Some("transpose=clock"),
            Orientation::Down => Some("hflip,vflip"),
            Orientation::Left => Some("transpose=cclock"),
        }
    }
}

/// Metadata of a probed video file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoProbe {
    /// Coded width in pixels
    pub width: u32,
    /// Coded height in pixels
    pub height: u32,
    pub orientation: Orientation,
    pub fps: f64,
    pub duration_ms: f64,
    pub codec: String,
    pub has_audio: bool,
}

impl VideoProbe {
    /// Size after applying the orientation
    pub fn display_size(&self) -> (u32, u32) {
        if self.orientation.swaps_dimensions() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// Sub-region of the displayed frame kept by the crop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Crop rectangle snapped to even pixel values for yuv420p output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelCrop {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Export quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportQuality {
    Low,
    Medium,
    High,
    Highest,
}

impl ExportQuality {
    /// Get the CRF value for H.264 encoding
    /// Lower values = higher quality, larger files
    pub fn crf(&self) -> u8 {
        match self {
            ExportQuality::Low => 28,
            ExportQuality::Medium => 23,
            ExportQuality::High => 18,
            // visually lossless; CRF 0 breaks yuv420p players
            ExportQuality::Highest => 12,
        }
    }

    /// Get the FFmpeg preset for H.264 encoding
    pub fn h264_preset(&self) -> &'static str {
        match self {
            ExportQuality::Low => "faster",
            ExportQuality::Medium => "medium",
            ExportQuality::High => "slow",
            ExportQuality::Highest => "slow",
        }
    }
}

/// Options for the crop/concat exports
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropOptions {
    pub quality: ExportQuality,
    /// Output frame rate
    pub fps: u32,
}

impl Default for CropOptions {
    fn default() -> Self {
        Self {
            quality: ExportQuality::Highest,
            fps: 30,
        }
    }
}

/// Result of a successful crop export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CroppedVideo {
    pub path: PathBuf,
    pub crop: CropRect,
    pub aspect: AspectRatio,
}

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Source has no video track")]
    NoVideoTrack,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_titles_match_serde_names() {
        for aspect in AspectRatio::ALL {
            let json = serde_json::to_string(&aspect).unwrap();
            assert_eq!(json, format!("\"{}\"", aspect.title()));
        }
    }

    #[test]
    fn test_orientation_from_degrees() {
        assert_eq!(Orientation::from_clockwise_degrees(90), Orientation::Right);
        assert_eq!(Orientation::from_clockwise_degrees(-90), Orientation::Left);
        assert_eq!(Orientation::from_clockwise_degrees(-180), Orientation::Down);
        assert_eq!(Orientation::from_clockwise_degrees(360), Orientation::Up);
    }

    #[test]
    fn test_display_size_swaps_for_portrait() {
        let probe = VideoProbe {
            width: 1920,
            height: 1080,
            orientation: Orientation::Right,
            fps: 30.0,
            duration_ms: 1000.0,
            codec: "h264".to_string(),
            has_audio: true,
        };
        assert_eq!(probe.display_size(), (1080, 1920));
    }
}
