//! Video export module
//!
//! Crops recorded takes to the selected aspect ratio and merges
//! multi-segment takes, using FFmpeg.

pub mod crop;
pub mod cropper;
pub mod ffmpeg;
pub mod types;

pub use crop::{build_crop_filter, compute_crop_rect, crop_for_probe};
pub use cropper::{AspectCropper, FfmpegCropper};
pub use ffmpeg::{concat_segments, export_cropped, probe_video};
pub use types::{
    AspectRatio, CropOptions, CropRect, CroppedVideo, ExportError, ExportQuality, Orientation,
    PixelCrop, VideoProbe,
};
