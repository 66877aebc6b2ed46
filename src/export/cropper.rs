//! Aspect cropper abstraction
//!
//! The recording pipeline crops finished takes through this trait so the
//! FFmpeg implementation can be swapped out in tests.

use crate::export::ffmpeg::{concat_segments, export_cropped};
use crate::export::types::{AspectRatio, CropOptions, CroppedVideo, ExportError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Produces aspect-cropped files from recorded takes
#[async_trait]
pub trait AspectCropper: Send + Sync {
    /// Crop `source` to `aspect` around its center into a new temporary file
    ///
    /// The source is left in place.
    async fn crop(&self, source: &Path, aspect: AspectRatio) -> Result<CroppedVideo, ExportError>;

    /// Join segments in order into a single temporary file
    async fn merge_segments(&self, segments: &[PathBuf]) -> Result<PathBuf, ExportError>;
}

/// FFmpeg-backed cropper writing below a temporary directory
#[derive(Debug, Clone)]
pub struct FfmpegCropper {
    temp_dir: PathBuf,
    options: CropOptions,
}

impl FfmpegCropper {
    pub fn new(temp_dir: impl Into<PathBuf>, options: CropOptions) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            options,
        }
    }

    pub fn options(&self) -> &CropOptions {
        &self.options
    }

    async fn output_path(&self, prefix: &str) -> Result<PathBuf, ExportError> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        Ok(self
            .temp_dir
            .join(format!("{}-{}.mp4", prefix, Uuid::new_v4())))
    }
}

#[async_trait]
impl AspectCropper for FfmpegCropper {
    async fn crop(&self, source: &Path, aspect: AspectRatio) -> Result<CroppedVideo, ExportError> {
        let output = self.output_path("cropped").await?;
        export_cropped(source, &output, aspect, &self.options).await
    }

    async fn merge_segments(&self, segments: &[PathBuf]) -> Result<PathBuf, ExportError> {
        let output = self.output_path("merged").await?;
        concat_segments(segments, &output, &self.options).await?;
        Ok(output)
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeCropper;
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_crop_leaves_source_in_place() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("take.mov");
        std::fs::write(&source, b"take").unwrap();

        let (cropper, controls) = FakeCropper::new(dir.path().join("out"));
        let cropped = cropper.crop(&source, AspectRatio::OneOne).await.unwrap();

        assert!(source.exists());
        assert_ne!(cropped.path, source);
        assert_eq!(cropped.aspect, AspectRatio::OneOne);
        assert_eq!(controls.cropped.lock().as_slice(), &[source]);
    }

    #[tokio::test]
    async fn test_ffmpeg_cropper_rejects_missing_source() {
        let dir = tempdir().unwrap();
        let cropper = FfmpegCropper::new(dir.path(), CropOptions::default());

        let result = cropper
            .crop(&dir.path().join("missing.mov"), AspectRatio::NineSixteen)
            .await;
        assert!(matches!(result, Err(ExportError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_ffmpeg_cropper_rejects_empty_merge() {
        let dir = tempdir().unwrap();
        let cropper = FfmpegCropper::new(dir.path(), CropOptions::default());
        assert!(matches!(
            cropper.merge_segments(&[]).await,
            Err(ExportError::InvalidInput(_))
        ));
    }
}
