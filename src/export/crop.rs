//! Aspect-ratio crop geometry
//!
//! The crop is computed in display space: the source's orientation is
//! applied first, then the centered rectangle is cut out.

use crate::export::types::{AspectRatio, CropRect, PixelCrop, VideoProbe};

/// Largest centered rectangle of `aspect` inside a `width` x `height` frame
pub fn compute_crop_rect(width: f64, height: f64, aspect: AspectRatio) -> CropRect {
    let target = aspect.ratio();
    let input = width / height;

    if input > target {
        // Wider than target: keep full height
        let new_width = height * target;
        CropRect {
            x: (width - new_width) / 2.0,
            y: 0.0,
            width: new_width,
            height,
        }
    } else {
        let new_height = width / target;
        CropRect {
            x: 0.0,
            y: (height - new_height) / 2.0,
            width,
            height: new_height,
        }
    }
}

/// Crop rectangle for a probed source
pub fn crop_for_probe(probe: &VideoProbe, aspect: AspectRatio) -> CropRect {
    let (width, height) = probe.display_size();
    compute_crop_rect(width as f64, height as f64, aspect)
}

impl CropRect {
    /// Snap to even dimensions, re-centering within `frame_width` x `frame_height`
    pub fn to_even_pixels(&self, frame_width: u32, frame_height: u32) -> PixelCrop {
        let width = even_floor(self.width).clamp(2, frame_width.max(2));
        let height = even_floor(self.height).clamp(2, frame_height.max(2));
        PixelCrop {
            x: frame_width.saturating_sub(width) / 2,
            y: frame_height.saturating_sub(height) / 2,
            width,
            height,
        }
    }
}

fn even_floor(value: f64) -> u32 {
    let v = value.round() as u32;
    v - v % 2
}

/// FFmpeg video filter chain: orientation, crop, output frame rate
///
/// Expects the input to be opened with `-noautorotate` so the orientation is
/// applied exactly once, before the crop.
pub fn build_crop_filter(probe: &VideoProbe, aspect: AspectRatio, fps: u32) -> String {
    let (display_width, display_height) = probe.display_size();
    let crop = crop_for_probe(probe, aspect).to_even_pixels(display_width, display_height);

    let mut filters = Vec::new();
    if let Some(rotate) = probe.orientation.filter() {
        filters.push(rotate.to_string());
    }
    filters.push(format!(
        "crop={}:{}:{}:{}",
        crop.width, crop.height, crop.x, crop.y
    ));
    filters.push("setsar=1".to_string());
    filters.push(format!("fps={}", fps));
    filters.join(",")
}
