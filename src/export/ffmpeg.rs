//! FFmpeg/FFprobe wrappers for the crop step
//!
//! Probing, aspect crop export and segment concatenation, all run as
//! child processes.

use crate::export::crop::{build_crop_filter, crop_for_probe};
use crate::export::types::{
    AspectRatio, CropOptions, CroppedVideo, ExportError, Orientation, VideoProbe,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Probe a video file with ffprobe
pub async fn probe_video(path: &Path) -> Result<VideoProbe, ExportError> {
    if !path.exists() {
        return Err(ExportError::InvalidInput(format!(
            "Video file not found: {:?}",
            path
        )));
    }

    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-show_format"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| ExportError::Ffmpeg(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExportError::Ffmpeg(format!("ffprobe failed: {}", stderr)));
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse ffprobe's JSON output
pub(crate) fn parse_probe_output(json_str: &str) -> Result<VideoProbe, ExportError> {
    let json: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| ExportError::Ffmpeg(format!("Failed to parse ffprobe output: {}", e)))?;

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let stream_type = |s: &serde_json::Value, kind: &str| {
        s.get("codec_type").and_then(|t| t.as_str()) == Some(kind)
    };

    let video_stream = streams
        .iter()
        .find(|s| stream_type(s, "video"))
        .ok_or(ExportError::NoVideoTrack)?;
    let has_audio = streams.iter().any(|s| stream_type(s, "audio"));

    let width = video_stream
        .get("width")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    let height = video_stream
        .get("height")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    if width == 0 || height == 0 {
        return Err(ExportError::InvalidInput(format!(
            "Video stream has invalid size {}x{}",
            width, height
        )));
    }

    let codec = video_stream
        .get("codec_name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let fps = video_stream
        .get("r_frame_rate")
        .and_then(|v| v.as_str())
        .map(parse_frame_rate)
        .unwrap_or(0.0);

    let duration_secs = json
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoProbe {
        width,
        height,
        orientation: Orientation::from_clockwise_degrees(stream_rotation(video_stream)),
        fps,
        duration_ms: duration_secs * 1000.0,
        codec,
        has_audio,
    })
}

/// Clockwise display rotation of a stream
///
/// Newer ffprobe reports a display matrix rotation (counter-clockwise,
/// e.g. -90 for portrait phone video); older builds report a `rotate` tag
/// (clockwise, e.g. "90").
fn stream_rotation(stream: &serde_json::Value) -> i64 {
    let side_data = stream
        .get("side_data_list")
        .and_then(|l| l.as_array())
        .and_then(|list| {
            list.iter()
                .find_map(|d| d.get("rotation").and_then(|r| r.as_f64()))
        });

    if let Some(rotation) = side_data {
        return -(rotation.round() as i64);
    }

    stream
        .get("tags")
        .and_then(|t| t.get("rotate"))
        .and_then(|r| r.as_str())
        .and_then(|r| r.parse::<i64>().ok())
        .unwrap_or(0)
}

/// Parse frame rate ("30/1", "30000/1001" or "29.97")
fn parse_frame_rate(s: &str) -> f64 {
    if s.contains('/') {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() == 2 {
            let num: f64 = parts[0].parse().unwrap_or(0.0);
            let den: f64 = parts[1].parse().unwrap_or(1.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        } else {
            0.0
        }
    } else {
        s.parse().unwrap_or(0.0)
    }
}

fn h264_args(options: &CropOptions) -> Vec<String> {
    vec![
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        options.quality.h264_preset().to_string(),
        "-crf".to_string(),
        options.quality.crf().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
    ]
}

/// FFmpeg arguments cropping `input` to `aspect`
pub(crate) fn crop_args(
    input: &Path,
    output: &Path,
    probe: &VideoProbe,
    aspect: AspectRatio,
    options: &CropOptions,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-noautorotate".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-vf".to_string(),
        build_crop_filter(probe, aspect, options.fps),
        "-map".to_string(),
        "0:v:0".to_string(),
    ];

    if probe.has_audio {
        args.extend(["-map".to_string(), "0:a:0".to_string()]);
    }

    args.extend(h264_args(options));

    if probe.has_audio {
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
        ]);
    }

    // Rotation is baked into the pixels
    args.extend([
        "-metadata:s:v:0".to_string(),
        "rotate=0".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Crop `input` to `aspect` around its center and write `output`
pub async fn export_cropped(
    input: &Path,
    output: &Path,
    aspect: AspectRatio,
    options: &CropOptions,
) -> Result<CroppedVideo, ExportError> {
    let probe = probe_video(input).await?;
    let crop = crop_for_probe(&probe, aspect);

    tracing::info!(
        "Cropping {:?} ({}x{}, {:?}) to {} -> {:.0}x{:.0} at ({:.0}, {:.0})",
        input,
        probe.width,
        probe.height,
        probe.orientation,
        aspect.title(),
        crop.width,
        crop.height,
        crop.x,
        crop.y
    );

    run_ffmpeg(&crop_args(input, output, &probe, aspect, options), output).await?;

    Ok(CroppedVideo {
        path: output.to_path_buf(),
        crop,
        aspect,
    })
}

/// Build filter_complex concatenating segments at a common size
///
/// Every segment is rotated upright, then scaled and padded to
/// `width` x `height` so camera switches with different resolutions can be
/// joined.
pub(crate) fn build_concat_filter(
    probes: &[VideoProbe],
    width: u32,
    height: u32,
    with_audio: bool,
) -> String {
    let mut filters = Vec::new();
    let mut concat_inputs = Vec::new();

    for (i, probe) in probes.iter().enumerate() {
        let rotate = probe
            .orientation
            .filter()
            .map(|f| format!("{},", f))
            .unwrap_or_default();
        filters.push(format!(
            "[{i}:v]{rotate}scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black,setsar=1[v{i}]",
            i = i,
            rotate = rotate,
            w = width,
            h = height
        ));
        concat_inputs.push(format!("[v{}]", i));
        if with_audio {
            concat_inputs.push(format!("[{}:a]", i));
        }
    }

    let outputs = if with_audio { "[vout][aout]" } else { "[vout]" };
    filters.push(format!(
        "{}concat=n={}:v=1:a={}{}",
        concat_inputs.join(""),
        probes.len(),
        if with_audio { 1 } else { 0 },
        outputs
    ));

    filters.join(";")
}

/// FFmpeg arguments concatenating `inputs` into `output`
pub(crate) fn concat_args(
    inputs: &[PathBuf],
    probes: &[VideoProbe],
    output: &Path,
    options: &CropOptions,
) -> Vec<String> {
    let (width, height) = probes
        .first()
        .map(|p| p.display_size())
        .unwrap_or((0, 0));
    let with_audio = probes.iter().all(|p| p.has_audio);

    let mut args = vec!["-y".to_string()];
    for input in inputs {
        args.extend([
            "-noautorotate".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ]);
    }

    args.extend([
        "-filter_complex".to_string(),
        build_concat_filter(probes, width, height, with_audio),
        "-map".to_string(),
        "[vout]".to_string(),
    ]);
    if with_audio {
        args.extend(["-map".to_string(), "[aout]".to_string()]);
    }

    args.extend(h264_args(options));

    if with_audio {
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
        ]);
    }

    args.extend([
        "-metadata:s:v:0".to_string(),
        "rotate=0".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Join segments in order into a single file
pub async fn concat_segments(
    inputs: &[PathBuf],
    output: &Path,
    options: &CropOptions,
) -> Result<(), ExportError> {
    if inputs.is_empty() {
        return Err(ExportError::InvalidInput("No segments to merge".to_string()));
    }

    let mut probes = Vec::with_capacity(inputs.len());
    for input in inputs {
        probes.push(probe_video(input).await?);
    }

    tracing::info!("Merging {} segments into {:?}", inputs.len(), output);
    run_ffmpeg(&concat_args(inputs, &probes, output, options), output).await
}

async fn run_ffmpeg(args: &[String], output: &Path) -> Result<(), ExportError> {
    tracing::debug!("Running FFmpeg: {:?}", args);

    let result = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ExportError::Ffmpeg(format!("Failed to start FFmpeg: {}", e)))?;

    if !result.status.success() {
        let _ = tokio::fs::remove_file(output).await;
        let stderr = String::from_utf8_lossy(&result.stderr);
        let tail: String = stderr
            .lines()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");
        return Err(ExportError::Ffmpeg(format!(
            "FFmpeg exited with {}: {}",
            result.status, tail
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORTRAIT_PHONE: &str = r#"{
        "streams": [
            {
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1920,
                "height": 1080,
                "r_frame_rate": "30000/1001",
                "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]
            },
            {"codec_type": "audio", "codec_name": "aac"}
        ],
        "format": {"duration": "5.005000"}
    }"#;

    fn landscape(has_audio: bool) -> VideoProbe {
        VideoProbe {
            width: 1920,
            height: 1080,
            orientation: Orientation::Up,
            fps: 30.0,
            duration_ms: 1000.0,
            codec: "h264".to_string(),
            has_audio,
        }
    }

    #[test]
    fn test_parse_probe_with_display_matrix() {
        let probe = parse_probe_output(PORTRAIT_PHONE).unwrap();
        assert_eq!(probe.width, 1920);
        assert_eq!(probe.orientation, Orientation::Right);
        assert_eq!(probe.display_size(), (1080, 1920));
        assert!(probe.has_audio);
        assert!((probe.fps - 29.97).abs() < 0.01);
        assert!((probe.duration_ms - 5005.0).abs() < 0.5);
    }

    #[test]
    fn test_parse_probe_with_rotate_tag() {
        let json = r#"{"streams":[{"codec_type":"video","width":640,"height":480,
            "r_frame_rate":"30/1","tags":{"rotate":"270"}}],"format":{}}"#;
        let probe = parse_probe_output(json).unwrap();
        assert_eq!(probe.orientation, Orientation::Left);
        assert!(!probe.has_audio);
    }

    #[test]
    fn test_parse_probe_without_video_track() {
        let json = r#"{"streams":[{"codec_type":"audio"}],"format":{"duration":"1.0"}}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(ExportError::NoVideoTrack)
        ));
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), 30.0);
        assert_eq!(parse_frame_rate("25"), 25.0);
        assert_eq!(parse_frame_rate("0/0"), 0.0);
    }

    #[test]
    fn test_crop_args_disable_autorotate_and_map_audio() {
        let args = crop_args(
            Path::new("/tmp/in.mov"),
            Path::new("/tmp/out.mp4"),
            &landscape(true),
            AspectRatio::OneOne,
            &CropOptions::default(),
        );
        assert_eq!(args[1], "-noautorotate");
        assert!(args.contains(&"crop=1080:1080:420:0,setsar=1,fps=30".to_string()));
        assert!(args.contains(&"0:a:0".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[test]
    fn test_concat_filter_with_audio() {
        let probes = vec![landscape(true), landscape(true)];
        let filter = build_concat_filter(&probes, 1920, 1080, true);
        assert!(filter.contains("[v0][0:a][v1][1:a]concat=n=2:v=1:a=1[vout][aout]"));
    }

    #[test]
    fn test_concat_drops_audio_when_a_segment_is_silent() {
        let inputs = vec![PathBuf::from("a.mov"), PathBuf::from("b.mov")];
        let probes = vec![landscape(true), landscape(false)];
        let args = concat_args(&inputs, &probes, Path::new("out.mp4"), &CropOptions::default());
        assert!(!args.contains(&"[aout]".to_string()));
        assert!(args.iter().any(|a| a.contains("concat=n=2:v=1:a=0[vout]")));
    }
}
