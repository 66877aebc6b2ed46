//! Native capture backend using nokhwa and cpal
//!
//! Camera frames and microphone samples are piped into two FFmpeg
//! processes; when a segment is finished both streams are muxed into the
//! segment file.

use crate::capture::traits::{AudioDeviceInfo, CameraFacing, CameraInfo, Resolution};
use crate::recorder::channel::{CaptureBackend, CaptureError, CaptureResult};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use parking_lot::Mutex as ParkingMutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

/// List available cameras
///
/// The first camera is treated as the front camera, the second as the back
/// camera.
pub fn list_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .enumerate()
            .map(|(i, info)| {
                let id = match info.index() {
                    CameraIndex::Index(n) => n.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                CameraInfo {
                    id,
                    name: info.human_name().to_string(),
                    facing: if i == 0 {
                        CameraFacing::Front
                    } else {
                        CameraFacing::Back
                    },
                    supported_resolutions: vec![
                        Resolution {
                            width: 1920,
                            height: 1080,
                        },
                        Resolution {
                            width: 1280,
                            height: 720,
                        },
                    ],
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Default microphone, if any
pub fn default_microphone() -> Option<AudioDeviceInfo> {
    let device = cpal::default_host().default_input_device()?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    Some(AudioDeviceInfo {
        id: name.clone(),
        name,
        is_default: true,
    })
}

/// FFmpeg process reading raw media from stdin
struct FfmpegPipe {
    process: ParkingMutex<Option<Child>>,
    written: AtomicU64,
    /// Set once a write to stdin failed
    broken: AtomicBool,
    label: &'static str,
}

impl FfmpegPipe {
    fn spawn(label: &'static str, args: &[String]) -> std::io::Result<Self> {
        let process = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        Ok(Self {
            process: ParkingMutex::new(Some(process)),
            written: AtomicU64::new(0),
            broken: AtomicBool::new(false),
            label,
        })
    }

    /// Feed data to the encoder; the first failure is logged
    fn write(&self, data: &[u8]) -> bool {
        let mut guard = self.process.lock();
        let result = match guard.as_mut().and_then(|p| p.stdin.as_mut()) {
            Some(stdin) => stdin.write_all(data),
            None => Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)),
        };
        match result {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                if !self.broken.swap(true, Ordering::Relaxed) {
                    tracing::error!(
                        "FFmpeg {} encoder stopped accepting data after {} writes: {}",
                        self.label,
                        self.written.load(Ordering::Relaxed),
                        e
                    );
                }
                false
            }
        }
    }

    /// Close stdin and wait for the encoder; `false` if it failed
    fn finish(&self) -> std::io::Result<bool> {
        let Some(mut process) = self.process.lock().take() else {
            return Ok(false);
        };
        drop(process.stdin.take());
        let output = process.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                "FFmpeg {} encoder exited with {}: {}",
                self.label,
                output.status,
                stderr
            );
        }
        tracing::debug!(
            "FFmpeg {} encoder finished after {} writes",
            self.label,
            self.written.load(Ordering::Relaxed)
        );
        Ok(output.status.success())
    }
}

fn video_encoder_args(
    width: u32,
    height: u32,
    fps: u32,
    pixel_format: &str,
    output: &Path,
) -> Vec<String> {
    let input_format = if pixel_format == "mjpeg" { "mjpeg" } else { "rawvideo" };
    let mut args = vec!["-y".to_string(), "-f".to_string(), input_format.to_string()];
    if input_format == "rawvideo" {
        args.extend(["-pixel_format".to_string(), pixel_format.to_string()]);
    }
    args.extend([
        "-video_size".to_string(),
        format!("{}x{}", width, height),
        "-framerate".to_string(),
        fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-crf".to_string(),
        "18".to_string(),
        "-g".to_string(),
        (fps * 2).to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

fn audio_encoder_args(sample_rate: u32, channels: u16, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-f".to_string(),
        "f32le".to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
        "-ac".to_string(),
        channels.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

fn mux_args(video: &Path, audio: Option<&Path>, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        video.to_string_lossy().to_string(),
    ];
    if let Some(audio) = audio {
        args.extend([
            "-i".to_string(),
            audio.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-shortest".to_string(),
        ]);
    }
    args.extend([
        "-c".to_string(),
        "copy".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

fn ffmpeg_pixel_format(format: FrameFormat) -> &'static str {
    match format {
        FrameFormat::YUYV => "yuyv422",
        FrameFormat::NV12 => "nv12",
        FrameFormat::RAWRGB => "rgb24",
        FrameFormat::MJPEG => "mjpeg",
        other => {
            tracing::warn!("Unknown camera format {:?}, falling back to yuyv422", other);
            "yuyv422"
        }
    }
}

struct BoundCamera {
    index: CameraIndex,
    info: CameraInfo,
}

struct BoundMicrophone {
    sample_rate: u32,
    channels: u16,
}

/// Threads and intermediate files of the segment being written
struct ActiveSegment {
    output: PathBuf,
    video_file: PathBuf,
    audio_file: Option<PathBuf>,
    running: Arc<AtomicBool>,
    video_thread: JoinHandle<bool>,
    audio_thread: Option<JoinHandle<bool>>,
}

/// Capture backend for desktop cameras and microphones
pub struct NativeCaptureBackend {
    camera: Option<BoundCamera>,
    microphone: Option<BoundMicrophone>,
    active: Option<ActiveSegment>,
}

impl NativeCaptureBackend {
    pub fn new() -> Self {
        Self {
            camera: None,
            microphone: None,
            active: None,
        }
    }
}

impl Default for NativeCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_video_thread(
    index: CameraIndex,
    output: PathBuf,
    running: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<(), String>>,
) -> JoinHandle<bool> {
    std::thread::spawn(move || {
        let format =
            RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
        let mut camera = match Camera::new(index.clone(), format) {
            Ok(c) => c,
            Err(e) => {
                let _ = ready.send(Err(format!("Failed to open camera {:?}: {:?}", index, e)));
                return false;
            }
        };
        if let Err(e) = camera.open_stream() {
            let _ = ready.send(Err(format!("Failed to open camera stream: {:?}", e)));
            return false;
        }

        let camera_format = camera.camera_format();
        let width = camera_format.resolution().width();
        let height = camera_format.resolution().height();
        let fps = camera_format.frame_rate();
        let pixel_format = ffmpeg_pixel_format(camera_format.format());

        let encoder = match FfmpegPipe::spawn(
            "video",
            &video_encoder_args(width, height, fps, pixel_format, &output),
        ) {
            Ok(e) => e,
            Err(e) => {
                let _ = camera.stop_stream();
                let _ = ready.send(Err(format!("Failed to start FFmpeg: {}", e)));
                return false;
            }
        };

        tracing::info!(
            "Camera opened: {}x{} @ {}fps ({})",
            width,
            height,
            fps,
            pixel_format
        );
        let _ = ready.send(Ok(()));

        while running.load(Ordering::SeqCst) {
            // Blocks until the camera delivers the next frame
            match camera.frame() {
                Ok(frame) => {
                    if !encoder.write(frame.buffer()) {
                        break;
                    }
                }
                Err(e) => tracing::debug!("Failed to capture frame: {:?}", e),
            }
        }

        if let Err(e) = camera.stop_stream() {
            tracing::warn!("Error stopping camera stream: {:?}", e);
        }
        encoder.finish().unwrap_or_else(|e| {
            tracing::error!("Failed to finish video encoding: {}", e);
            false
        })
    })
}

fn spawn_audio_thread(
    sample_rate: u32,
    channels: u16,
    output: PathBuf,
    running: Arc<AtomicBool>,
) -> JoinHandle<bool> {
    std::thread::spawn(move || {
        let args = audio_encoder_args(sample_rate, channels, &output);
        let encoder = match FfmpegPipe::spawn("audio", &args) {
            Ok(e) => Arc::new(e),
            Err(e) => {
                tracing::error!("Failed to start FFmpeg audio encoder: {}", e);
                return false;
            }
        };

        let Some(device) = cpal::default_host().default_input_device() else {
            tracing::error!("Microphone disappeared");
            return false;
        };
        let sample_format = match device.default_input_config() {
            Ok(config) => config.sample_format(),
            Err(e) => {
                tracing::error!("Failed to read microphone config: {}", e);
                return false;
            }
        };
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let on_error = |err: cpal::StreamError| tracing::error!("Microphone stream error: {}", err);
        let stream = match sample_format {
            SampleFormat::F32 => {
                let encoder = encoder.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let bytes: Vec<u8> = data.iter().flat_map(|s| s.to_le_bytes()).collect();
                        encoder.write(&bytes);
                    },
                    on_error,
                    None,
                )
            }
            SampleFormat::I16 => {
                let encoder = encoder.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let bytes: Vec<u8> = data
                            .iter()
                            .flat_map(|&s| (s as f32 / i16::MAX as f32).to_le_bytes())
                            .collect();
                        encoder.write(&bytes);
                    },
                    on_error,
                    None,
                )
            }
            other => {
                tracing::error!("Unsupported microphone sample format {:?}", other);
                let _ = encoder.finish();
                return false;
            }
        };

        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to build microphone stream: {}", e);
                let _ = encoder.finish();
                return false;
            }
        };
        if let Err(e) = stream.play() {
            tracing::error!("Failed to start microphone stream: {}", e);
            let _ = encoder.finish();
            return false;
        }

        while running.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        drop(stream);

        encoder.finish().unwrap_or_else(|e| {
            tracing::error!("Failed to finish audio encoding: {}", e);
            false
        })
    })
}

/// Join the capture threads and mux their output into the segment file
fn finalize_segment(active: ActiveSegment) -> CaptureResult<PathBuf> {
    let video_ok = active.video_thread.join().unwrap_or(false);
    let audio_ok = active
        .audio_thread
        .map(|t| t.join().unwrap_or(false))
        .unwrap_or(false);

    let audio_file = active.audio_file.as_deref().filter(|p| audio_ok && p.exists());
    let result = if video_ok && active.video_file.exists() {
        let status = Command::new("ffmpeg")
            .args(mux_args(&active.video_file, audio_file, &active.output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => Ok(active.output.clone()),
            Ok(s) => Err(CaptureError::WriteFailure(format!("mux exited with {}", s))),
            Err(e) => Err(CaptureError::WriteFailure(format!("failed to run FFmpeg: {}", e))),
        }
    } else {
        Err(CaptureError::WriteFailure("video encoder failed".to_string()))
    };

    let _ = std::fs::remove_file(&active.video_file);
    if let Some(audio) = &active.audio_file {
        let _ = std::fs::remove_file(audio);
    }
    if result.is_err() {
        let _ = std::fs::remove_file(&active.output);
    }
    result
}

#[async_trait]
impl CaptureBackend for NativeCaptureBackend {
    fn id(&self) -> &str {
        "native"
    }

    async fn bind_video(&mut self, facing: CameraFacing) -> CaptureResult<CameraInfo> {
        let cameras = tokio::task::spawn_blocking(list_cameras)
            .await
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let position = match facing {
            CameraFacing::Front => 0,
            CameraFacing::Back => 1,
        };
        let info = cameras.into_iter().nth(position).ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!("No {:?} camera found", facing))
        })?;

        let index = match info.id.parse::<u32>() {
            Ok(i) => CameraIndex::Index(i),
            Err(_) => CameraIndex::String(info.id.clone()),
        };
        self.camera = Some(BoundCamera {
            index,
            info: info.clone(),
        });
        Ok(info)
    }

    async fn unbind_video(&mut self) {
        if let Some(camera) = self.camera.take() {
            tracing::debug!("Released camera '{}'", camera.info.name);
        }
    }

    async fn bind_audio(&mut self) -> CaptureResult<AudioDeviceInfo> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("No microphone found".to_string()))?;
        let config = device.default_input_config().map_err(|e| {
            CaptureError::DeviceUnavailable(format!("Failed to get microphone config: {}", e))
        })?;

        self.microphone = Some(BoundMicrophone {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        });

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Ok(AudioDeviceInfo {
            id: name.clone(),
            name,
            is_default: true,
        })
    }

    fn has_video(&self) -> bool {
        self.camera.is_some()
    }

    async fn start_writing(&mut self, output: &Path) -> CaptureResult<()> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }
        let camera = self
            .camera
            .as_ref()
            .ok_or_else(|| CaptureError::DeviceUnavailable("No camera bound".to_string()))?;

        let video_file = output.with_extension("video.mp4");
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel();
        let video_thread = spawn_video_thread(
            camera.index.clone(),
            video_file.clone(),
            running.clone(),
            ready_tx,
        );

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        match ready {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                let _ = video_thread.join();
                return Err(CaptureError::DeviceUnavailable(message));
            }
            Err(_) => {
                let _ = video_thread.join();
                return Err(CaptureError::DeviceUnavailable(
                    "Camera thread exited".to_string(),
                ));
            }
        }

        let (audio_file, audio_thread) = match &self.microphone {
            Some(mic) => {
                let audio_file = output.with_extension("audio.m4a");
                let thread = spawn_audio_thread(
                    mic.sample_rate,
                    mic.channels,
                    audio_file.clone(),
                    running.clone(),
                );
                (Some(audio_file), Some(thread))
            }
            None => (None, None),
        };

        self.active = Some(ActiveSegment {
            output: output.to_path_buf(),
            video_file,
            audio_file,
            running,
            video_thread,
            audio_thread,
        });
        tracing::info!("Native capture writing {:?}", output);
        Ok(())
    }

    async fn finish_writing(&mut self) -> CaptureResult<PathBuf> {
        let active = self.active.take().ok_or(CaptureError::NotRecording)?;
        active.running.store(false, Ordering::SeqCst);

        tokio::task::spawn_blocking(move || finalize_segment(active))
            .await
            .map_err(|e| CaptureError::WriteFailure(e.to_string()))?
    }

    fn is_writing(&self) -> bool {
        self.active.is_some()
    }
}
