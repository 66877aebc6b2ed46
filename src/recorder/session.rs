//! Capture session
//!
//! Owns the capture backend and the segment-based recording lifecycle:
//! start, pause, resume, stop-all, camera switching and app lifecycle
//! interruptions.

use super::channel::{CaptureBackend, CaptureError, CaptureResult};
use super::state::{CaptureState, SealedTake, Segment};
use crate::capture::traits::CameraFacing;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Extension used for raw capture segments
pub const SEGMENT_EXTENSION: &str = "mov";

/// Events emitted by the capture session
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// A new segment started writing
    SegmentStarted { index: usize, facing: CameraFacing },
    /// A segment file was finalized
    SegmentSealed { index: usize, path: PathBuf },
    /// Recording paused by the user or a camera switch
    Paused,
    /// The current segment was sealed because the app lost focus
    Interrupted,
    /// Recording resumed after an interruption
    Resumed,
    /// Camera input was rebound
    CameraSwitched(CameraFacing),
    /// A device could not be bound
    DeviceUnavailable(String),
    /// Take finished
    Stopped { segment_count: usize },
}

/// Manages the camera/microphone input and the segment list of one take
pub struct CaptureSession {
    /// Platform input
    backend: Box<dyn CaptureBackend>,

    /// Current capture state
    state: Arc<RwLock<CaptureState>>,

    /// Selected camera facing
    facing: CameraFacing,

    /// Whether a microphone is bound
    audio_bound: bool,

    /// Segments of the current take, append-only
    segments: Vec<Segment>,

    /// Directory for temporary segment files
    temp_dir: PathBuf,

    /// Time when the take started (for process time calculation)
    start_time: Option<Instant>,

    /// One-second-resolution elapsed counter
    elapsed_secs: Arc<AtomicU64>,

    /// Task driving the elapsed counter
    counter: Option<JoinHandle<()>>,

    /// Set when a segment was sealed by an app lifecycle interruption
    interrupted: bool,

    /// Set when any segment of the take failed to finalize
    write_failed: bool,

    /// Event broadcaster
    event_tx: broadcast::Sender<CaptureEvent>,
}

impl CaptureSession {
    /// Create a new capture session writing segments below `temp_dir`
    pub fn new(backend: Box<dyn CaptureBackend>, temp_dir: impl Into<PathBuf>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            backend,
            state: Arc::new(RwLock::new(CaptureState::Idle)),
            facing: CameraFacing::default(),
            audio_bound: false,
            segments: Vec::new(),
            temp_dir: temp_dir.into(),
            start_time: None,
            elapsed_secs: Arc::new(AtomicU64::new(0)),
            counter: None,
            interrupted: false,
            write_failed: false,
            event_tx,
        }
    }

    /// Get the current capture state
    pub fn state(&self) -> CaptureState {
        *self.state.read()
    }

    /// Whether a segment is being written right now
    pub fn is_recording(&self) -> bool {
        self.backend.is_writing()
    }

    /// Whether the take is open but not writing
    pub fn is_paused(&self) -> bool {
        self.state() == CaptureState::Paused
    }

    /// Selected camera facing
    pub fn facing(&self) -> CameraFacing {
        self.facing
    }

    /// Whether a camera is bound
    pub fn has_video(&self) -> bool {
        self.backend.has_video()
    }

    /// Whether a microphone is bound
    pub fn has_audio(&self) -> bool {
        self.audio_bound
    }

    /// Segments recorded so far in this take
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Elapsed take time in whole seconds
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs.load(Ordering::SeqCst)
    }

    /// Subscribe to capture events
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.event_tx.subscribe()
    }

    /// Get the current process time in milliseconds
    fn process_time_ms(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    /// Time actually spent writing segments, in milliseconds
    pub fn recorded_ms(&self) -> f64 {
        let now = self.process_time_ms();
        self.segments
            .iter()
            .map(|s| {
                if s.sealed {
                    s.duration_ms
                } else {
                    now - s.process_time_start_ms
                }
            })
            .sum()
    }

    /// Bind the camera for `facing` and the microphone
    ///
    /// A missing device leaves the session usable without that input; the
    /// error is returned so the caller can surface it.
    pub async fn configure(&mut self, facing: CameraFacing) -> CaptureResult<()> {
        if self.backend.has_video() {
            self.backend.unbind_video().await;
        }
        self.facing = facing;

        let video = match self.backend.bind_video(facing).await {
            Ok(info) => {
                tracing::info!("Bound camera '{}' ({:?})", info.name, facing);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("No camera available for {:?}: {}", facing, e);
                let _ = self.event_tx.send(CaptureEvent::DeviceUnavailable(e.to_string()));
                Err(e)
            }
        };

        if !self.audio_bound {
            match self.backend.bind_audio().await {
                Ok(info) => {
                    tracing::info!("Bound microphone '{}'", info.name);
                    self.audio_bound = true;
                }
                Err(e) => {
                    tracing::warn!("No microphone available: {}", e);
                    let _ = self.event_tx.send(CaptureEvent::DeviceUnavailable(e.to_string()));
                }
            }
        }

        video
    }

    /// Open a new segment file and start writing
    ///
    /// Returns `false` without doing anything if a segment is already open.
    pub async fn start_segment(&mut self) -> CaptureResult<bool> {
        if self.backend.is_writing() {
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let path = self
            .temp_dir
            .join(format!("{}.{}", Uuid::new_v4(), SEGMENT_EXTENSION));

        self.backend.start_writing(&path).await?;

        let first = self.state() == CaptureState::Idle;
        if first {
            self.start_time = Some(Instant::now());
            self.write_failed = false;
            self.start_counter();
        }

        // A segment opened by any path ends the interruption
        self.interrupted = false;

        let index = self.segments.len();
        let segment = Segment::new(index, path.clone(), self.facing, self.process_time_ms());
        self.segments.push(segment);

        *self.state.write() = CaptureState::Recording;
        let _ = self.event_tx.send(CaptureEvent::SegmentStarted {
            index,
            facing: self.facing,
        });

        tracing::info!("Segment {} started: {:?}", index, path);
        Ok(true)
    }

    /// Seal the current segment, keeping the take open
    ///
    /// Returns `false` without doing anything if no segment is open.
    pub async fn pause(&mut self) -> CaptureResult<bool> {
        self.interrupted = false;
        if !self.backend.is_writing() {
            return Ok(false);
        }

        tracing::info!("Pausing recording");
        let sealed = self.seal_current().await;
        *self.state.write() = CaptureState::Paused;
        let _ = self.event_tx.send(CaptureEvent::Paused);

        sealed.map(|_| true)
    }

    /// Seal the current segment and finish the take
    ///
    /// Returns `Ok(None)` with no state change when no take is open. A take
    /// in which any segment failed to finalize yields `WriteFailure` and its
    /// segment files are removed.
    pub async fn stop_all(&mut self) -> CaptureResult<Option<SealedTake>> {
        if self.state() == CaptureState::Idle {
            return Ok(None);
        }

        tracing::info!("Stopping recording");

        if self.backend.is_writing() {
            // Failure is recorded in write_failed
            let _ = self.seal_current().await;
        }

        self.stop_counter();
        let elapsed_secs = self.elapsed_secs();
        let recorded_ms = self.recorded_ms();
        let segments = std::mem::take(&mut self.segments);
        let write_failed = self.write_failed;

        self.start_time = None;
        self.interrupted = false;
        self.write_failed = false;
        *self.state.write() = CaptureState::Idle;
        let _ = self.event_tx.send(CaptureEvent::Stopped {
            segment_count: segments.len(),
        });

        if write_failed || segments.is_empty() {
            remove_segment_files(&segments);
            tracing::error!("Take aborted: segment files could not be finalized");
            return Err(CaptureError::WriteFailure(
                "segment could not be finalized".to_string(),
            ));
        }

        tracing::info!(
            "Recording stopped. {} segment(s), {}ms recorded",
            segments.len(),
            recorded_ms
        );

        Ok(Some(SealedTake {
            segments,
            elapsed_secs,
            recorded_ms,
        }))
    }

    /// Switch between front and back camera
    ///
    /// An open segment is sealed first; the session is left ready for a new
    /// segment under the new facing.
    pub async fn toggle_camera(&mut self) -> CaptureResult<CameraFacing> {
        if self.backend.is_writing() {
            self.pause().await?;
        }

        let facing = self.facing.toggled();
        self.configure(facing).await?;
        let _ = self.event_tx.send(CaptureEvent::CameraSwitched(facing));
        Ok(facing)
    }

    /// The app lost foreground focus
    ///
    /// An open segment is sealed like an automatic pause.
    pub async fn app_will_resign_active(&mut self) -> CaptureResult<()> {
        if !self.backend.is_writing() {
            return Ok(());
        }

        tracing::info!("App resigning active, sealing current segment");
        self.interrupted = true;
        let sealed = self.seal_current().await;
        *self.state.write() = CaptureState::Paused;
        let _ = self.event_tx.send(CaptureEvent::Interrupted);
        sealed.map(|_| ())
    }

    /// The app regained foreground focus
    ///
    /// Opens a new segment only if the previous one was sealed by an
    /// interruption.
    pub async fn app_did_become_active(&mut self) -> CaptureResult<bool> {
        if !self.interrupted {
            return Ok(false);
        }

        self.interrupted = false;
        let started = self.start_segment().await?;
        if started {
            tracing::info!("App active again, resumed with a new segment");
            let _ = self.event_tx.send(CaptureEvent::Resumed);
        }
        Ok(started)
    }

    /// Abandon the current take and delete its segment files
    pub async fn discard(&mut self) {
        if self.backend.is_writing() {
            if let Err(e) = self.backend.finish_writing().await {
                tracing::warn!("Failed to finalize discarded segment: {}", e);
            }
        }

        self.stop_counter();
        remove_segment_files(&self.segments);
        self.segments.clear();
        self.start_time = None;
        self.interrupted = false;
        self.write_failed = false;
        *self.state.write() = CaptureState::Idle;
        tracing::info!("Take discarded");
    }

    async fn seal_current(&mut self) -> CaptureResult<PathBuf> {
        let result = self.backend.finish_writing().await;
        let end_time = self.process_time_ms();

        let Some(segment) = self.segments.last_mut() else {
            return result;
        };
        segment.seal(end_time);

        match result {
            Ok(path) => {
                segment.path = path.clone();
                let _ = self.event_tx.send(CaptureEvent::SegmentSealed {
                    index: segment.index,
                    path: path.clone(),
                });
                tracing::info!("Segment {} sealed ({}ms)", segment.index, segment.duration_ms);
                Ok(path)
            }
            Err(e) => {
                tracing::error!("Segment {} failed to finalize: {}", segment.index, e);
                self.write_failed = true;
                Err(e)
            }
        }
    }

    fn start_counter(&mut self) {
        self.stop_counter();
        self.elapsed_secs.store(0, Ordering::SeqCst);

        let elapsed = self.elapsed_secs.clone();
        self.counter = Some(tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                elapsed.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    fn stop_counter(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.abort();
        }
    }

    /// Directory segment files are written to
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop_counter();
    }
}

fn remove_segment_files(segments: &[Segment]) {
    for segment in segments {
        if let Err(e) = std::fs::remove_file(&segment.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove segment {:?}: {}", segment.path, e);
            }
        }
    }
}
