//! Recording orchestrator
//!
//! Drives one take from the start button to a saved recording:
//! countdown, capture and scroll in lockstep, the stop pipeline
//! (seal, merge, crop) and the save into durable storage.

use super::channel::CaptureBackend;
use super::scroll::ScrollDriver;
use super::session::CaptureSession;
use super::state::{StorageConfig, TeleprompterSettings};
use crate::capture::traits::CameraFacing;
use crate::export::{
    AspectCropper, AspectRatio, CropOptions, CropRect, CroppedVideo, ExportError, FfmpegCropper,
};
use crate::storage::{FileStore, MediaStore, Recording, RecordingUpdate, StorageResult};
use crate::utils::{AppError, AppResult, ErrorResponse};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex as AsyncMutex};
use tokio::time::Instant;
use uuid::Uuid;

/// Phase of the current take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum TakePhase {
    /// Waiting for the user to start a take
    #[default]
    Ready,
    /// Counting down; seconds remaining
    CountingDown { remaining: u8 },
    /// Capture and scroll both running
    Recording,
    /// Take open, current segment sealed
    Paused,
    /// Stop pipeline in flight
    Stopping,
    /// Cropped take waiting to be saved or discarded
    PreviewReady(PreviewItem),
}

/// A cropped take ready for preview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewItem {
    pub id: Uuid,
    /// Temporary cropped file
    pub path: PathBuf,
    pub crop: CropRect,
    pub aspect: AspectRatio,
    /// Script the take was recorded with
    pub script_text: String,
    pub elapsed_secs: u64,
    /// Take the preview belongs to
    pub generation: u64,
}

/// Events emitted by the orchestrator
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    CountdownTick(u8),
    RecordingStarted,
    Paused,
    Resumed,
    CameraSwitched(CameraFacing),
    Stopping,
    PreviewReady(PreviewItem),
    TakeFailed(ErrorResponse),
    Saved(Recording),
    Discarded,
}

struct PipelineOutcome {
    generation: u64,
    result: AppResult<PreviewItem>,
}

/// Coordinates capture, scrolling, cropping and storage for takes
pub struct RecordingOrchestrator {
    capture: Arc<AsyncMutex<CaptureSession>>,
    scroller: ScrollDriver,
    cropper: Arc<dyn AspectCropper>,
    files: FileStore,
    media: Arc<Mutex<MediaStore>>,
    settings: TeleprompterSettings,
    aspect: AspectRatio,
    script: String,
    phase: TakePhase,
    /// Incremented per take; stop outcomes of older takes are dropped
    generation: u64,
    /// Fires once the running stop pipeline has sealed the capture session
    sealing: Option<oneshot::Receiver<()>>,
    outcome_tx: mpsc::UnboundedSender<PipelineOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<PipelineOutcome>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl RecordingOrchestrator {
    pub fn new(
        backend: Box<dyn CaptureBackend>,
        cropper: Arc<dyn AspectCropper>,
        storage: &StorageConfig,
        settings: TeleprompterSettings,
    ) -> AppResult<Self> {
        let media = MediaStore::open(&storage.documents_dir)?;
        let files = FileStore::new(media.documents_dir());
        let temp_dir = std::path::absolute(&storage.temp_dir)?;
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(100);
        let settings = settings.normalized();

        tracing::info!(
            "Orchestrator ready (backend '{}', documents {:?})",
            backend.id(),
            storage.documents_dir
        );

        Ok(Self {
            capture: Arc::new(AsyncMutex::new(CaptureSession::new(backend, temp_dir))),
            scroller: ScrollDriver::new(settings.scroll_speed),
            cropper,
            files,
            media: Arc::new(Mutex::new(media)),
            settings,
            aspect: AspectRatio::default(),
            script: String::new(),
            phase: TakePhase::Ready,
            generation: 0,
            sealing: None,
            outcome_tx,
            outcome_rx,
            event_tx,
        })
    }

    /// Orchestrator cropping with FFmpeg at the default options
    pub fn with_ffmpeg(
        backend: Box<dyn CaptureBackend>,
        storage: &StorageConfig,
        settings: TeleprompterSettings,
    ) -> AppResult<Self> {
        let cropper = FfmpegCropper::new(&storage.temp_dir, CropOptions::default());
        Self::new(backend, Arc::new(cropper), storage, settings)
    }

    pub fn phase(&self) -> &TakePhase {
        &self.phase
    }

    pub fn settings(&self) -> &TeleprompterSettings {
        &self.settings
    }

    pub fn aspect(&self) -> AspectRatio {
        self.aspect
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    /// Shared scroll state for the script view
    pub fn scroller(&self) -> &ScrollDriver {
        &self.scroller
    }

    /// Shared capture session, e.g. for subscribing to capture events
    pub fn capture(&self) -> Arc<AsyncMutex<CaptureSession>> {
        self.capture.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    fn invalid(&self, action: &str) -> AppError {
        AppError::InvalidState(format!("cannot {} while {:?}", action, self.phase))
    }

    /// Bind the camera and microphone
    ///
    /// A missing device is reported but leaves the orchestrator usable.
    pub async fn prepare(&mut self) -> AppResult<()> {
        let mut capture = self.capture.lock().await;
        let facing = capture.facing();
        capture.configure(facing).await?;
        Ok(())
    }

    pub fn set_script(&mut self, text: impl Into<String>) {
        self.script = text.into();
    }

    /// Choose the output aspect ratio; fixed once a take starts
    pub fn set_aspect(&mut self, aspect: AspectRatio) -> AppResult<()> {
        if !matches!(self.phase, TakePhase::Ready) {
            return Err(self.invalid("change aspect ratio"));
        }
        self.aspect = aspect;
        Ok(())
    }

    /// Replace the settings; a new scroll speed applies on the next tick
    pub fn update_settings(&mut self, settings: TeleprompterSettings) {
        self.settings = settings.normalized();
        self.scroller.set_speed(self.settings.scroll_speed);
    }

    /// Start a take, with or without a countdown
    pub async fn start_tapped(&mut self) -> AppResult<TakePhase> {
        if !matches!(self.phase, TakePhase::Ready) {
            return Err(self.invalid("start"));
        }

        self.generation += 1;
        self.scroller.stop();
        let countdown = self.settings.countdown_secs;
        tracing::info!(
            "Take {} starting ({}s countdown, {})",
            self.generation,
            countdown,
            self.aspect.title()
        );

        if countdown == 0 {
            self.begin_recording().await?;
        } else {
            self.phase = TakePhase::CountingDown {
                remaining: countdown,
            };
            self.emit(OrchestratorEvent::CountdownTick(countdown));
        }
        Ok(self.phase.clone())
    }

    /// Advance the countdown by one second
    pub async fn countdown_tick(&mut self) -> AppResult<TakePhase> {
        let TakePhase::CountingDown { remaining } = self.phase else {
            return Err(self.invalid("count down"));
        };

        let remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            self.begin_recording().await?;
        } else {
            self.phase = TakePhase::CountingDown { remaining };
            self.emit(OrchestratorEvent::CountdownTick(remaining));
        }
        Ok(self.phase.clone())
    }

    /// Tick the countdown once per second until recording starts
    pub async fn run_countdown(&mut self) -> AppResult<TakePhase> {
        let period = Duration::from_secs(1);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        while matches!(self.phase, TakePhase::CountingDown { .. }) {
            interval.tick().await;
            self.countdown_tick().await?;
        }
        Ok(self.phase.clone())
    }

    async fn begin_recording(&mut self) -> AppResult<()> {
        let started = self.capture.lock().await.start_segment().await;
        if let Err(e) = started {
            let error = AppError::from(e);
            self.capture.lock().await.discard().await;
            self.fail_take(&error);
            return Err(error);
        }

        self.scroller.set_speed(self.settings.scroll_speed);
        self.scroller.play();
        self.phase = TakePhase::Recording;
        self.emit(OrchestratorEvent::RecordingStarted);
        Ok(())
    }

    /// Seal the current segment and hold the scroll position
    pub async fn pause_tapped(&mut self) -> AppResult<()> {
        if !matches!(self.phase, TakePhase::Recording) {
            return Err(self.invalid("pause"));
        }

        self.scroller.pause();
        self.phase = TakePhase::Paused;
        self.emit(OrchestratorEvent::Paused);
        self.capture.lock().await.pause().await?;
        Ok(())
    }

    /// Continue a paused take with a new segment
    pub async fn resume_tapped(&mut self) -> AppResult<()> {
        if !matches!(self.phase, TakePhase::Paused) {
            return Err(self.invalid("resume"));
        }

        self.capture.lock().await.start_segment().await?;
        self.scroller.play();
        self.phase = TakePhase::Recording;
        self.emit(OrchestratorEvent::Resumed);
        Ok(())
    }

    /// Switch between front and back camera
    ///
    /// While recording, the current segment is sealed and a new one starts
    /// under the new facing.
    pub async fn toggle_camera(&mut self) -> AppResult<CameraFacing> {
        let recording = match self.phase {
            TakePhase::Recording => true,
            TakePhase::Ready | TakePhase::Paused => false,
            _ => return Err(self.invalid("switch camera")),
        };

        if recording {
            self.scroller.pause();
        }

        let toggled = self.capture.lock().await.toggle_camera().await;
        let facing = match toggled {
            Ok(facing) => facing,
            Err(e) => {
                if recording {
                    self.phase = TakePhase::Paused;
                    self.emit(OrchestratorEvent::Paused);
                }
                return Err(e.into());
            }
        };
        self.emit(OrchestratorEvent::CameraSwitched(facing));

        if recording {
            if let Err(e) = self.capture.lock().await.start_segment().await {
                self.phase = TakePhase::Paused;
                self.emit(OrchestratorEvent::Paused);
                return Err(e.into());
            }
            self.scroller.play();
        }
        Ok(facing)
    }

    /// The app is leaving the foreground
    pub async fn app_will_resign_active(&mut self) -> AppResult<()> {
        if !matches!(self.phase, TakePhase::Recording) {
            return Ok(());
        }

        self.scroller.pause();
        self.phase = TakePhase::Paused;
        self.emit(OrchestratorEvent::Paused);
        self.capture.lock().await.app_will_resign_active().await?;
        Ok(())
    }

    /// The app is back in the foreground
    ///
    /// Recording resumes only if it was interrupted, not after a user pause.
    pub async fn app_did_become_active(&mut self) -> AppResult<bool> {
        if !matches!(self.phase, TakePhase::Paused) {
            return Ok(false);
        }

        let resumed = self.capture.lock().await.app_did_become_active().await?;
        if resumed {
            self.scroller.play();
            self.phase = TakePhase::Recording;
            self.emit(OrchestratorEvent::Resumed);
        }
        Ok(resumed)
    }

    /// Stop the take and start the seal/merge/crop pipeline
    ///
    /// The outcome is picked up by `next_outcome`.
    pub fn stop_tapped(&mut self) -> AppResult<()> {
        if !matches!(self.phase, TakePhase::Recording | TakePhase::Paused) {
            return Err(self.invalid("stop"));
        }

        self.scroller.pause();
        self.phase = TakePhase::Stopping;
        self.emit(OrchestratorEvent::Stopping);

        let (sealed_tx, sealed_rx) = oneshot::channel();
        self.sealing = Some(sealed_rx);
        let pipeline = TakePipeline {
            capture: self.capture.clone(),
            cropper: self.cropper.clone(),
            aspect: self.aspect,
            script: self.script.clone(),
            generation: self.generation,
            sealed: Some(sealed_tx),
        };
        let tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let generation = pipeline.generation;
            let result = pipeline.run().await;
            let _ = tx.send(PipelineOutcome { generation, result });
        });
        Ok(())
    }

    /// Wait for the stop pipeline of the current take
    ///
    /// Outcomes of discarded takes are dropped and their files removed. On
    /// failure the orchestrator returns to `Ready`.
    pub async fn next_outcome(&mut self) -> AppResult<TakePhase> {
        if !matches!(self.phase, TakePhase::Stopping) {
            return Err(self.invalid("wait for a take"));
        }

        loop {
            let outcome = self
                .outcome_rx
                .recv()
                .await
                .ok_or_else(|| AppError::InvalidState("take pipeline closed".to_string()))?;

            if outcome.generation != self.generation {
                drop_stale(outcome);
                continue;
            }

            self.sealing = None;
            return match outcome.result {
                Ok(item) => {
                    tracing::info!("Preview ready: {:?}", item.path);
                    self.phase = TakePhase::PreviewReady(item.clone());
                    self.emit(OrchestratorEvent::PreviewReady(item));
                    Ok(self.phase.clone())
                }
                Err(error) => {
                    self.fail_take(&error);
                    Err(error)
                }
            };
        }
    }

    /// `stop_tapped` followed by `next_outcome`
    pub async fn stop_and_preview(&mut self) -> AppResult<TakePhase> {
        self.stop_tapped()?;
        self.next_outcome().await
    }

    /// Copy the previewed take into durable storage and record it
    ///
    /// Nothing is recorded if the copy fails, and the copy is removed again
    /// if the record cannot be written. On failure the preview stays
    /// available for another attempt.
    pub async fn save(&mut self) -> AppResult<Recording> {
        let TakePhase::PreviewReady(item) = &self.phase else {
            return Err(self.invalid("save"));
        };
        let item = item.clone();

        let durable = match self.files.save(&item.path).await {
            Ok(path) => path,
            Err(e) => {
                let error = AppError::from(e);
                tracing::error!("Save failed, no recording created: {}", error);
                self.emit(OrchestratorEvent::TakeFailed(ErrorResponse::from(&error)));
                return Err(error);
            }
        };

        let script = item.script_text.clone();
        let video = durable.clone();
        let created = self
            .with_media(move |media| media.insert(&script, &video))
            .await;
        let recording = match created {
            Ok(recording) => recording,
            Err(error) => {
                if let Err(cleanup) = self.files.remove(&durable).await {
                    tracing::error!("Failed to remove unrecorded copy {:?}: {}", durable, cleanup);
                }
                tracing::error!("Save failed, copy removed: {}", error);
                self.emit(OrchestratorEvent::TakeFailed(ErrorResponse::from(&error)));
                return Err(error);
            }
        };

        remove_files(&[item.path]);
        self.scroller.stop();
        self.phase = TakePhase::Ready;
        self.emit(OrchestratorEvent::Saved(recording.clone()));
        Ok(recording)
    }

    /// Abandon the current take in any phase
    ///
    /// While stopping, waits until the pipeline has sealed the capture
    /// session so the next take starts on a clean one. Its outcome is
    /// dropped when it arrives.
    pub async fn discard(&mut self) {
        self.generation += 1;

        match std::mem::take(&mut self.phase) {
            TakePhase::PreviewReady(item) => remove_files(&[item.path]),
            TakePhase::CountingDown { .. } | TakePhase::Recording | TakePhase::Paused => {
                self.capture.lock().await.discard().await;
            }
            TakePhase::Stopping => {
                if let Some(sealing) = self.sealing.take() {
                    let _ = sealing.await;
                }
            }
            TakePhase::Ready => {}
        }

        self.scroller.stop();
        self.emit(OrchestratorEvent::Discarded);
        tracing::info!("Take discarded");
    }

    fn fail_take(&mut self, error: &AppError) {
        tracing::error!("Take failed: {}", error);
        self.scroller.stop();
        self.phase = TakePhase::Ready;
        self.emit(OrchestratorEvent::TakeFailed(ErrorResponse::from(error)));
    }

    /// Run a store operation on the blocking pool
    async fn with_media<T, F>(&self, op: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut MediaStore) -> StorageResult<T> + Send + 'static,
    {
        let media = self.media.clone();
        let result = tokio::task::spawn_blocking(move || op(&mut media.lock()))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(result?)
    }

    /// Saved recordings, newest first
    pub async fn recordings(&self) -> AppResult<Vec<Recording>> {
        self.with_media(|media| media.list()).await
    }

    pub async fn update_recording(
        &self,
        id: Uuid,
        update: RecordingUpdate,
    ) -> AppResult<Vec<Recording>> {
        self.with_media(move |media| media.update(id, update)).await
    }

    /// Delete a recording together with its video file
    pub async fn delete_recording(&self, id: Uuid) -> AppResult<Vec<Recording>> {
        self.with_media(move |media| media.delete(id)).await
    }

    /// Remove durable videos no recording refers to
    pub async fn sweep_orphans(&self) -> AppResult<Vec<PathBuf>> {
        let referenced = self.media.lock().referenced_paths();
        Ok(self.files.sweep_orphans(&referenced).await?)
    }
}

/// Stop work for one take, run off the orchestrator's task
struct TakePipeline {
    capture: Arc<AsyncMutex<CaptureSession>>,
    cropper: Arc<dyn AspectCropper>,
    aspect: AspectRatio,
    script: String,
    generation: u64,
    sealed: Option<oneshot::Sender<()>>,
}

impl TakePipeline {
    async fn run(mut self) -> AppResult<PreviewItem> {
        let stopped = self.capture.lock().await.stop_all().await;
        if let Some(sealed) = self.sealed.take() {
            let _ = sealed.send(());
        }
        let take = stopped?
            .ok_or_else(|| AppError::InvalidState("no take in progress".to_string()))?;

        let segments = take.files();
        let cropped = self.crop_take(&segments).await;
        remove_files(&segments);
        let cropped = cropped?;

        tracing::info!(
            "Take {} cropped to {} ({} segment(s), {}s)",
            self.generation,
            cropped.aspect.title(),
            segments.len(),
            take.elapsed_secs
        );

        Ok(PreviewItem {
            id: Uuid::new_v4(),
            path: cropped.path,
            crop: cropped.crop,
            aspect: cropped.aspect,
            script_text: self.script,
            elapsed_secs: take.elapsed_secs,
            generation: self.generation,
        })
    }

    async fn crop_take(&self, segments: &[PathBuf]) -> Result<CroppedVideo, ExportError> {
        match segments {
            [] => Err(ExportError::InvalidInput("take has no segments".to_string())),
            [single] => self.cropper.crop(single, self.aspect).await,
            _ => {
                let merged = self.cropper.merge_segments(segments).await?;
                let cropped = self.cropper.crop(&merged, self.aspect).await;
                remove_files(std::slice::from_ref(&merged));
                cropped
            }
        }
    }
}

fn drop_stale(outcome: PipelineOutcome) {
    match outcome.result {
        Ok(item) => {
            tracing::debug!("Dropping preview of discarded take {}", outcome.generation);
            remove_files(&[item.path]);
        }
        Err(e) => tracing::debug!("Ignoring failure of discarded take {}: {}", outcome.generation, e),
    }
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {:?}: {}", path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::cropper::fake::{FakeCropper, FakeCropperControls};
    use crate::recorder::channel::fake::{FakeBackend, FakeControls};
    use crate::recorder::state::CaptureState;
    use std::sync::atomic::Ordering;
    use tempfile::{tempdir, TempDir};

    struct Harness {
        _dir: TempDir,
        storage: StorageConfig,
        capture: FakeControls,
        cropper: FakeCropperControls,
        orchestrator: RecordingOrchestrator,
    }

    fn harness(countdown_secs: u8) -> Harness {
        let dir = tempdir().unwrap();
        let storage = StorageConfig::under(dir.path());
        let (backend, capture) = FakeBackend::new();
        let (cropper, cropper_controls) = FakeCropper::new(&storage.temp_dir);
        let settings = TeleprompterSettings {
            countdown_secs,
            ..Default::default()
        };
        let orchestrator =
            RecordingOrchestrator::new(Box::new(backend), Arc::new(cropper), &storage, settings)
                .unwrap();
        Harness {
            _dir: dir,
            storage,
            capture,
            cropper: cropper_controls,
            orchestrator,
        }
    }

    async fn capture_state(orchestrator: &RecordingOrchestrator) -> CaptureState {
        orchestrator.capture().lock().await.state()
    }

    #[tokio::test]
    async fn test_zero_countdown_starts_recording_immediately() {
        let mut h = harness(0);
        h.orchestrator.prepare().await.unwrap();
        let mut events = h.orchestrator.subscribe();

        let phase = h.orchestrator.start_tapped().await.unwrap();
        assert_eq!(phase, TakePhase::Recording);
        assert_eq!(capture_state(&h.orchestrator).await, CaptureState::Recording);
        assert!(h.orchestrator.scroller().is_running());
        assert!(matches!(
            events.try_recv().unwrap(),
            OrchestratorEvent::RecordingStarted
        ));
    }

    #[tokio::test]
    async fn test_countdown_ticks_down_to_recording() {
        let mut h = harness(3);

        let phase = h.orchestrator.start_tapped().await.unwrap();
        assert_eq!(phase, TakePhase::CountingDown { remaining: 3 });
        assert_eq!(capture_state(&h.orchestrator).await, CaptureState::Idle);
        assert!(!h.orchestrator.scroller().is_running());

        assert_eq!(
            h.orchestrator.countdown_tick().await.unwrap(),
            TakePhase::CountingDown { remaining: 2 }
        );
        assert_eq!(
            h.orchestrator.countdown_tick().await.unwrap(),
            TakePhase::CountingDown { remaining: 1 }
        );
        assert_eq!(
            h.orchestrator.countdown_tick().await.unwrap(),
            TakePhase::Recording
        );
        assert!(h.orchestrator.scroller().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_countdown_takes_configured_seconds() {
        let mut h = harness(3);
        h.orchestrator.start_tapped().await.unwrap();

        let started = Instant::now();
        let phase = h.orchestrator.run_countdown().await.unwrap();
        assert_eq!(phase, TakePhase::Recording);
        assert_eq!(started.elapsed().as_secs(), 3);
    }

    #[tokio::test]
    async fn test_start_is_rejected_outside_ready() {
        let mut h = harness(0);
        h.orchestrator.start_tapped().await.unwrap();
        assert!(matches!(
            h.orchestrator.start_tapped().await,
            Err(AppError::InvalidState(_))
        ));
        assert!(h.orchestrator.set_aspect(AspectRatio::OneOne).is_err());
    }

    #[tokio::test]
    async fn test_square_take_saves_exactly_one_recording() {
        let mut h = harness(0);
        h.orchestrator.set_script("Hello world");
        h.orchestrator.set_aspect(AspectRatio::OneOne).unwrap();
        h.orchestrator.start_tapped().await.unwrap();

        let phase = h.orchestrator.stop_and_preview().await.unwrap();
        let TakePhase::PreviewReady(item) = phase else {
            panic!("expected preview, got {:?}", phase);
        };
        assert_eq!(item.aspect, AspectRatio::OneOne);
        assert_eq!(item.crop.width, item.crop.height);
        assert!(!h.orchestrator.scroller().is_running());

        let recording = h.orchestrator.save().await.unwrap();
        let list = h.orchestrator.recordings().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0], recording);
        assert_eq!(recording.script_text, "Hello world");

        let video = recording.video_path().unwrap();
        assert_eq!(video.parent().unwrap(), h.storage.documents_dir);
        assert!(video.exists());
        assert!(!item.path.exists());
        assert!(h.capture.written.lock().iter().all(|p| !p.exists()));
        assert_eq!(*h.orchestrator.phase(), TakePhase::Ready);
        assert_eq!(h.orchestrator.scroller().offset(), 0.0);
    }

    #[tokio::test]
    async fn test_paused_take_merges_segments_before_crop() {
        let mut h = harness(0);
        h.orchestrator.start_tapped().await.unwrap();
        h.orchestrator.pause_tapped().await.unwrap();
        assert!(!h.orchestrator.scroller().is_running());
        h.orchestrator.resume_tapped().await.unwrap();

        h.orchestrator.stop_and_preview().await.unwrap();
        let merged = h.cropper.merged.lock().clone();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0], *h.capture.written.lock());
        assert!(merged[0].iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn test_stop_while_paused_uses_sealed_segment() {
        let mut h = harness(0);
        h.orchestrator.start_tapped().await.unwrap();
        h.orchestrator.pause_tapped().await.unwrap();

        let phase = h.orchestrator.stop_and_preview().await.unwrap();
        assert!(matches!(phase, TakePhase::PreviewReady(_)));
        assert!(h.cropper.merged.lock().is_empty());
        assert_eq!(h.cropper.cropped.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_crop_failure_creates_no_recording() {
        let mut h = harness(0);
        h.cropper.fail_crop.store(true, Ordering::SeqCst);
        let mut events = h.orchestrator.subscribe();
        h.orchestrator.start_tapped().await.unwrap();

        let result = h.orchestrator.stop_and_preview().await;
        assert!(matches!(result, Err(AppError::Export(_))));
        assert_eq!(*h.orchestrator.phase(), TakePhase::Ready);
        assert!(h.orchestrator.recordings().await.unwrap().is_empty());
        assert!(h.capture.written.lock().iter().all(|p| !p.exists()));

        let mut failed = None;
        while let Ok(event) = events.try_recv() {
            if let OrchestratorEvent::TakeFailed(response) = event {
                failed = Some(response);
            }
        }
        assert_eq!(failed.unwrap().code, "EXPORT_FAILURE");

        // Can retry
        h.cropper.fail_crop.store(false, Ordering::SeqCst);
        h.orchestrator.start_tapped().await.unwrap();
        assert!(h.orchestrator.stop_and_preview().await.is_ok());
    }

    #[tokio::test]
    async fn test_write_failure_aborts_take() {
        let mut h = harness(0);
        h.orchestrator.start_tapped().await.unwrap();
        h.capture.fail_finish.store(true, Ordering::SeqCst);

        let result = h.orchestrator.stop_and_preview().await;
        let error = result.unwrap_err();
        assert_eq!(error.code(), "WRITE_FAILURE");
        assert!(h.cropper.cropped.lock().is_empty());
        assert!(h.orchestrator.recordings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_failure_creates_no_recording() {
        let mut h = harness(0);
        h.orchestrator.start_tapped().await.unwrap();
        let TakePhase::PreviewReady(item) = h.orchestrator.stop_and_preview().await.unwrap() else {
            panic!("expected preview");
        };

        std::fs::remove_file(&item.path).unwrap();
        let error = h.orchestrator.save().await.unwrap_err();
        assert_eq!(error.code(), "PERSISTENCE_FAILURE");
        assert!(h.orchestrator.recordings().await.unwrap().is_empty());
        assert!(matches!(h.orchestrator.phase(), TakePhase::PreviewReady(_)));
        let durable: Vec<_> = std::fs::read_dir(&h.storage.documents_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "mp4").unwrap_or(false))
            .collect();
        assert!(durable.is_empty());
    }

    #[tokio::test]
    async fn test_discarded_take_outcome_is_dropped() {
        let mut h = harness(0);
        h.orchestrator.start_tapped().await.unwrap();
        h.orchestrator.stop_tapped().unwrap();
        h.orchestrator.discard().await;
        assert_eq!(*h.orchestrator.phase(), TakePhase::Ready);

        // Let the abandoned pipeline finish
        for _ in 0..100 {
            if !h.cropper.outputs.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stale = h.cropper.outputs.lock()[0].clone();

        h.orchestrator.start_tapped().await.unwrap();
        let TakePhase::PreviewReady(item) = h.orchestrator.stop_and_preview().await.unwrap() else {
            panic!("expected preview");
        };
        assert_ne!(item.path, stale);
        assert!(!stale.exists());
        assert!(item.path.exists());
    }

    #[tokio::test]
    async fn test_restart_right_after_discarding_a_stopping_take() {
        let mut h = harness(0);
        h.orchestrator.start_tapped().await.unwrap();
        h.orchestrator.stop_tapped().unwrap();
        h.orchestrator.discard().await;
        let first_take = h.capture.written.lock().clone();
        assert_eq!(first_take.len(), 1);

        h.orchestrator.start_tapped().await.unwrap();
        assert_eq!(capture_state(&h.orchestrator).await, CaptureState::Recording);
        assert_eq!(h.orchestrator.capture().lock().await.segments().len(), 1);

        let TakePhase::PreviewReady(item) = h.orchestrator.stop_and_preview().await.unwrap() else {
            panic!("expected preview");
        };
        assert!(item.path.exists());

        // Each take kept its own single segment
        let written = h.capture.written.lock().clone();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], first_take[0]);
        assert!(h.cropper.cropped.lock().contains(&written[1]));
        assert!(h.cropper.merged.lock().is_empty());
    }

    #[tokio::test]
    async fn test_manual_resume_after_interruption_keeps_later_pause() {
        let mut h = harness(0);
        h.orchestrator.start_tapped().await.unwrap();
        h.orchestrator.app_will_resign_active().await.unwrap();
        h.orchestrator.resume_tapped().await.unwrap();
        h.orchestrator.pause_tapped().await.unwrap();

        assert!(!h.orchestrator.app_did_become_active().await.unwrap());
        assert_eq!(*h.orchestrator.phase(), TakePhase::Paused);
        assert_eq!(capture_state(&h.orchestrator).await, CaptureState::Paused);
        assert!(!h.orchestrator.scroller().is_running());
    }

    #[tokio::test]
    async fn test_discard_preview_removes_cropped_file() {
        let mut h = harness(0);
        h.orchestrator.start_tapped().await.unwrap();
        let TakePhase::PreviewReady(item) = h.orchestrator.stop_and_preview().await.unwrap() else {
            panic!("expected preview");
        };

        h.orchestrator.discard().await;
        assert!(!item.path.exists());
        assert!(h.orchestrator.recordings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_camera_toggle_while_recording_continues_on_new_segment() {
        let mut h = harness(0);
        h.orchestrator.prepare().await.unwrap();
        h.orchestrator.start_tapped().await.unwrap();

        let facing = h.orchestrator.toggle_camera().await.unwrap();
        assert_eq!(facing, CameraFacing::Back);
        assert_eq!(*h.orchestrator.phase(), TakePhase::Recording);
        assert!(h.orchestrator.scroller().is_running());

        let capture = h.orchestrator.capture();
        let session = capture.lock().await;
        assert_eq!(session.segments().len(), 2);
        assert_eq!(session.segments()[1].facing, CameraFacing::Back);
    }

    #[tokio::test]
    async fn test_lifecycle_pauses_and_resumes_take() {
        let mut h = harness(0);
        h.orchestrator.start_tapped().await.unwrap();

        h.orchestrator.app_will_resign_active().await.unwrap();
        assert_eq!(*h.orchestrator.phase(), TakePhase::Paused);
        assert!(!h.orchestrator.scroller().is_running());

        assert!(h.orchestrator.app_did_become_active().await.unwrap());
        assert_eq!(*h.orchestrator.phase(), TakePhase::Recording);
        assert!(h.orchestrator.scroller().is_running());

        // A user pause is not undone by the lifecycle
        h.orchestrator.pause_tapped().await.unwrap();
        assert!(!h.orchestrator.app_did_become_active().await.unwrap());
        assert_eq!(*h.orchestrator.phase(), TakePhase::Paused);
    }

    #[tokio::test]
    async fn test_deleted_recording_disappears_immediately() {
        let mut h = harness(0);
        h.orchestrator.start_tapped().await.unwrap();
        h.orchestrator.stop_and_preview().await.unwrap();
        let recording = h.orchestrator.save().await.unwrap();
        let video = recording.video_path().unwrap();

        let list = h.orchestrator.delete_recording(recording.id).await.unwrap();
        assert!(list.is_empty());
        assert!(h.orchestrator.recordings().await.unwrap().is_empty());
        assert!(!video.exists());
    }

    #[tokio::test]
    async fn test_settings_update_changes_scroll_speed_live() {
        let mut h = harness(0);
        h.orchestrator.start_tapped().await.unwrap();
        h.orchestrator.update_settings(TeleprompterSettings {
            scroll_speed: 500.0,
            ..Default::default()
        });
        assert_eq!(h.orchestrator.scroller().speed(), 100.0);
        assert_eq!(h.orchestrator.settings().scroll_speed, 100.0);
    }
}
