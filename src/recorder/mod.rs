//! Recording system module
//!
//! This module implements the take lifecycle:
//! - CaptureBackend trait for platform camera/microphone input
//! - CaptureSession for segment-based capture
//! - ScrollDriver for the teleprompter scroll
//! - RecordingOrchestrator tying capture, crop and storage together

pub mod channel;
pub mod orchestrator;
pub mod scroll;
pub mod session;
pub mod state;

pub use channel::{CaptureBackend, CaptureError, CaptureResult};
pub use orchestrator::{OrchestratorEvent, PreviewItem, RecordingOrchestrator, TakePhase};
pub use scroll::ScrollDriver;
pub use session::{CaptureEvent, CaptureSession};
pub use state::{CaptureState, SealedTake, Segment, StorageConfig, TeleprompterSettings};
