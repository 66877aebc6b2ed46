//! Teleprompter - record yourself reading a script.
//!
//! This is the library crate behind the teleprompter app. It provides
//! segmented camera capture, the scrolling script, aspect-ratio cropping and
//! durable storage of finished takes. The host app supplies a capture
//! backend and drives `RecordingOrchestrator` from its UI.

pub mod capture;
pub mod export;
pub mod recorder;
pub mod storage;
pub mod utils;

pub use recorder::{RecordingOrchestrator, StorageConfig, TakePhase, TeleprompterSettings};
pub use utils::{AppError, AppResult, ErrorResponse};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
///
/// `RUST_LOG` overrides the default filter. Calling this more than once is
/// harmless.
pub fn init_tracing() {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teleprompter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::info!("Starting teleprompter v{}", env!("CARGO_PKG_VERSION"));
    }
}
