//! Capture devices
//!
//! Device descriptions shared by all backends, plus the optional native
//! backend for desktop cameras and microphones.

pub mod traits;

#[cfg(feature = "native-capture")]
pub mod webcam;

pub use traits::{AudioDeviceInfo, CameraFacing, CameraInfo, Resolution};

#[cfg(feature = "native-capture")]
pub use webcam::NativeCaptureBackend;
