//! Dual-camera capture
//!
//! The session controller, the backend abstraction it drives, and the two
//! in-tree backends: nokhwa for physical cameras and a synthetic
//! test-pattern pair.

pub mod backend;
pub mod camera;
pub mod controller;
pub mod synthetic;
pub mod types;

pub use backend::{CameraFormat, CameraStream, CaptureBackend, DeviceCapabilities, DeviceInfo};
pub use camera::NokhwaBackend;
pub use controller::{CameraEndpoint, CaptureSessionController, FrameConsumer};
pub use synthetic::SyntheticBackend;
pub use types::{
    CameraPosition, CapturePolicy, ControlError, ExposureControl, FocusControl, FrameBuffer,
    FrameSource, PixelFormat, QualityTier, SessionFault, SetupError,
};
