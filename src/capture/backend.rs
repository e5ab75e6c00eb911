//! Capture backend traits
//!
//! Platform-agnostic interface over the underlying camera API. The session
//! controller only talks to these traits; one backend implementation exists
//! per target camera stack (plus a synthetic one for tests and headless
//! embedders).

use crate::capture::types::{ExposureControl, FocusControl, SetupError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Information about one camera device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Unique device ID within its backend
    pub id: String,

    /// Human-readable device name
    pub name: String,

    /// Formats the device can capture
    pub supported_formats: Vec<CameraFormat>,
}

impl DeviceInfo {
    /// Whether the device reports support for the given format
    pub fn supports(&self, format: &CameraFormat) -> bool {
        self.supported_formats.iter().any(|f| {
            f.width == format.width && f.height == format.height && f.frame_rate >= format.frame_rate
        })
    }
}

/// A capture resolution + frame rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Device-reported control bounds, queried once at configure time
#[derive(Debug, Clone, Copy)]
pub struct DeviceCapabilities {
    pub min_zoom: f32,
    pub max_zoom: f32,
    pub min_exposure_bias: f32,
    pub max_exposure_bias: f32,
    pub supports_focus_point: bool,
}

impl DeviceCapabilities {
    /// Fixed-lens defaults: no zoom, no bias range, no tap-to-focus
    pub fn fixed() -> Self {
        Self {
            min_zoom: 1.0,
            max_zoom: 1.0,
            min_exposure_bias: 0.0,
            max_exposure_bias: 0.0,
            supports_focus_point: false,
        }
    }
}

/// A camera API capable of enumerating and opening devices.
pub trait CaptureBackend: Send + Sync {
    /// Enumerate available devices
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Whether the two devices can stream at the same time. This is the hard
    /// multi-camera constraint: backends with shared bandwidth or exclusive
    /// pipelines reject unsupported pairs here.
    fn supports_simultaneous(&self, first: &DeviceInfo, second: &DeviceInfo) -> bool;

    /// Open a device for streaming at the given format.
    fn open(
        &self,
        device: &DeviceInfo,
        format: CameraFormat,
    ) -> Result<Box<dyn CameraStream>, SetupError>;
}

/// An open, configured camera delivering frames on demand.
///
/// `read_into` blocks until the device produces its next frame; the session
/// controller calls it from a dedicated per-device thread, so the device's
/// own cadence paces the capture tick.
pub trait CameraStream: Send {
    /// Control bounds for this device
    fn capabilities(&self) -> DeviceCapabilities;

    /// Actual negotiated format (may differ from the requested one)
    fn format(&self) -> CameraFormat;

    /// Block for the next frame, writing RGBA pixels into `dest`. Returns
    /// the frame's presentation timestamp relative to stream start.
    fn read_into(&mut self, dest: &mut [u8]) -> Result<Duration, StreamError>;

    /// Apply a validated zoom factor. Backends without optical/digital zoom
    /// accept 1.0 and ignore the call.
    fn apply_zoom(&mut self, _factor: f32) {}

    /// Apply a validated focus request.
    fn apply_focus(&mut self, _focus: FocusControl) {}

    /// Apply a validated exposure request.
    fn apply_exposure(&mut self, _exposure: ExposureControl) {}
}

/// Errors raised while reading from an open stream
#[derive(Debug, Clone)]
pub enum StreamError {
    /// The device went away; terminal for the session
    Disconnected,
    /// Read/decode failure with device detail
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_supports_matches_on_resolution_and_rate() {
        let device = DeviceInfo {
            id: "cam0".into(),
            name: "Test".into(),
            supported_formats: vec![CameraFormat {
                width: 1280,
                height: 720,
                frame_rate: 30,
            }],
        };

        assert!(device.supports(&CameraFormat {
            width: 1280,
            height: 720,
            frame_rate: 30,
        }));
        // A lower requested rate is fine, a higher one is not
        assert!(device.supports(&CameraFormat {
            width: 1280,
            height: 720,
            frame_rate: 24,
        }));
        assert!(!device.supports(&CameraFormat {
            width: 1280,
            height: 720,
            frame_rate: 60,
        }));
        assert!(!device.supports(&CameraFormat {
            width: 1920,
            height: 1080,
            frame_rate: 30,
        }));
    }
}
