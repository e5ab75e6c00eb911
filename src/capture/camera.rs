//! Physical-camera backend using nokhwa
//!
//! Desktop/UVC cameras expose no zoom, bias, or tap-to-focus controls, so
//! capability queries report a fixed lens; the session controller's
//! validation handles the rest.

use crate::capture::backend::{
    CameraFormat, CameraStream, CaptureBackend, DeviceCapabilities, DeviceInfo, StreamError,
};
use crate::capture::types::SetupError;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat as NokhwaFormat, CameraIndex, FrameFormat,
    RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use std::time::{Duration, Instant};

/// Candidate capture formats advertised for every enumerated device.
/// UVC enumeration of the true format list requires opening the device, so
/// a conservative candidate set is advertised instead.
const CANDIDATE_FORMATS: [CameraFormat; 3] = [
    CameraFormat {
        width: 1920,
        height: 1080,
        frame_rate: 30,
    },
    CameraFormat {
        width: 1280,
        height: 720,
        frame_rate: 30,
    },
    CameraFormat {
        width: 640,
        height: 480,
        frame_rate: 30,
    },
];

/// Backend over the host's native camera API (V4L2/AVFoundation/MSMF).
pub struct NokhwaBackend;

impl NokhwaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NokhwaBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for NokhwaBackend {
    fn devices(&self) -> Vec<DeviceInfo> {
        match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => cameras
                .into_iter()
                .map(|info| {
                    let id = match info.index() {
                        CameraIndex::Index(i) => i.to_string(),
                        CameraIndex::String(s) => s.to_string(),
                    };
                    DeviceInfo {
                        id,
                        name: info.human_name().to_string(),
                        supported_formats: CANDIDATE_FORMATS.to_vec(),
                    }
                })
                .collect(),
            Err(e) => {
                tracing::warn!("failed to enumerate cameras: {e:?}");
                Vec::new()
            }
        }
    }

    fn supports_simultaneous(&self, first: &DeviceInfo, second: &DeviceInfo) -> bool {
        // Distinct devices stream independently; the same device cannot be
        // opened twice
        first.id != second.id
    }

    fn open(
        &self,
        device: &DeviceInfo,
        format: CameraFormat,
    ) -> Result<Box<dyn CameraStream>, SetupError> {
        let index = match device.id.parse::<u32>() {
            Ok(i) => CameraIndex::Index(i),
            Err(_) => CameraIndex::String(device.id.clone()),
        };

        let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(
            NokhwaFormat::new(
                Resolution::new(format.width, format.height),
                FrameFormat::MJPEG,
                format.frame_rate,
            ),
        ));

        let mut camera = Camera::new(index, requested)
            .map_err(|e| SetupError::DeviceUnavailable(format!("{e:?}")))?;
        camera
            .open_stream()
            .map_err(|e| SetupError::DeviceUnavailable(format!("{e:?}")))?;

        let negotiated = camera.camera_format();
        tracing::info!(
            device = %device.name,
            width = negotiated.resolution().width(),
            height = negotiated.resolution().height(),
            fps = negotiated.frame_rate(),
            "camera opened"
        );

        Ok(Box::new(NokhwaStream {
            camera,
            format: CameraFormat {
                width: negotiated.resolution().width(),
                height: negotiated.resolution().height(),
                frame_rate: negotiated.frame_rate(),
            },
            opened: Instant::now(),
        }))
    }
}

struct NokhwaStream {
    camera: Camera,
    format: CameraFormat,
    opened: Instant,
}

// nokhwa's `Camera` holds `Box<dyn CaptureBackendTrait>` without a `Send`
// bound, but the platform backends are owned device handles and the stream
// is only ever used from one thread at a time.
unsafe impl Send for NokhwaStream {}

impl CameraStream for NokhwaStream {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::fixed()
    }

    fn format(&self) -> CameraFormat {
        self.format
    }

    fn read_into(&mut self, dest: &mut [u8]) -> Result<Duration, StreamError> {
        // frame() blocks until the camera delivers, which paces the tick
        let frame = self
            .camera
            .frame()
            .map_err(|e| StreamError::Failed(format!("{e:?}")))?;
        let decoded = frame
            .decode_image::<RgbAFormat>()
            .map_err(|e| StreamError::Failed(format!("decode: {e:?}")))?;

        let raw = decoded.into_raw();
        if raw.len() != dest.len() {
            return Err(StreamError::Failed(format!(
                "frame size mismatch: got {} bytes, expected {}",
                raw.len(),
                dest.len()
            )));
        }
        dest.copy_from_slice(&raw);
        Ok(self.opened.elapsed())
    }
}

impl Drop for NokhwaStream {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("error stopping camera stream: {e:?}");
        }
    }
}
