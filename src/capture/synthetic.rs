//! Synthetic capture backend
//!
//! Deterministic test-pattern cameras for tests and headless embedders.
//! Each stream paces itself at the requested frame rate and fills frames
//! with a per-device shade plus a frame counter in the green channel, so
//! consumers can assert on exact pixel values.

use crate::capture::backend::{
    CameraFormat, CameraStream, CaptureBackend, DeviceCapabilities, DeviceInfo, StreamError,
};
use crate::capture::types::SetupError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const FORMATS: [CameraFormat; 3] = [
    CameraFormat {
        width: 640,
        height: 480,
        frame_rate: 60,
    },
    CameraFormat {
        width: 1280,
        height: 720,
        frame_rate: 60,
    },
    CameraFormat {
        width: 1920,
        height: 1080,
        frame_rate: 60,
    },
];

/// A backend with two virtual sensors.
pub struct SyntheticBackend {
    /// When set, streams report a disconnect on their next read
    unplug: Arc<AtomicBool>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            unplug: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate both devices being unplugged; every open stream reports
    /// [`StreamError::Disconnected`] on its next frame.
    pub fn unplug(&self) {
        self.unplug.store(true, Ordering::SeqCst);
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for SyntheticBackend {
    fn devices(&self) -> Vec<DeviceInfo> {
        vec![
            DeviceInfo {
                id: "synthetic-0".into(),
                name: "Synthetic Front".into(),
                supported_formats: FORMATS.to_vec(),
            },
            DeviceInfo {
                id: "synthetic-1".into(),
                name: "Synthetic Back".into(),
                supported_formats: FORMATS.to_vec(),
            },
        ]
    }

    fn supports_simultaneous(&self, first: &DeviceInfo, second: &DeviceInfo) -> bool {
        // The one hard constraint even virtual hardware has: a device
        // cannot be opened against itself
        first.id != second.id
    }

    fn open(
        &self,
        device: &DeviceInfo,
        format: CameraFormat,
    ) -> Result<Box<dyn CameraStream>, SetupError> {
        if !device.supports(&format) {
            return Err(SetupError::UnsupportedFormat(device.id.clone()));
        }
        let shade = if device.id.ends_with('0') { 64 } else { 192 };
        Ok(Box::new(SyntheticStream {
            format,
            shade,
            frame_index: 0,
            opened: Instant::now(),
            unplug: self.unplug.clone(),
        }))
    }
}

struct SyntheticStream {
    format: CameraFormat,
    shade: u8,
    frame_index: u64,
    opened: Instant,
    unplug: Arc<AtomicBool>,
}

impl CameraStream for SyntheticStream {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            min_zoom: 1.0,
            max_zoom: 8.0,
            min_exposure_bias: -2.0,
            max_exposure_bias: 2.0,
            supports_focus_point: true,
        }
    }

    fn format(&self) -> CameraFormat {
        self.format
    }

    fn read_into(&mut self, dest: &mut [u8]) -> Result<Duration, StreamError> {
        if self.unplug.load(Ordering::SeqCst) {
            return Err(StreamError::Disconnected);
        }

        let period = Duration::from_secs(1) / self.format.frame_rate.max(1);
        let due = period * self.frame_index as u32;
        let elapsed = self.opened.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }

        let counter = (self.frame_index % 256) as u8;
        for pixel in dest.chunks_exact_mut(4) {
            pixel[0] = self.shade;
            pixel[1] = counter;
            pixel[2] = 0x20;
            pixel[3] = 255;
        }

        let pts = period * self.frame_index as u32;
        self.frame_index += 1;
        Ok(pts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_two_devices_pair_but_not_with_themselves() {
        let backend = SyntheticBackend::new();
        let devices = backend.devices();
        assert_eq!(devices.len(), 2);
        assert!(backend.supports_simultaneous(&devices[0], &devices[1]));
        assert!(!backend.supports_simultaneous(&devices[0], &devices[0]));
    }

    #[test]
    fn frames_carry_a_counter_and_monotonic_pts() {
        let backend = SyntheticBackend::new();
        let devices = backend.devices();
        let format = CameraFormat {
            width: 640,
            height: 480,
            frame_rate: 60,
        };
        let mut stream = backend.open(&devices[0], format).unwrap();

        let mut dest = vec![0u8; (format.width * format.height * 4) as usize];
        let first = stream.read_into(&mut dest).unwrap();
        assert_eq!(dest[1], 0);
        let second = stream.read_into(&mut dest).unwrap();
        assert_eq!(dest[1], 1);
        assert!(second > first);
    }

    #[test]
    fn unplug_surfaces_as_disconnect() {
        let backend = SyntheticBackend::new();
        let devices = backend.devices();
        let format = FORMATS[0];
        let mut stream = backend.open(&devices[1], format).unwrap();
        backend.unplug();

        let mut dest = vec![0u8; (format.width * format.height * 4) as usize];
        assert!(matches!(
            stream.read_into(&mut dest),
            Err(StreamError::Disconnected)
        ));
    }

    #[test]
    fn open_rejects_unlisted_formats() {
        let backend = SyntheticBackend::new();
        let devices = backend.devices();
        let result = backend.open(
            &devices[0],
            CameraFormat {
                width: 333,
                height: 222,
                frame_rate: 11,
            },
        );
        assert!(matches!(result, Err(SetupError::UnsupportedFormat(_))));
    }
}
