//! Core capture types
//!
//! Frame buffers, camera identity, and the quality/policy inputs the
//! session controller consumes.

use crate::compose::pool::PooledPixels;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Which physical sensor a device or frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    Front,
    Back,
}

impl CameraPosition {
    /// The other sensor
    pub fn opposite(&self) -> Self {
        match self {
            CameraPosition::Front => CameraPosition::Back,
            CameraPosition::Back => CameraPosition::Front,
        }
    }
}

/// Origin of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Camera(CameraPosition),
    /// Output of the live compositor
    Composite,
}

/// Pixel layout of frame storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// An immutable pixel buffer with presentation timestamp and source identity.
///
/// Cloning shares the underlying storage; pooled storage returns to its pool
/// only when the last clone drops.
#[derive(Clone)]
pub struct FrameBuffer {
    pixels: Arc<PooledPixels>,
    width: u32,
    height: u32,
    format: PixelFormat,
    pts: Duration,
    source: FrameSource,
}

impl FrameBuffer {
    /// Wrap pooled storage. The storage length must match the dimensions.
    pub fn from_pooled(
        pixels: PooledPixels,
        width: u32,
        height: u32,
        format: PixelFormat,
        pts: Duration,
        source: FrameSource,
    ) -> Self {
        debug_assert_eq!(
            pixels.len(),
            width as usize * height as usize * format.bytes_per_pixel()
        );
        Self {
            pixels: Arc::new(pixels),
            width,
            height,
            format,
            pts,
            source,
        }
    }

    /// Wrap an owned vector that does not come from a pool.
    pub fn from_vec(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        pts: Duration,
        source: FrameSource,
    ) -> Self {
        Self::from_pooled(PooledPixels::detached(data), width, height, format, pts, source)
    }

    pub fn data(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pts(&self) -> Duration {
        self.pts
    }

    pub fn source(&self) -> FrameSource {
        self.source
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("pts", &self.pts)
            .field("source", &self.source)
            .finish()
    }
}

/// Quality tier supplied by the external adaptive-quality policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

impl QualityTier {
    /// Target capture resolution for this tier
    pub fn resolution(&self) -> (u32, u32) {
        match self {
            QualityTier::Low => (640, 480),
            QualityTier::Medium => (1280, 720),
            QualityTier::High => (1920, 1080),
        }
    }

    /// Target capture frame rate for this tier
    pub fn frame_rate(&self) -> u32 {
        match self {
            QualityTier::Low => 24,
            QualityTier::Medium => 30,
            QualityTier::High => 60,
        }
    }
}

/// Policy inputs re-read at session (re)configuration.
///
/// External battery/thermal/memory telemetry collapses into these values;
/// the engine never reads global pressure state directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturePolicy {
    pub quality: QualityTier,
    /// Optional cap below the tier's native frame rate
    pub frame_rate_cap: Option<u32>,
}

impl CapturePolicy {
    pub fn new(quality: QualityTier) -> Self {
        Self {
            quality,
            frame_rate_cap: None,
        }
    }

    /// Effective capture frame rate after applying the cap
    pub fn effective_frame_rate(&self) -> u32 {
        let native = self.quality.frame_rate();
        match self.frame_rate_cap {
            Some(cap) => native.min(cap.max(1)),
            None => native,
        }
    }
}

/// Focus request for one device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum FocusControl {
    Auto,
    Locked,
    /// Focus on a point in the unit square (0,0 top-left .. 1,1 bottom-right)
    Point { x: f32, y: f32 },
}

/// Exposure request for one device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum ExposureControl {
    Auto,
    Locked,
    /// Exposure bias in EV, validated against device bounds
    Bias { ev: f32 },
}

/// Session/device configuration failures
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("session is not configured")]
    NotConfigured,

    #[error("device pair does not support simultaneous capture")]
    UnsupportedCombination,

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("requested format not supported by device {0}")]
    UnsupportedFormat(String),

    #[error("capture backend failure: {0}")]
    BackendFailure(String),
}

/// Out-of-range or misdirected control requests
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("{control} value {requested} outside [{min}, {max}]")]
    OutOfRange {
        control: &'static str,
        requested: f32,
        min: f32,
        max: f32,
    },

    #[error("no device configured for {0:?} position")]
    UnknownDevice(CameraPosition),

    #[error("session is not configured")]
    NotConfigured,
}

/// Terminal device/session faults. The controller reports these once and
/// does not retry; retry policy belongs to the caller.
#[derive(Debug, Clone)]
pub enum SessionFault {
    DeviceDisconnected(CameraPosition),
    StreamError {
        position: CameraPosition,
        message: String,
    },
}
