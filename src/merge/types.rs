//! Merge types and configuration
//!
//! Request, quality, progress, and error types for the offline merge of a
//! finished dual-camera recording into one composited file.

use crate::compose::layout::{CompositionLayout, RenderSize};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Merge quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeQuality {
    Low,
    Medium,
    High,
    Highest,
}

impl MergeQuality {
    /// CRF value for H.264 encoding. Lower is higher quality.
    pub fn crf(&self) -> u8 {
        match self {
            MergeQuality::Low => 28,
            MergeQuality::Medium => 23,
            MergeQuality::High => 18,
            // CRF 1 is visually lossless; CRF 0 breaks yuv420p
            MergeQuality::Highest => 1,
        }
    }

    /// FFmpeg preset for H.264 encoding
    pub fn h264_preset(&self) -> &'static str {
        match self {
            MergeQuality::Low => "faster",
            MergeQuality::Medium => "medium",
            MergeQuality::High => "slow",
            MergeQuality::Highest => "veryslow",
        }
    }
}

/// One merge job: two finished per-camera recordings in, one file out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    /// Finished front camera recording
    pub front_path: PathBuf,

    /// Finished back camera recording
    pub back_path: PathBuf,

    /// How the two streams are arranged in the output
    pub layout: CompositionLayout,

    /// Output frame dimensions
    pub render_size: RenderSize,

    /// Encoder quality
    pub quality: MergeQuality,
}

/// Merge progress stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum MergeStage {
    /// Probing inputs and starting the encoder
    Preparing,
    /// Compositing and encoding frames
    Compositing,
    /// Waiting for the encoder to flush and moving into the store
    Finalizing,
    /// Merge finished; the output is saved
    Complete,
    /// Merge failed; inputs are untouched
    Failed { message: String },
    /// Merge cancelled by the caller; inputs are untouched
    Cancelled,
}

/// Merge progress information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeProgress {
    /// Fraction complete, 0.0 to 1.0
    pub fraction: f32,
    /// Current stage
    pub stage: MergeStage,
    /// Frames composited so far
    pub current_frame: u64,
    /// Total frames in the output
    pub total_frames: u64,
}

impl MergeProgress {
    pub fn preparing() -> Self {
        Self {
            fraction: 0.0,
            stage: MergeStage::Preparing,
            current_frame: 0,
            total_frames: 0,
        }
    }

    pub fn compositing(current_frame: u64, total_frames: u64) -> Self {
        let fraction = if total_frames > 0 {
            0.05 + (current_frame as f32 / total_frames as f32) * 0.9
        } else {
            0.05
        };
        Self {
            fraction,
            stage: MergeStage::Compositing,
            current_frame,
            total_frames,
        }
    }

    pub fn finalizing(total_frames: u64) -> Self {
        Self {
            fraction: 0.95,
            stage: MergeStage::Finalizing,
            current_frame: total_frames,
            total_frames,
        }
    }

    pub fn complete(total_frames: u64) -> Self {
        Self {
            fraction: 1.0,
            stage: MergeStage::Complete,
            current_frame: total_frames,
            total_frames,
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            fraction: 0.0,
            stage: MergeStage::Failed { message },
            current_frame: 0,
            total_frames: 0,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            fraction: 0.0,
            stage: MergeStage::Cancelled,
            current_frame: 0,
            total_frames: 0,
        }
    }
}

/// Merge errors, grouped by the phase that produced them
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("failed to load track: {0}")]
    TrackLoadFailed(String),

    #[error("composition failed: {0}")]
    CompositionFailed(String),

    #[error("export failed: {0}")]
    ExportFailed(String),

    #[error("failed to save output: {0}")]
    SaveFailed(String),

    #[error("merge cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_maps_to_crf_and_preset() {
        assert_eq!(MergeQuality::High.crf(), 18);
        assert_eq!(MergeQuality::Highest.h264_preset(), "veryslow");
        assert!(MergeQuality::Low.crf() > MergeQuality::Medium.crf());
    }

    #[test]
    fn progress_fraction_stays_in_unit_range() {
        for frame in [0, 50, 100] {
            let p = MergeProgress::compositing(frame, 100);
            assert!((0.0..=1.0).contains(&p.fraction));
        }
        assert_eq!(MergeProgress::complete(100).fraction, 1.0);
    }

    #[test]
    fn request_serializes_camel_case() {
        let request = MergeRequest {
            front_path: "front.mp4".into(),
            back_path: "back.mp4".into(),
            layout: CompositionLayout::SideBySide,
            render_size: RenderSize {
                width: 1280,
                height: 720,
            },
            quality: MergeQuality::High,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("frontPath"));
        assert!(json.contains("renderSize"));
    }
}
