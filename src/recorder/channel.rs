//! Recording channel trait
//!
//! One channel encodes one camera's frames to one output file. Channels run
//! independently; the coordinator joins their completions. Methods take
//! `&self` so a channel can be shared between the coordinator and the
//! capture path feeding it frames.

use crate::capture::backend::CameraFormat;
use crate::capture::types::FrameBuffer;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Recording state-machine and writer failures
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    #[error("writer failed: {0}")]
    WriterFailed(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecordingResult<T> = Result<T, RecordingError>;

/// An independent asynchronous writer encoding one camera's frames to one
/// output file.
#[async_trait]
pub trait RecordingChannel: Send + Sync {
    /// Channel identifier for logs
    fn id(&self) -> &str;

    /// Open the output file and begin accepting frames.
    async fn start(&self, output: &Path, format: CameraFormat) -> RecordingResult<()>;

    /// Feed one frame. Returns false when the frame was not accepted
    /// (paused, not started, or writer already gone). Repeated refusals
    /// while the session is recording are treated as a writer failure by
    /// the coordinator. Never blocks the capture tick on encoder
    /// backpressure beyond the pipe write.
    fn append(&self, frame: &FrameBuffer) -> bool;

    /// Suspend or resume frame intake without finalizing the file.
    fn set_paused(&self, paused: bool);

    /// Close the output and wait for the encoder to finish. Resolves with
    /// the finalized file path; errors fail the whole recording session.
    async fn finalize(&self) -> RecordingResult<PathBuf>;

    /// Frames accepted so far
    fn frames_written(&self) -> u64;
}
