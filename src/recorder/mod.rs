//! Dual-writer recording
//!
//! The coordinator owns the session state machine; each camera records
//! through its own [`RecordingChannel`], and the two completions are joined
//! so callers always see both finished files together or a single failure.

pub mod channel;
pub mod coordinator;
pub mod state;
pub mod writer;

pub use channel::{RecordingChannel, RecordingError, RecordingResult};
pub use coordinator::{RecordingCoordinator, RecordingEvent};
pub use state::{RecordingOutput, RecordingPhase, RecordingSession, SessionConfig};
pub use writer::{ffmpeg_available, FfmpegWriter};
