//! Recording state machine types
//!
//! Phase enum, per-session bookkeeping, and the config/result structs an
//! embedding shell exchanges with the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Current phase of the recording system.
///
/// `CountingDown` and `Paused` are pass-through phases; the dual-writer
/// contract (both files finalize together or the session fails) is the same
/// regardless of how the session entered `Recording`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingPhase {
    Idle,
    CountingDown,
    Recording,
    Paused,
    Stopping,
}

impl Default for RecordingPhase {
    fn default() -> Self {
        Self::Idle
    }
}

/// One logical recording operation across both writers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    /// Unique session ID
    pub id: Uuid,

    /// Output file for the front camera writer
    pub front_path: PathBuf,

    /// Output file for the back camera writer
    pub back_path: PathBuf,

    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
}

impl RecordingSession {
    pub fn new(front_path: PathBuf, back_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            front_path,
            back_path,
            started_at: Utc::now(),
        }
    }
}

/// Configuration for starting a recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Directory the two per-camera files are written into
    pub output_dir: PathBuf,
}

/// Result of a completed recording, reported only after both writers finish
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutput {
    /// Session the output belongs to
    pub session_id: Uuid,

    /// Finalized front camera file
    pub front_path: PathBuf,

    /// Finalized back camera file
    pub back_path: PathBuf,

    /// Recorded duration, excluding paused spans
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_get_distinct_ids() {
        let a = RecordingSession::new("a-front.mp4".into(), "a-back.mp4".into());
        let b = RecordingSession::new("b-front.mp4".into(), "b-back.mp4".into());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn output_serializes_camel_case() {
        let output = RecordingOutput {
            session_id: Uuid::nil(),
            front_path: "front.mp4".into(),
            back_path: "back.mp4".into(),
            duration: Duration::from_secs(5),
        };
        let json = serde_json::to_string(&output).unwrap();
        assert!(json.contains("frontPath"));
        assert!(json.contains("sessionId"));
    }
}
