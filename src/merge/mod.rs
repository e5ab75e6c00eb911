//! Offline merge of finished dual-camera recordings
//!
//! Decodes both per-camera files, composites them frame by frame with the
//! same layout engine the live path uses, and encodes one output with the
//! front recording's audio. Cancellable, progress-reporting, and safe for
//! the inputs: they are never modified or removed.

pub mod ffmpeg;
pub mod merger;
pub mod store;
pub mod types;

pub use ffmpeg::{probe_media, MediaInfo};
pub use merger::OfflineVideoMerger;
pub use store::{DirectoryStore, MediaStore};
pub use types::{MergeError, MergeProgress, MergeQuality, MergeRequest, MergeStage};
