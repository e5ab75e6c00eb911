//! dualcam - dual-camera capture, recording, and merge engine.
//!
//! Streams two cameras at once, records each through its own writer with a
//! joined completion, composites the pair live for preview, and merges a
//! finished recording offline into one file.

pub mod capture;
pub mod compose;
pub mod merge;
pub mod recorder;

pub use capture::{CaptureSessionController, NokhwaBackend, SyntheticBackend};
pub use compose::{CompositionLayout, FrameCompositor};
pub use merge::OfflineVideoMerger;
pub use recorder::RecordingCoordinator;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for binaries and integration tests.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dualcam=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
