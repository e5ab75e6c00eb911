//! End-to-end pipeline test over the synthetic backend: configure a dual
//! session, stream both cameras, composite live, route frames into a
//! recording session, and observe the joined completion.

use async_trait::async_trait;
use dualcam::capture::{
    CameraFormat, CameraPosition, CapturePolicy, CaptureSessionController, FrameBuffer,
    FrameSource, QualityTier, SessionFault, SyntheticBackend,
};
use dualcam::compose::{CompositionLayout, FrameCompositor, RenderSize};
use dualcam::recorder::{
    RecordingChannel, RecordingCoordinator, RecordingEvent, RecordingResult, SessionConfig,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingChannel {
    id: String,
    frames: AtomicU64,
    path: Mutex<Option<PathBuf>>,
}

impl CountingChannel {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            frames: AtomicU64::new(0),
            path: Mutex::new(None),
        })
    }
}

#[async_trait]
impl RecordingChannel for CountingChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self, output: &Path, _format: CameraFormat) -> RecordingResult<()> {
        *self.path.lock() = Some(output.to_path_buf());
        Ok(())
    }

    fn append(&self, _frame: &FrameBuffer) -> bool {
        self.frames.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn set_paused(&self, _paused: bool) {}

    async fn finalize(&self) -> RecordingResult<PathBuf> {
        Ok(self.path.lock().clone().unwrap())
    }

    fn frames_written(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

fn configured_controller() -> CaptureSessionController {
    let controller = CaptureSessionController::new(Arc::new(SyntheticBackend::new()));
    let devices = controller.devices();
    controller
        .configure(
            &devices[0],
            &devices[1],
            CapturePolicy {
                quality: QualityTier::Low,
                frame_rate_cap: Some(24),
            },
        )
        .unwrap();
    controller
}

#[tokio::test(flavor = "multi_thread")]
async fn dual_streams_feed_live_composition() {
    let controller = configured_controller();
    let format = controller.session_format().unwrap();

    let latest: Arc<Mutex<(Option<FrameBuffer>, Option<FrameBuffer>)>> =
        Arc::new(Mutex::new((None, None)));
    let composited = Arc::new(AtomicU64::new(0));

    let compositor = Arc::new(FrameCompositor::new());
    let render_size = RenderSize {
        width: format.width,
        height: format.height,
    };

    {
        let latest = latest.clone();
        let composited = composited.clone();
        let compositor = compositor.clone();
        controller.add_consumer(Arc::new(move |frame| {
            let mut pair = latest.lock();
            match frame.source() {
                FrameSource::Camera(CameraPosition::Front) => pair.0 = Some(frame.clone()),
                FrameSource::Camera(CameraPosition::Back) => pair.1 = Some(frame.clone()),
                FrameSource::Composite => return,
            }
            if let (Some(front), Some(back)) = (&pair.0, &pair.1) {
                if compositor
                    .composite(front, back, &CompositionLayout::SideBySide, render_size)
                    .is_ok()
                {
                    composited.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));
    }

    controller.start_streaming().unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    controller.stop_streaming();

    let pair = latest.lock();
    let front = pair.0.as_ref().expect("no front frames");
    let back = pair.1.as_ref().expect("no back frames");
    assert_eq!(front.width(), format.width);
    assert_eq!(back.height(), format.height);
    assert!(composited.load(Ordering::SeqCst) > 0, "nothing composited");
}

#[tokio::test(flavor = "multi_thread")]
async fn capture_to_recording_session_produces_both_files() {
    let dir = tempfile::tempdir().unwrap();
    let controller = configured_controller();
    let format = controller.session_format().unwrap();

    let coordinator = Arc::new(RecordingCoordinator::new());
    let mut events = coordinator.subscribe();
    controller.add_consumer(coordinator.frame_sink());

    let front = CountingChannel::new("front");
    let back = CountingChannel::new("back");
    coordinator
        .start(
            front.clone(),
            back.clone(),
            format,
            SessionConfig {
                output_dir: dir.path().to_path_buf(),
            },
        )
        .await
        .unwrap();

    controller.start_streaming().unwrap();

    // At least one progress report lands within the first tick and a half
    let mut saw_progress = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(RecordingEvent::Progress(_))) => {
                saw_progress = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    assert!(saw_progress, "no progress event while recording");

    tokio::time::sleep(Duration::from_millis(200)).await;
    controller.stop_streaming();
    coordinator.stop().unwrap();

    let stopped = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no terminal event")
            .unwrap();
        match event {
            RecordingEvent::Stopped(output) => break output,
            RecordingEvent::Failed(message) => panic!("recording failed: {message}"),
            _ => continue,
        }
    };

    assert_ne!(stopped.front_path, stopped.back_path);
    assert!(front.frames_written() > 0, "front writer got no frames");
    assert!(back.frames_written() > 0, "back writer got no frames");
}

#[tokio::test(flavor = "multi_thread")]
async fn device_loss_is_terminal_and_reported() -> anyhow::Result<()> {
    let backend = Arc::new(SyntheticBackend::new());
    let controller = CaptureSessionController::new(backend.clone());
    let devices = controller.devices();
    controller.configure(
        &devices[0],
        &devices[1],
        CapturePolicy {
            quality: QualityTier::Low,
            frame_rate_cap: Some(24),
        },
    )?;

    let mut faults = controller.subscribe_faults();
    controller.start_streaming()?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    backend.unplug();
    let fault = tokio::time::timeout(Duration::from_secs(2), faults.recv()).await??;
    assert!(matches!(fault, SessionFault::DeviceDisconnected(_)));

    // The fault stops the session; no retry happens here
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!controller.is_streaming());
    controller.stop_streaming();
    Ok(())
}
