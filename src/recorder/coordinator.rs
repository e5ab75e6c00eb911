//! Recording coordinator
//!
//! Drives two independent file writers as one logical recording. The only
//! synchronization between the writers is the completion join: `Stopped`
//! fires exactly once, after both writers finalize, or the whole session
//! fails. A caller never observes one file done while the other is still
//! flushing.

use crate::capture::backend::CameraFormat;
use crate::capture::types::{CameraPosition, FrameSource};
use crate::capture::controller::FrameConsumer;
use crate::recorder::channel::{RecordingChannel, RecordingError, RecordingResult};
use crate::recorder::state::{RecordingOutput, RecordingPhase, RecordingSession, SessionConfig};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Consecutive refused frames on one writer before the session fails
const APPEND_FAILURE_LIMIT: u32 = 3;

/// Events emitted during a recording session
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Countdown tick before a delayed start, seconds remaining
    CountdownTick(u32),
    /// Both writers are running
    Started,
    /// Elapsed recording time, at least once per second, monotonic
    Progress(Duration),
    /// Frame intake suspended
    Paused,
    /// Frame intake resumed
    Resumed,
    /// Both writers finalized; the two paths always arrive together
    Stopped(RecordingOutput),
    /// A writer or the session failed; both outputs are invalid
    Failed(String),
}

struct ActiveSession {
    session: RecordingSession,
    front: Arc<dyn RecordingChannel>,
    back: Arc<dyn RecordingChannel>,
    started: Instant,
    paused_accum: Duration,
    paused_at: Option<Instant>,
    ticker: Option<tokio::task::JoinHandle<()>>,
}

impl ActiveSession {
    fn elapsed(&self) -> Duration {
        let gross = self.started.elapsed();
        let paused = match self.paused_at {
            Some(at) => self.paused_accum + at.elapsed(),
            None => self.paused_accum,
        };
        gross.saturating_sub(paused)
    }
}

struct Inner {
    phase: RwLock<RecordingPhase>,
    active: Mutex<Option<ActiveSession>>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

/// State machine coordinating the two per-camera writers.
pub struct RecordingCoordinator {
    inner: Arc<Inner>,
}

impl RecordingCoordinator {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(Inner {
                phase: RwLock::new(RecordingPhase::Idle),
                active: Mutex::new(None),
                event_tx,
            }),
        }
    }

    pub fn phase(&self) -> RecordingPhase {
        *self.inner.phase.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Elapsed recording time, excluding paused spans. Zero when idle.
    pub fn elapsed(&self) -> Duration {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|a| a.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Start recording through both writers.
    ///
    /// Fails with [`RecordingError::AlreadyRecording`] unless idle. On
    /// success two fresh output files are open, both writers accept frames,
    /// and elapsed-time progress events flow at 2 Hz.
    pub async fn start(
        &self,
        front: Arc<dyn RecordingChannel>,
        back: Arc<dyn RecordingChannel>,
        format: CameraFormat,
        config: SessionConfig,
    ) -> RecordingResult<RecordingSession> {
        self.claim_idle(RecordingPhase::Recording)?;
        self.begin_session(front, back, format, config).await
    }

    /// Start after an n-second countdown, emitting a tick per second.
    /// The countdown passes through `CountingDown`; the dual-writer
    /// contract afterwards is identical to [`start`](Self::start).
    pub async fn start_with_countdown(
        &self,
        seconds: u32,
        front: Arc<dyn RecordingChannel>,
        back: Arc<dyn RecordingChannel>,
        format: CameraFormat,
        config: SessionConfig,
    ) -> RecordingResult<RecordingSession> {
        self.claim_idle(RecordingPhase::CountingDown)?;

        for remaining in (1..=seconds).rev() {
            let _ = self
                .inner
                .event_tx
                .send(RecordingEvent::CountdownTick(remaining));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        *self.inner.phase.write() = RecordingPhase::Recording;
        self.begin_session(front, back, format, config).await
    }

    fn claim_idle(&self, next: RecordingPhase) -> RecordingResult<()> {
        let mut phase = self.inner.phase.write();
        if *phase != RecordingPhase::Idle {
            return Err(RecordingError::AlreadyRecording);
        }
        *phase = next;
        Ok(())
    }

    async fn begin_session(
        &self,
        front: Arc<dyn RecordingChannel>,
        back: Arc<dyn RecordingChannel>,
        format: CameraFormat,
        config: SessionConfig,
    ) -> RecordingResult<RecordingSession> {
        let result = self
            .open_writers(front.clone(), back.clone(), format, &config)
            .await;

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                *self.inner.phase.write() = RecordingPhase::Idle;
                return Err(e);
            }
        };

        let ticker = self.spawn_ticker();
        *self.inner.active.lock() = Some(ActiveSession {
            session: session.clone(),
            front,
            back,
            started: Instant::now(),
            paused_accum: Duration::ZERO,
            paused_at: None,
            ticker: Some(ticker),
        });

        let _ = self.inner.event_tx.send(RecordingEvent::Started);
        tracing::info!(session = %session.id, "recording started");
        Ok(session)
    }

    async fn open_writers(
        &self,
        front: Arc<dyn RecordingChannel>,
        back: Arc<dyn RecordingChannel>,
        format: CameraFormat,
        config: &SessionConfig,
    ) -> RecordingResult<RecordingSession> {
        std::fs::create_dir_all(&config.output_dir)?;

        let session = RecordingSession::new(PathBuf::new(), PathBuf::new());
        let front_path = config
            .output_dir
            .join(format!("recording-{}-front.mp4", session.id));
        let back_path = config
            .output_dir
            .join(format!("recording-{}-back.mp4", session.id));
        let session = RecordingSession {
            front_path: front_path.clone(),
            back_path: back_path.clone(),
            ..session
        };

        front.start(&front_path, format).await?;
        if let Err(e) = back.start(&back_path, format).await {
            // Abort the writer that did start; its partial file is invalid
            let _ = front.finalize().await;
            let _ = std::fs::remove_file(&front_path);
            return Err(e);
        }

        Ok(session)
    }

    fn spawn_ticker(&self) -> tokio::task::JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let elapsed = {
                    let active = inner.active.lock();
                    match active.as_ref() {
                        Some(a) => a.elapsed(),
                        None => break,
                    }
                };
                let _ = inner.event_tx.send(RecordingEvent::Progress(elapsed));
            }
        })
    }

    /// Suspend frame intake on both writers without finalizing.
    pub fn pause(&self) -> RecordingResult<()> {
        {
            let mut phase = self.inner.phase.write();
            if *phase != RecordingPhase::Recording {
                return Err(RecordingError::NotRecording);
            }
            *phase = RecordingPhase::Paused;
        }
        let mut active = self.inner.active.lock();
        if let Some(active) = active.as_mut() {
            active.front.set_paused(true);
            active.back.set_paused(true);
            active.paused_at = Some(Instant::now());
        }
        let _ = self.inner.event_tx.send(RecordingEvent::Paused);
        tracing::info!("recording paused");
        Ok(())
    }

    /// Resume frame intake after a pause.
    pub fn resume(&self) -> RecordingResult<()> {
        {
            let mut phase = self.inner.phase.write();
            if *phase != RecordingPhase::Paused {
                return Err(RecordingError::NotRecording);
            }
            *phase = RecordingPhase::Recording;
        }
        let mut active = self.inner.active.lock();
        if let Some(active) = active.as_mut() {
            if let Some(at) = active.paused_at.take() {
                active.paused_accum += at.elapsed();
            }
            active.front.set_paused(false);
            active.back.set_paused(false);
        }
        let _ = self.inner.event_tx.send(RecordingEvent::Resumed);
        tracing::info!("recording resumed");
        Ok(())
    }

    /// Request both writers finalize.
    ///
    /// Returns immediately after entering `Stopping`; completion arrives as
    /// one `Stopped` event once both writers finish, or one `Failed` event
    /// if either errors. A second call while stopping (or when idle) fails
    /// with [`RecordingError::NotRecording`] and never re-finalizes files.
    pub fn stop(&self) -> RecordingResult<()> {
        {
            let mut phase = self.inner.phase.write();
            if !matches!(
                *phase,
                RecordingPhase::Recording | RecordingPhase::Paused
            ) {
                return Err(RecordingError::NotRecording);
            }
            *phase = RecordingPhase::Stopping;
        }

        let Some(mut active) = self.inner.active.lock().take() else {
            *self.inner.phase.write() = RecordingPhase::Idle;
            return Err(RecordingError::NotRecording);
        };
        if let Some(ticker) = active.ticker.take() {
            ticker.abort();
        }

        let duration = active.elapsed();
        let session = active.session.clone();
        let inner = self.inner.clone();
        let front = active.front.clone();
        let back = active.back.clone();

        tracing::info!(session = %session.id, ?duration, "stopping recording");

        tokio::spawn(async move {
            let outcome = join_finalize(front, back).await;
            *inner.phase.write() = RecordingPhase::Idle;
            match outcome {
                Ok((front_path, back_path)) => {
                    let output = RecordingOutput {
                        session_id: session.id,
                        front_path,
                        back_path,
                        duration,
                    };
                    tracing::info!(session = %session.id, "both writers finished");
                    let _ = inner.event_tx.send(RecordingEvent::Stopped(output));
                }
                Err(e) => {
                    tracing::error!(session = %session.id, error = %e, "recording failed");
                    let _ = inner.event_tx.send(RecordingEvent::Failed(e.to_string()));
                }
            }
        });

        Ok(())
    }

    /// A consumer routing capture frames to the matching writer. Composited
    /// frames are ignored here; raw per-camera recording is what feeds the
    /// offline merge.
    ///
    /// A writer that keeps refusing frames mid-recording has lost its
    /// encoder; after [`APPEND_FAILURE_LIMIT`] consecutive refusals the
    /// session fails rather than silently recording nothing.
    pub fn frame_sink(&self) -> FrameConsumer {
        let inner = self.inner.clone();
        let front_failures = Arc::new(AtomicU32::new(0));
        let back_failures = Arc::new(AtomicU32::new(0));
        Arc::new(move |frame| {
            if *inner.phase.read() != RecordingPhase::Recording {
                return;
            }
            let routed = {
                let active = inner.active.lock();
                active.as_ref().and_then(|a| match frame.source() {
                    FrameSource::Camera(CameraPosition::Front) => {
                        Some((a.front.clone(), front_failures.clone()))
                    }
                    FrameSource::Camera(CameraPosition::Back) => {
                        Some((a.back.clone(), back_failures.clone()))
                    }
                    FrameSource::Composite => None,
                })
            };
            let Some((channel, failures)) = routed else {
                return;
            };
            if channel.append(frame) {
                failures.store(0, Ordering::SeqCst);
            } else if failures.fetch_add(1, Ordering::SeqCst) + 1 >= APPEND_FAILURE_LIMIT {
                fail_session(
                    &inner,
                    format!("writer {} stopped accepting frames", channel.id()),
                );
            }
        })
    }
}

impl Default for RecordingCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Tear down a session whose writer failed while recording. Runs on the
/// capture thread, so nothing here may touch the async executor.
fn fail_session(inner: &Arc<Inner>, message: String) {
    {
        let mut phase = inner.phase.write();
        if !matches!(
            *phase,
            RecordingPhase::Recording | RecordingPhase::Paused
        ) {
            return;
        }
        *phase = RecordingPhase::Idle;
    }
    if let Some(mut active) = inner.active.lock().take() {
        if let Some(ticker) = active.ticker.take() {
            ticker.abort();
        }
        tracing::error!(session = %active.session.id, %message, "recording failed");
    }
    let _ = inner.event_tx.send(RecordingEvent::Failed(message));
}

/// Wait for both finalizations. The first error wins and the other writer
/// is abandoned rather than awaited, so a hung or failed partner can never
/// leave the coordinator stuck.
async fn join_finalize(
    front: Arc<dyn RecordingChannel>,
    back: Arc<dyn RecordingChannel>,
) -> RecordingResult<(PathBuf, PathBuf)> {
    let mut front_task = tokio::spawn(async move { front.finalize().await });
    let mut back_task = tokio::spawn(async move { back.finalize().await });

    let mut front_path: Option<PathBuf> = None;
    let mut back_path: Option<PathBuf> = None;

    while front_path.is_none() || back_path.is_none() {
        tokio::select! {
            result = &mut front_task, if front_path.is_none() => {
                match flatten(result) {
                    Ok(path) => front_path = Some(path),
                    Err(e) => {
                        back_task.abort();
                        return Err(e);
                    }
                }
            }
            result = &mut back_task, if back_path.is_none() => {
                match flatten(result) {
                    Ok(path) => back_path = Some(path),
                    Err(e) => {
                        front_task.abort();
                        return Err(e);
                    }
                }
            }
        }
    }

    match (front_path, back_path) {
        (Some(front), Some(back)) => Ok((front, back)),
        _ => Err(RecordingError::WriterFailed(
            "writer finished without an output path".into(),
        )),
    }
}

fn flatten(
    result: Result<RecordingResult<PathBuf>, tokio::task::JoinError>,
) -> RecordingResult<PathBuf> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(RecordingError::WriterFailed(format!(
            "writer task panicked: {e}"
        ))),
    }
}
