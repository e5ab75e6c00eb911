//! Dual-camera session controller
//!
//! Owns the two physical camera connections, validates and applies control
//! requests, and pushes per-device frame buffers to registered consumers.
//! One capture thread per device; the device's own frame cadence paces the
//! tick. Device faults are terminal; no retry happens here.

use crate::capture::backend::{CameraFormat, CameraStream, CaptureBackend, DeviceCapabilities, DeviceInfo, StreamError};
use crate::capture::types::{
    CameraPosition, CapturePolicy, ControlError, ExposureControl, FocusControl, FrameBuffer,
    FrameSource, PixelFormat, SessionFault, SetupError,
};
use crate::compose::pool::BufferPool;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use tokio::sync::broadcast;

/// Consumer callback invoked once per device per capture tick
pub type FrameConsumer = Arc<dyn Fn(&FrameBuffer) + Send + Sync>;

/// Current control state of one sensor
#[derive(Debug, Clone, Copy)]
pub struct CameraEndpoint {
    pub position: CameraPosition,
    pub zoom: f32,
    pub focus: FocusControl,
    pub exposure: ExposureControl,
    pub format: CameraFormat,
}

enum ControlCommand {
    Zoom(f32),
    Focus(FocusControl),
    Exposure(ExposureControl),
}

struct DeviceSlot {
    position: CameraPosition,
    info: DeviceInfo,
    capabilities: DeviceCapabilities,
    /// Exclusive per-device configuration lock; control calls serialize here
    endpoint: Mutex<CameraEndpoint>,
    /// Parked stream while not running; the capture thread owns it otherwise
    stream: Mutex<Option<Box<dyn CameraStream>>>,
    /// Command channel into the capture thread while running
    control_tx: Mutex<Option<mpsc::Sender<ControlCommand>>>,
}

impl DeviceSlot {
    /// While streaming, the capture thread picks commands up between ticks
    /// so controls never block the tick; otherwise apply to the parked
    /// stream directly.
    fn send_or_apply(&self, command: ControlCommand) {
        if let Some(tx) = self.control_tx.lock().as_ref() {
            let _ = tx.send(command);
            return;
        }
        if let Some(stream) = self.stream.lock().as_mut() {
            match command {
                ControlCommand::Zoom(factor) => stream.apply_zoom(factor),
                ControlCommand::Focus(focus) => stream.apply_focus(focus),
                ControlCommand::Exposure(exposure) => stream.apply_exposure(exposure),
            }
        }
    }
}

struct ConfiguredPair {
    front: Arc<DeviceSlot>,
    back: Arc<DeviceSlot>,
    format: CameraFormat,
}

impl ConfiguredPair {
    fn slot(&self, position: CameraPosition) -> &Arc<DeviceSlot> {
        match position {
            CameraPosition::Front => &self.front,
            CameraPosition::Back => &self.back,
        }
    }
}

/// Controller for one synchronized dual-camera session.
pub struct CaptureSessionController {
    backend: Arc<dyn CaptureBackend>,
    pair: RwLock<Option<Arc<ConfiguredPair>>>,
    consumers: Arc<RwLock<Vec<FrameConsumer>>>,
    fault_tx: broadcast::Sender<SessionFault>,
    pool: Arc<BufferPool>,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl CaptureSessionController {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        let (fault_tx, _) = broadcast::channel(16);
        Self {
            backend,
            pair: RwLock::new(None),
            consumers: Arc::new(RwLock::new(Vec::new())),
            fault_tx,
            pool: Arc::new(BufferPool::default()),
            running: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Bind the two devices into one synchronized session.
    ///
    /// Validates simultaneous-capture support and that both devices handle
    /// the policy's resolution/frame-rate before opening anything. A running
    /// session is stopped first; the policy is re-read on every call.
    pub fn configure(
        &self,
        front: &DeviceInfo,
        back: &DeviceInfo,
        policy: CapturePolicy,
    ) -> Result<(), SetupError> {
        self.stop_streaming();

        if !self.backend.supports_simultaneous(front, back) {
            return Err(SetupError::UnsupportedCombination);
        }

        let (width, height) = policy.quality.resolution();
        let format = CameraFormat {
            width,
            height,
            frame_rate: policy.effective_frame_rate(),
        };
        for device in [front, back] {
            if !device.supports(&format) {
                return Err(SetupError::UnsupportedFormat(device.id.clone()));
            }
        }

        let front_slot = self.open_slot(CameraPosition::Front, front, format)?;
        let back_slot = self.open_slot(CameraPosition::Back, back, format)?;

        tracing::info!(
            front = %front.name,
            back = %back.name,
            width,
            height,
            fps = format.frame_rate,
            "dual-camera session configured"
        );

        *self.pair.write() = Some(Arc::new(ConfiguredPair {
            front: front_slot,
            back: back_slot,
            format,
        }));
        Ok(())
    }

    fn open_slot(
        &self,
        position: CameraPosition,
        info: &DeviceInfo,
        format: CameraFormat,
    ) -> Result<Arc<DeviceSlot>, SetupError> {
        let stream = self
            .backend
            .open(info, format)
            .map_err(|e| match e {
                SetupError::BackendFailure(msg) => SetupError::DeviceUnavailable(msg),
                other => other,
            })?;
        let capabilities = stream.capabilities();
        let negotiated = stream.format();

        Ok(Arc::new(DeviceSlot {
            position,
            info: info.clone(),
            capabilities,
            endpoint: Mutex::new(CameraEndpoint {
                position,
                zoom: 1.0,
                focus: FocusControl::Auto,
                exposure: ExposureControl::Auto,
                format: negotiated,
            }),
            stream: Mutex::new(Some(stream)),
            control_tx: Mutex::new(None),
        }))
    }

    /// Register a per-tick frame consumer (compositor, raw writers, preview).
    pub fn add_consumer(&self, consumer: FrameConsumer) {
        self.consumers.write().push(consumer);
    }

    /// Subscribe to terminal session faults.
    pub fn subscribe_faults(&self) -> broadcast::Receiver<SessionFault> {
        self.fault_tx.subscribe()
    }

    /// Snapshot of one device's current control state.
    pub fn endpoint(&self, position: CameraPosition) -> Option<CameraEndpoint> {
        let pair = self.pair.read();
        pair.as_ref().map(|p| *p.slot(position).endpoint.lock())
    }

    /// The device bound to the given position, if configured.
    pub fn device_info(&self, position: CameraPosition) -> Option<DeviceInfo> {
        let pair = self.pair.read();
        pair.as_ref().map(|p| p.slot(position).info.clone())
    }

    /// The format the session was configured for.
    pub fn session_format(&self) -> Option<CameraFormat> {
        self.pair.read().as_ref().map(|p| p.format)
    }

    /// Set zoom for one device. Zoom is a continuous control: values are
    /// clamped into the device range and the applied factor is returned.
    pub fn set_zoom(&self, position: CameraPosition, factor: f32) -> Result<f32, ControlError> {
        self.with_slot(position, |slot| {
            let caps = slot.capabilities;
            let clamped = factor.clamp(caps.min_zoom, caps.max_zoom);
            let mut endpoint = slot.endpoint.lock();
            endpoint.zoom = clamped;
            slot.send_or_apply(ControlCommand::Zoom(clamped));
            Ok(clamped)
        })
    }

    /// Set focus for one device. A focus point outside the unit square is a
    /// caller bug and fails rather than clamping.
    pub fn set_focus(&self, position: CameraPosition, focus: FocusControl) -> Result<(), ControlError> {
        if let FocusControl::Point { x, y } = focus {
            if !(0.0..=1.0).contains(&x) {
                return Err(ControlError::OutOfRange {
                    control: "focus point x",
                    requested: x,
                    min: 0.0,
                    max: 1.0,
                });
            }
            if !(0.0..=1.0).contains(&y) {
                return Err(ControlError::OutOfRange {
                    control: "focus point y",
                    requested: y,
                    min: 0.0,
                    max: 1.0,
                });
            }
        }

        self.with_slot(position, |slot| {
            let mut endpoint = slot.endpoint.lock();
            endpoint.focus = focus;
            slot.send_or_apply(ControlCommand::Focus(focus));
            Ok(())
        })
    }

    /// Set exposure for one device. Bias outside the device-reported range
    /// fails with the bounds attached.
    pub fn set_exposure(
        &self,
        position: CameraPosition,
        exposure: ExposureControl,
    ) -> Result<(), ControlError> {
        self.with_slot(position, |slot| {
            if let ExposureControl::Bias { ev } = exposure {
                let caps = slot.capabilities;
                if ev < caps.min_exposure_bias || ev > caps.max_exposure_bias {
                    return Err(ControlError::OutOfRange {
                        control: "exposure bias",
                        requested: ev,
                        min: caps.min_exposure_bias,
                        max: caps.max_exposure_bias,
                    });
                }
            }
            let mut endpoint = slot.endpoint.lock();
            endpoint.exposure = exposure;
            slot.send_or_apply(ControlCommand::Exposure(exposure));
            Ok(())
        })
    }

    fn with_slot<T>(
        &self,
        position: CameraPosition,
        f: impl FnOnce(&DeviceSlot) -> Result<T, ControlError>,
    ) -> Result<T, ControlError> {
        let pair = self.pair.read();
        let pair = pair.as_ref().ok_or(ControlError::NotConfigured)?;
        f(pair.slot(position))
    }

    /// Start both capture threads. A no-op when already streaming.
    pub fn start_streaming(&self) -> Result<(), SetupError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let pair = match self.pair.read().clone() {
            Some(p) => p,
            None => {
                self.running.store(false, Ordering::SeqCst);
                return Err(SetupError::NotConfigured);
            }
        };

        let mut threads = self.threads.lock();
        for slot in [pair.front.clone(), pair.back.clone()] {
            let Some(stream) = slot.stream.lock().take() else {
                self.running.store(false, Ordering::SeqCst);
                return Err(SetupError::DeviceUnavailable(format!(
                    "{:?} stream missing",
                    slot.position
                )));
            };
            let (tx, rx) = mpsc::channel();
            *slot.control_tx.lock() = Some(tx);

            // The negotiated format can differ from the requested one; frame
            // buffers follow what the device actually delivers
            let negotiated = stream.format();
            let handle = self.spawn_capture_thread(slot, stream, rx, negotiated);
            threads.push(handle);
        }

        tracing::info!("dual-camera streaming started");
        Ok(())
    }

    fn spawn_capture_thread(
        &self,
        slot: Arc<DeviceSlot>,
        mut stream: Box<dyn CameraStream>,
        control_rx: mpsc::Receiver<ControlCommand>,
        format: CameraFormat,
    ) -> JoinHandle<()> {
        let running = self.running.clone();
        let consumers = self.consumers.clone();
        let fault_tx = self.fault_tx.clone();
        let pool = self.pool.clone();
        let position = slot.position;

        std::thread::spawn(move || {
            // Carry over control state set before streaming started
            {
                let endpoint = slot.endpoint.lock();
                stream.apply_zoom(endpoint.zoom);
                stream.apply_focus(endpoint.focus);
                stream.apply_exposure(endpoint.exposure);
            }

            let mut frames: u64 = 0;
            let mut dropped: u64 = 0;
            let started = std::time::Instant::now();

            while running.load(Ordering::SeqCst) {
                while let Ok(command) = control_rx.try_recv() {
                    match command {
                        ControlCommand::Zoom(factor) => stream.apply_zoom(factor),
                        ControlCommand::Focus(focus) => stream.apply_focus(focus),
                        ControlCommand::Exposure(exposure) => stream.apply_exposure(exposure),
                    }
                }

                let Some(mut buffer) = pool.acquire(format.width, format.height, PixelFormat::Rgba8)
                else {
                    // Keep the device paced even when every consumer is behind
                    dropped += 1;
                    if dropped == 1 {
                        tracing::warn!(?position, "capture buffer pool exhausted, dropping frames");
                    }
                    std::thread::sleep(std::time::Duration::from_millis(
                        1000 / format.frame_rate.max(1) as u64,
                    ));
                    continue;
                };

                match stream.read_into(&mut buffer) {
                    Ok(pts) => {
                        let frame = FrameBuffer::from_pooled(
                            buffer,
                            format.width,
                            format.height,
                            PixelFormat::Rgba8,
                            pts,
                            FrameSource::Camera(position),
                        );
                        frames += 1;
                        for consumer in consumers.read().iter() {
                            consumer(&frame);
                        }
                    }
                    Err(StreamError::Disconnected) => {
                        tracing::error!(?position, "camera disconnected");
                        let _ = fault_tx.send(SessionFault::DeviceDisconnected(position));
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                    Err(StreamError::Failed(message)) => {
                        tracing::error!(?position, %message, "camera stream failed");
                        let _ = fault_tx.send(SessionFault::StreamError { position, message });
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }

            let elapsed = started.elapsed().as_secs_f64();
            tracing::info!(
                ?position,
                frames,
                dropped,
                fps = format_args!("{:.1}", frames as f64 / elapsed.max(0.001)),
                "capture thread stopped"
            );

            *slot.control_tx.lock() = None;
            *slot.stream.lock() = Some(stream);
        })
    }

    /// Stop both capture threads and park the streams. Idempotent.
    pub fn stop_streaming(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            // Threads may already be winding down after a fault; still join them
        }
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }

    /// Whether capture threads are currently running
    pub fn is_streaming(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drop idle capture buffers on an external memory-pressure signal.
    pub fn release_pooled_buffers(&self) {
        self.pool.clear();
    }

    /// Devices reported by the underlying backend
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.backend.devices()
    }
}

impl Drop for CaptureSessionController {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}
