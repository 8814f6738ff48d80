//! The public camera facade.
//!
//! A [`CameraSession`] selects a backend, hands it to a dedicated production
//! thread and exposes the latest encoded frame to any number of reader
//! threads. Only the production thread ever touches the backend handle;
//! photo requests that need the hardware are sent to it over a channel.

pub mod types;
mod worker;

pub use types::{PhotoSource, SessionState, SessionStats, SessionTiming, StopOutcome};

use crate::backend::{backends_from_ids, Backend, BackendDescriptor};
use crate::config::StreamConfig;
use crate::encode::{FrameEncoder, JpegFrameEncoder};
use crate::errors::CameraError;
use crate::reconnect::ReconnectSupervisor;
use crate::selection::select_and_open;
use crate::types::{CaptureConfig, NegotiatedMode};
use bytes::Bytes;
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use types::StatsCounters;
use worker::{ProductionLoop, RunShared, WorkerRequest};

struct Worker {
    join: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    config: CaptureConfig,
}

/// What consumer threads need to reach a running production thread.
#[derive(Clone)]
struct RunLink {
    shared: Arc<RunShared>,
    requests: Sender<WorkerRequest>,
}

impl RunLink {
    /// `None` if the still did not finish within `timeout`. It may still be
    /// running and write `path` later.
    fn request_still(&self, path: &Path, timeout: Duration) -> Option<Result<(), CameraError>> {
        let (reply, response) = crossbeam_channel::bounded(1);
        let request = WorkerRequest::Still {
            path: path.to_path_buf(),
            reply,
        };
        if self.requests.send(request).is_err() {
            return Some(Err(session_stopped()));
        }
        wait_reply(response, timeout)
    }

    fn request_frame(&self, timeout: Duration) -> Result<Bytes, CameraError> {
        let (reply, response) = crossbeam_channel::bounded(1);
        self.requests
            .send(WorkerRequest::Frame { reply })
            .map_err(|_| session_stopped())?;
        wait_reply(response, timeout).unwrap_or_else(|| Err(worker_busy(timeout)))
    }
}

fn session_stopped() -> CameraError {
    CameraError::CaptureUnavailable("session stopped".to_string())
}

fn worker_busy(timeout: Duration) -> CameraError {
    CameraError::CaptureUnavailable(format!(
        "production thread busy for more than {:?}",
        timeout
    ))
}

/// `None` on timeout.
fn wait_reply<T>(
    response: crossbeam_channel::Receiver<Result<T, CameraError>>,
    timeout: Duration,
) -> Option<Result<T, CameraError>> {
    match response.recv_timeout(timeout) {
        Ok(result) => Some(result),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(Err(session_stopped())),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Poll a thread for completion until `timeout`; hands the handle back if it
/// is still running.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> Result<(), JoinHandle<()>> {
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            if handle.join().is_err() {
                log::error!("Production thread panicked");
            }
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(handle);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

pub struct CameraSession {
    backends: Arc<[Arc<dyn Backend>]>,
    timing: SessionTiming,
    encoder: Arc<dyn FrameEncoder>,
    stats: Arc<StatsCounters>,
    /// Serialises open/stop.
    lifecycle: Mutex<Option<Worker>>,
    /// State reported while no production thread is running.
    status: Mutex<SessionState>,
    current: Mutex<Option<RunLink>>,
}

impl CameraSession {
    /// A session over `backends`, tried in ascending priority order.
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self {
            backends: backends.into(),
            timing: SessionTiming::default(),
            encoder: Arc::new(JpegFrameEncoder::default()),
            stats: Arc::new(StatsCounters::default()),
            lifecycle: Mutex::new(None),
            status: Mutex::new(SessionState::Empty),
            current: Mutex::new(None),
        }
    }

    /// Backends, timing and JPEG quality taken from a loaded config file.
    pub fn from_config(config: &StreamConfig) -> Self {
        let backends = backends_from_ids(&config.backends.enabled, config.camera.device_index);
        Self::new(backends)
            .with_timing(config.session_timing())
            .with_encoder(Arc::new(JpegFrameEncoder::new(config.stream.jpeg_quality)))
    }

    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn FrameEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn timing(&self) -> &SessionTiming {
        &self.timing
    }

    pub fn backends(&self) -> Vec<BackendDescriptor> {
        self.backends.iter().map(|b| b.descriptor()).collect()
    }

    fn link(&self) -> Option<RunLink> {
        lock(&self.current).clone()
    }

    fn set_status(&self, state: SessionState) {
        *lock(&self.status) = state;
    }

    /// Select a backend and start streaming. A no-op if already open.
    pub fn open(&self, config: CaptureConfig) -> Result<SessionState, CameraError> {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.is_some() {
            log::debug!("Session already open");
            return Ok(self.state());
        }

        self.set_status(SessionState::Opening);
        let active = match select_and_open(&self.backends, &config) {
            Ok(active) => active,
            Err(e) => {
                log::error!("Failed to open camera: {}", e);
                self.set_status(SessionState::Empty);
                return Err(e);
            }
        };

        let shared = Arc::new(RunShared::new(active));
        let stop = Arc::new(AtomicBool::new(false));
        let (requests, inbox) = crossbeam_channel::unbounded();
        let supervisor = ReconnectSupervisor::new(
            self.backends.clone(),
            config.clone(),
            self.timing.reconnect_delay,
            stop.clone(),
        );
        let production = ProductionLoop::new(
            shared.clone(),
            self.stats.clone(),
            stop.clone(),
            inbox,
            self.encoder.clone(),
            supervisor,
            self.timing.clone(),
        );

        let join = match std::thread::Builder::new()
            .name("picamstream-production".to_string())
            .spawn(move || production.run())
        {
            Ok(join) => join,
            Err(e) => {
                shared.force_close();
                self.set_status(SessionState::Empty);
                return Err(CameraError::InitializationError(format!(
                    "Failed to spawn production thread: {}",
                    e
                )));
            }
        };

        *lock(&self.current) = Some(RunLink { shared, requests });
        *lifecycle = Some(Worker { join, stop, config });
        self.set_status(SessionState::Streaming);
        Ok(SessionState::Streaming)
    }

    /// Latest encoded frame, or `None` if nothing has been captured yet.
    /// Never waits on the production thread.
    pub fn get_frame(&self) -> Option<Bytes> {
        self.link().and_then(|link| link.shared.frames.latest())
    }

    /// Sequence number of the latest frame (0 before the first one).
    pub fn frame_sequence(&self) -> u64 {
        self.link()
            .map(|link| link.shared.frames.sequence())
            .unwrap_or(0)
    }

    /// Block until a frame newer than `after` is published.
    pub fn wait_for_frame(&self, after: u64, timeout: Duration) -> Option<(u64, Bytes)> {
        self.link()
            .and_then(|link| link.shared.frames.wait_newer(after, timeout))
    }

    /// Write a photo to `path`.
    ///
    /// Uses the backend's still mode when it has one. Otherwise, or when the
    /// still capture fails, writes the latest buffered frame, or asks the
    /// production thread for one fresh frame if nothing is buffered yet. A
    /// still that outlives the capture timeout is not replaced by a fallback
    /// write, since it may still land on `path`; the call fails with a
    /// retryable `CaptureUnavailable` instead.
    /// Requests made during a reconnect wait for it (up to the capture
    /// timeout) and fail with a retryable `CaptureUnavailable` if the session
    /// still has no backend afterwards.
    pub fn capture_photo(&self, path: impl AsRef<Path>) -> Result<PhotoSource, CameraError> {
        let path = path.as_ref();
        let link = self
            .link()
            .ok_or_else(|| CameraError::CaptureUnavailable("session is not open".to_string()))?;

        let still_capable = link
            .shared
            .active_info()
            .map(|(descriptor, _)| descriptor.supports_still_mode)
            .unwrap_or(false);

        if still_capable {
            match link.request_still(path, self.timing.capture_timeout) {
                Some(Ok(())) => {
                    StatsCounters::bump(&self.stats.stills_captured);
                    log::info!("Still captured to {}", path.display());
                    return Ok(PhotoSource::StillMode);
                }
                Some(Err(e)) => {
                    StatsCounters::bump(&self.stats.still_fallbacks);
                    log::warn!("Still capture failed, falling back to live frame: {}", e);
                }
                None => {
                    // The still is still queued or running and owns `path`.
                    log::warn!(
                        "Still capture to {} did not finish within {:?}",
                        path.display(),
                        self.timing.capture_timeout
                    );
                    return Err(worker_busy(self.timing.capture_timeout));
                }
            }
        }

        if let Some(bytes) = link.shared.frames.latest() {
            std::fs::write(path, &bytes)?;
            log::info!("Buffered frame saved to {}", path.display());
            return Ok(PhotoSource::BufferedFrame);
        }

        let bytes = link.request_frame(self.timing.capture_timeout)?;
        std::fs::write(path, &bytes)?;
        log::info!("Live frame saved to {}", path.display());
        Ok(PhotoSource::LiveRead)
    }

    /// Stop the production thread and release the backend. Idempotent.
    pub fn stop(&self) -> StopOutcome {
        let mut lifecycle = lock(&self.lifecycle);
        let worker = match lifecycle.take() {
            Some(worker) => worker,
            None => return StopOutcome::AlreadyStopped,
        };
        let link = lock(&self.current).take();

        worker.stop.store(true, Ordering::Relaxed);
        self.set_status(SessionState::Stopped);

        let outcome = match join_with_timeout(worker.join, self.timing.join_timeout) {
            Ok(()) => StopOutcome::Clean,
            Err(_detached) => {
                StatsCounters::bump(&self.stats.stop_timeouts);
                log::warn!(
                    "Production thread did not stop within {:?}; leaving it detached",
                    self.timing.join_timeout
                );
                if let Some(link) = &link {
                    if !link.shared.force_close() {
                        log::warn!("Backend busy in production thread; it closes when the thread exits");
                    }
                }
                StopOutcome::TimedOut
            }
        };

        drop(link);
        self.set_status(SessionState::Empty);
        log::info!("Camera session stopped ({:?})", outcome);
        outcome
    }

    pub fn state(&self) -> SessionState {
        match self.link() {
            Some(link) => link.shared.phase(),
            None => *lock(&self.status),
        }
    }

    pub fn is_open(&self) -> bool {
        self.link().is_some()
    }

    /// Descriptor of the backend currently streaming, if any.
    pub fn active_backend(&self) -> Option<BackendDescriptor> {
        self.link()
            .and_then(|link| link.shared.active_info())
            .map(|(descriptor, _)| descriptor)
    }

    pub fn negotiated_mode(&self) -> Option<NegotiatedMode> {
        self.link()
            .and_then(|link| link.shared.active_info())
            .map(|(_, mode)| mode)
    }

    /// The configuration the session was opened with.
    pub fn config(&self) -> Option<CaptureConfig> {
        lock(&self.lifecycle).as_ref().map(|w| w.config.clone())
    }

    /// Counters accumulated over the session's lifetime, across re-opens.
    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if self.stop() == StopOutcome::TimedOut {
            log::warn!("Camera session dropped while its production thread was still running");
        }
    }
}
