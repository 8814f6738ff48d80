//! The production thread: sole owner of the backend handle.

use super::types::{SessionState, SessionTiming, StatsCounters};
use crate::backend::BackendDescriptor;
use crate::encode::FrameEncoder;
use crate::errors::CameraError;
use crate::frame_buffer::FrameBuffer;
use crate::reconnect::{ReconnectState, ReconnectSupervisor};
use crate::selection::ActiveBackend;
use crate::types::NegotiatedMode;
use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

const IDLE_SLICE: Duration = Duration::from_millis(50);

/// Work that needs the backend handle, sent from consumer threads.
pub(crate) enum WorkerRequest {
    Still {
        path: PathBuf,
        reply: Sender<Result<(), CameraError>>,
    },
    Frame {
        reply: Sender<Result<Bytes, CameraError>>,
    },
}

impl WorkerRequest {
    fn fail(self, error: CameraError) {
        // The requester may have given up already.
        match self {
            WorkerRequest::Still { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            WorkerRequest::Frame { reply } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// State of one open/stop cycle, shared between the session and its thread.
pub(crate) struct RunShared {
    pub frames: FrameBuffer,
    phase: Mutex<SessionState>,
    active_info: Mutex<Option<(BackendDescriptor, NegotiatedMode)>>,
    slot: Mutex<Option<ActiveBackend>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RunShared {
    pub fn new(active: ActiveBackend) -> Self {
        Self {
            frames: FrameBuffer::new(),
            phase: Mutex::new(SessionState::Streaming),
            active_info: Mutex::new(Some((active.descriptor, active.mode.clone()))),
            slot: Mutex::new(Some(active)),
        }
    }

    pub fn phase(&self) -> SessionState {
        *lock(&self.phase)
    }

    fn set_phase(&self, phase: SessionState) {
        *lock(&self.phase) = phase;
    }

    pub fn active_info(&self) -> Option<(BackendDescriptor, NegotiatedMode)> {
        lock(&self.active_info).clone()
    }

    fn install(&self, active: ActiveBackend) {
        *lock(&self.active_info) = Some((active.descriptor, active.mode.clone()));
        *lock(&self.slot) = Some(active);
    }

    fn take(&self) -> Option<ActiveBackend> {
        *lock(&self.active_info) = None;
        lock(&self.slot).take()
    }

    /// Close the backend from outside the production thread, unless that
    /// thread is inside a backend call right now.
    pub fn force_close(&self) -> bool {
        let mut slot = match self.slot.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        if let Some(mut active) = slot.take() {
            active.close();
        }
        *lock(&self.active_info) = None;
        true
    }
}

pub(crate) struct ProductionLoop {
    shared: Arc<RunShared>,
    stats: Arc<StatsCounters>,
    stop: Arc<AtomicBool>,
    requests: Receiver<WorkerRequest>,
    encoder: Arc<dyn FrameEncoder>,
    supervisor: ReconnectSupervisor,
    failures: ReconnectState,
    timing: SessionTiming,
}

impl ProductionLoop {
    pub fn new(
        shared: Arc<RunShared>,
        stats: Arc<StatsCounters>,
        stop: Arc<AtomicBool>,
        requests: Receiver<WorkerRequest>,
        encoder: Arc<dyn FrameEncoder>,
        supervisor: ReconnectSupervisor,
        timing: SessionTiming,
    ) -> Self {
        Self {
            shared,
            stats,
            stop,
            requests,
            encoder,
            supervisor,
            failures: ReconnectState::new(timing.error_threshold),
            timing,
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn run(mut self) {
        log::debug!("Production loop started");

        while !self.stopping() {
            self.serve_pending();

            if !self.handle_ready() {
                if !self.reconnect() {
                    self.idle(self.timing.backoff);
                }
                continue;
            }

            let self_paced = self.produce_one();
            if !self_paced {
                self.idle(self.timing.pacing);
            }
        }

        self.teardown();
        log::debug!("Production loop finished");
    }

    fn handle_ready(&self) -> bool {
        lock(&self.shared.slot)
            .as_ref()
            .map(|active| active.handle.is_open())
            .unwrap_or(false)
    }

    /// One read/encode/publish step. Returns whether the backend paces itself.
    fn produce_one(&mut self) -> bool {
        let (result, self_paced) = {
            let mut slot = lock(&self.shared.slot);
            match slot.as_mut() {
                Some(active) => (active.handle.read(), active.handle.is_self_paced()),
                None => return false,
            }
        };

        match result.and_then(|frame| self.encoder.encode(&frame)) {
            Ok(bytes) => {
                self.shared.frames.publish(bytes);
                self.failures.record_success();
                StatsCounters::bump(&self.stats.frames_produced);
            }
            Err(e) => {
                StatsCounters::bump(&self.stats.read_errors);
                log::debug!(
                    "Frame read failed ({} consecutive): {}",
                    self.failures.consecutive_errors() + 1,
                    e
                );
                if self.failures.record_failure() {
                    log::warn!(
                        "{} consecutive read failures, reconnecting",
                        self.failures.threshold()
                    );
                    self.reconnect();
                }
            }
        }
        self_paced
    }

    /// Full teardown and re-selection. Returns whether a backend is active again.
    fn reconnect(&mut self) -> bool {
        self.shared.set_phase(SessionState::Reconnecting);
        StatsCounters::bump(&self.stats.reconnects);
        let at = self.failures.mark_reconnect();
        self.stats.set_last_reconnect(at);

        let current = self.shared.take();
        match self.supervisor.reconnect(current) {
            Ok(active) => {
                log::info!(
                    "Reconnected via '{}' at {}",
                    active.descriptor.id,
                    active.mode.resolution
                );
                self.shared.install(active);
                self.shared.set_phase(SessionState::Streaming);
                true
            }
            Err(e) => {
                StatsCounters::bump(&self.stats.failed_reconnects);
                if !self.stopping() {
                    log::warn!("Reconnect failed, will retry: {}", e);
                }
                false
            }
        }
    }

    /// Wait up to `duration`, serving capture requests as they arrive.
    fn idle(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            if self.stopping() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let wait = (deadline - now).min(IDLE_SLICE);
            match self.requests.recv_timeout(wait) {
                Ok(request) => self.serve(request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => std::thread::sleep(wait),
            }
        }
    }

    fn serve_pending(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            self.serve(request);
        }
    }

    fn serve(&mut self, request: WorkerRequest) {
        match request {
            WorkerRequest::Still { path, reply } => {
                let result = self.capture_still(&path);
                let _ = reply.send(result);
            }
            WorkerRequest::Frame { reply } => {
                let result = self.read_for_capture();
                let _ = reply.send(result);
            }
        }
    }

    fn capture_still(&mut self, path: &Path) -> Result<(), CameraError> {
        let mut slot = lock(&self.shared.slot);
        let active = slot.as_mut().ok_or_else(|| {
            CameraError::CaptureUnavailable("no active backend".to_string())
        })?;
        if !active.descriptor.supports_still_mode {
            return Err(CameraError::UnsupportedOperation(format!(
                "backend '{}' has no still mode",
                active.descriptor.id
            )));
        }
        active.handle.capture_still(path)
    }

    fn read_for_capture(&mut self) -> Result<Bytes, CameraError> {
        let frame = {
            let mut slot = lock(&self.shared.slot);
            let active = slot.as_mut().ok_or_else(|| {
                CameraError::CaptureUnavailable("no active backend".to_string())
            })?;
            active.handle.read()?
        };
        let bytes = self.encoder.encode(&frame)?;
        self.shared.frames.publish(bytes.clone());
        StatsCounters::bump(&self.stats.frames_produced);
        Ok(bytes)
    }

    fn teardown(&mut self) {
        if let Some(mut active) = self.shared.take() {
            log::info!("Closing backend '{}'", active.descriptor.id);
            active.close();
        }
        while let Ok(request) = self.requests.try_recv() {
            request.fail(CameraError::CaptureUnavailable(
                "session stopped".to_string(),
            ));
        }
        self.shared.set_phase(SessionState::Stopped);
    }
}
