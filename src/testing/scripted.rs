//! A backend whose behaviour is scripted by the test, with counters for
//! every hardware call it receives.

use super::synthetic_data::synthetic_jpeg_frame;
use crate::backend::{Backend, BackendDescriptor, CameraHandle};
use crate::errors::CameraError;
use crate::session::SessionTiming;
use crate::types::{CaptureConfig, ParamOutcome, ParamValue, RawFrame, Resolution};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Edge length of the JPEG each scripted read returns.
const FRAME_EDGE: u32 = 8;

#[derive(Debug, Clone)]
struct Script {
    available: bool,
    connected: bool,
    open_error: Option<String>,
    clamp: Option<Resolution>,
    reject_modes: bool,
    failing_reads_left: u32,
    still_failing: bool,
    still_delay: Duration,
    self_paced: bool,
    read_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            available: true,
            connected: true,
            open_error: None,
            clamp: None,
            reject_modes: false,
            failing_reads_left: 0,
            still_failing: false,
            still_delay: Duration::ZERO,
            self_paced: false,
            read_delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct Counters {
    probes: AtomicU32,
    opens: AtomicU32,
    closes: AtomicU32,
    reads: AtomicU64,
    stills: AtomicU32,
    in_read: AtomicBool,
    concurrent_reads: AtomicBool,
    probed: Mutex<Vec<Resolution>>,
    params: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted stand-in for a camera stack. Clones share the script and
/// counters, so a test keeps one clone and hands another to the session.
#[derive(Clone)]
pub struct ScriptedBackend {
    descriptor: BackendDescriptor,
    script: Arc<Mutex<Script>>,
    counters: Arc<Counters>,
}

impl ScriptedBackend {
    pub fn new(id: &'static str, priority: u8) -> Self {
        Self::from_descriptor(BackendDescriptor {
            id,
            priority,
            supports_still_mode: false,
            supports_transform: false,
        })
    }

    /// Pretend to be one of the real backends.
    pub fn from_descriptor(descriptor: BackendDescriptor) -> Self {
        Self {
            descriptor,
            script: Arc::new(Mutex::new(Script::default())),
            counters: Arc::new(Counters::default()),
        }
    }

    fn edit(self, f: impl FnOnce(&mut Script)) -> Self {
        f(&mut lock(&self.script));
        self
    }

    pub fn unavailable(self) -> Self {
        self.edit(|s| s.available = false)
    }

    pub fn failing_open(self, reason: &str) -> Self {
        let reason = reason.to_string();
        self.edit(|s| s.open_error = Some(reason))
    }

    /// Never deliver more than `width` x `height`, whatever is asked for.
    pub fn clamp_to(self, width: u32, height: u32) -> Self {
        self.edit(|s| s.clamp = Some(Resolution::new(width, height)))
    }

    /// Refuse every `set_mode` call.
    pub fn rejecting_modes(self) -> Self {
        self.edit(|s| s.reject_modes = true)
    }

    /// Fail the next `count` reads across all handles, then recover.
    pub fn fail_first_reads(self, count: u32) -> Self {
        self.edit(|s| s.failing_reads_left = count)
    }

    pub fn with_still_mode(mut self) -> Self {
        self.descriptor.supports_still_mode = true;
        self
    }

    pub fn failing_still(self) -> Self {
        self.edit(|s| s.still_failing = true)
    }

    /// Make each still capture take `delay` before writing its file.
    pub fn still_delay(self, delay: Duration) -> Self {
        self.edit(|s| s.still_delay = delay)
    }

    /// Report the handle as self-paced, as a blocking driver would.
    pub fn self_paced(self) -> Self {
        self.edit(|s| s.self_paced = true)
    }

    pub fn read_delay(self, delay: Duration) -> Self {
        self.edit(|s| s.read_delay = delay)
    }

    pub fn set_available(&self, available: bool) {
        lock(&self.script).available = available;
    }

    /// Fail the next `count` reads from now on, then recover.
    pub fn fail_next_reads(&self, count: u32) {
        lock(&self.script).failing_reads_left = count;
    }

    /// Simulate unplugging: open handles report closed until reconnected.
    pub fn set_connected(&self, connected: bool) {
        lock(&self.script).connected = connected;
    }

    pub fn probes(&self) -> u32 {
        self.counters.probes.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> u32 {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u64 {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub fn stills(&self) -> u32 {
        self.counters.stills.load(Ordering::SeqCst)
    }

    /// Handles opened and not yet closed.
    pub fn open_handles(&self) -> u32 {
        self.opens().saturating_sub(self.closes())
    }

    /// True if two reads ever overlapped.
    pub fn saw_concurrent_reads(&self) -> bool {
        self.counters.concurrent_reads.load(Ordering::SeqCst)
    }

    /// Every resolution passed to `set_mode`, in call order.
    pub fn probed_resolutions(&self) -> Vec<Resolution> {
        lock(&self.counters.probed).clone()
    }

    pub fn params_set(&self) -> Vec<String> {
        lock(&self.counters.params).clone()
    }
}

impl Backend for ScriptedBackend {
    fn descriptor(&self) -> BackendDescriptor {
        self.descriptor
    }

    fn probe_available(&self) -> bool {
        self.counters.probes.fetch_add(1, Ordering::SeqCst);
        lock(&self.script).available
    }

    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CameraHandle>, CameraError> {
        if let Some(reason) = lock(&self.script).open_error.clone() {
            return Err(CameraError::InitializationError(reason));
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedHandle {
            script: self.script.clone(),
            counters: self.counters.clone(),
            open: true,
            mode: config.resolution,
            frame_number: 0,
        }))
    }
}

struct ScriptedHandle {
    script: Arc<Mutex<Script>>,
    counters: Arc<Counters>,
    open: bool,
    mode: Resolution,
    frame_number: u64,
}

impl CameraHandle for ScriptedHandle {
    fn is_open(&self) -> bool {
        self.open && lock(&self.script).connected
    }

    fn set_mode(
        &mut self,
        resolution: Resolution,
        framerate: u32,
    ) -> Result<(Resolution, u32), CameraError> {
        lock(&self.counters.probed).push(resolution);
        let script = lock(&self.script);
        if script.reject_modes {
            return Err(CameraError::NegotiationError(format!(
                "mode {} refused",
                resolution
            )));
        }
        let actual = match script.clamp {
            Some(max) => Resolution::new(
                resolution.width.min(max.width),
                resolution.height.min(max.height),
            ),
            None => resolution,
        };
        self.mode = actual;
        Ok((actual, framerate))
    }

    fn read(&mut self) -> Result<RawFrame, CameraError> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if self.counters.in_read.swap(true, Ordering::SeqCst) {
            self.counters.concurrent_reads.store(true, Ordering::SeqCst);
        }

        let delay = lock(&self.script).read_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        // Decided after the delay, so an unplug during a slow read fails it.
        let fail = {
            let mut script = lock(&self.script);
            if !self.open || !script.connected {
                true
            } else if script.failing_reads_left > 0 {
                script.failing_reads_left -= 1;
                true
            } else {
                false
            }
        };
        self.counters.in_read.store(false, Ordering::SeqCst);

        if fail {
            return Err(CameraError::CaptureError("scripted read failure".to_string()));
        }
        self.frame_number += 1;
        Ok(RawFrame::jpeg(
            self.mode.width,
            self.mode.height,
            synthetic_jpeg_frame(self.frame_number, FRAME_EDGE, FRAME_EDGE),
        ))
    }

    fn set_param(&mut self, name: &str, _value: ParamValue) -> ParamOutcome {
        lock(&self.counters.params).push(name.to_string());
        ParamOutcome::Applied
    }

    fn capture_still(&mut self, path: &Path) -> Result<(), CameraError> {
        self.counters.stills.fetch_add(1, Ordering::SeqCst);
        let (delay, failing) = {
            let script = lock(&self.script);
            (script.still_delay, script.still_failing)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if failing {
            return Err(CameraError::StillCaptureError(
                "scripted still failure".to_string(),
            ));
        }
        std::fs::write(path, synthetic_jpeg_frame(u64::MAX, FRAME_EDGE * 2, FRAME_EDGE))?;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_self_paced(&self) -> bool {
        lock(&self.script).self_paced
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Timing short enough for tests: threshold of 3, millisecond delays.
pub fn fast_timing() -> SessionTiming {
    SessionTiming {
        error_threshold: 3,
        reconnect_delay: Duration::from_millis(10),
        backoff: Duration::from_millis(10),
        pacing: Duration::from_millis(2),
        join_timeout: Duration::from_secs(2),
        capture_timeout: Duration::from_secs(2),
    }
}
