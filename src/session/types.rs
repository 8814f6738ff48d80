use crate::reconnect::DEFAULT_ERROR_THRESHOLD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Empty,
    Opening,
    Streaming,
    Reconnecting,
    Stopped,
}

/// How `stop()` went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopOutcome {
    /// The production thread exited and the backend was released.
    Clean,
    /// The production thread did not exit within the join timeout. It is left
    /// detached and will release its backend if it ever observes the stop flag.
    TimedOut,
    /// Nothing was running.
    AlreadyStopped,
}

/// Where a photo written by `capture_photo` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PhotoSource {
    StillMode,
    BufferedFrame,
    LiveRead,
}

/// Timing knobs for the production loop and teardown.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTiming {
    /// Consecutive read failures before a reconnect.
    pub error_threshold: u32,
    /// Settle time between closing a backend and selecting again.
    pub reconnect_delay: Duration,
    /// Wait after a failed reconnect before the next attempt.
    pub backoff: Duration,
    /// Sleep per iteration for backends whose `read()` returns immediately.
    pub pacing: Duration,
    pub join_timeout: Duration,
    /// Upper bound on how long `capture_photo` waits for the production thread.
    pub capture_timeout: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            reconnect_delay: Duration::from_secs(1),
            backoff: Duration::from_secs(1),
            pacing: Duration::from_millis(30),
            join_timeout: Duration::from_secs(1),
            capture_timeout: Duration::from_secs(5),
        }
    }
}

/// Snapshot of session counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub frames_produced: u64,
    pub read_errors: u64,
    pub reconnects: u64,
    pub failed_reconnects: u64,
    pub stills_captured: u64,
    pub still_fallbacks: u64,
    pub stop_timeouts: u64,
    pub last_reconnect_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    pub frames_produced: AtomicU64,
    pub read_errors: AtomicU64,
    pub reconnects: AtomicU64,
    pub failed_reconnects: AtomicU64,
    pub stills_captured: AtomicU64,
    pub still_fallbacks: AtomicU64,
    pub stop_timeouts: AtomicU64,
    pub last_reconnect_at: Mutex<Option<DateTime<Utc>>>,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_reconnect(&self, at: DateTime<Utc>) {
        *self
            .last_reconnect_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_produced: self.frames_produced.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            failed_reconnects: self.failed_reconnects.load(Ordering::Relaxed),
            stills_captured: self.stills_captured.load(Ordering::Relaxed),
            still_fallbacks: self.still_fallbacks.load(Ordering::Relaxed),
            stop_timeouts: self.stop_timeouts.load(Ordering::Relaxed),
            last_reconnect_at: *self
                .last_reconnect_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}
