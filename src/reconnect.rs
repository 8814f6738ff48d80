//! Failure counting and full teardown/re-selection of the active backend.

use crate::backend::Backend;
use crate::errors::CameraError;
use crate::selection::{select_and_open, ActiveBackend};
use crate::types::CaptureConfig;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_ERROR_THRESHOLD: u32 = 10;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Sleep for `duration`, waking early once `stop` is set. Returns false if
/// interrupted.
pub fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// Consecutive read failure bookkeeping. Mutated only by the production thread.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    consecutive_errors: u32,
    threshold: u32,
    last_reconnect_at: Option<DateTime<Utc>>,
}

impl ReconnectState {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_errors: 0,
            threshold: threshold.max(1),
            last_reconnect_at: None,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Count a failed read. Returns true exactly when the threshold is hit,
    /// at which point the counter is already back at zero.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.threshold {
            self.consecutive_errors = 0;
            true
        } else {
            false
        }
    }

    /// Record a reconnect attempt. Failures seen on the old handle do not
    /// count against the next one.
    pub fn mark_reconnect(&mut self) -> DateTime<Utc> {
        self.consecutive_errors = 0;
        let now = Utc::now();
        self.last_reconnect_at = Some(now);
        now
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn last_reconnect_at(&self) -> Option<DateTime<Utc>> {
        self.last_reconnect_at
    }
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_THRESHOLD)
    }
}

/// Tears the current backend down and runs selection again with the
/// session's original configuration. May land on a different backend.
pub struct ReconnectSupervisor {
    backends: Arc<[Arc<dyn Backend>]>,
    config: CaptureConfig,
    delay: Duration,
    stop: Arc<AtomicBool>,
}

impl ReconnectSupervisor {
    pub fn new(
        backends: Arc<[Arc<dyn Backend>]>,
        config: CaptureConfig,
        delay: Duration,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backends,
            config,
            delay,
            stop,
        }
    }

    /// Close `current` (if any), wait for the device to settle, then select
    /// again. Gives up early with `CaptureUnavailable` if stop is requested.
    pub fn reconnect(
        &self,
        current: Option<ActiveBackend>,
    ) -> Result<ActiveBackend, CameraError> {
        if let Some(mut active) = current {
            log::info!("Closing backend '{}' for reconnect", active.descriptor.id);
            active.close();
        }

        if !sleep_unless_stopped(self.delay, &self.stop) {
            return Err(CameraError::CaptureUnavailable(
                "session stopping".to_string(),
            ));
        }

        let mut active = select_and_open(&self.backends, &self.config)?;
        if self.stop.load(Ordering::Relaxed) {
            active.close();
            return Err(CameraError::CaptureUnavailable(
                "session stopping".to_string(),
            ));
        }
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_triggers_exactly_once() {
        let mut state = ReconnectState::new(10);
        let triggers: Vec<bool> = (0..10).map(|_| state.record_failure()).collect();
        assert_eq!(triggers.iter().filter(|t| **t).count(), 1);
        assert!(triggers[9]);
        assert_eq!(state.consecutive_errors(), 0);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut state = ReconnectState::new(3);
        assert!(!state.record_failure());
        assert!(!state.record_failure());
        state.record_success();
        assert_eq!(state.consecutive_errors(), 0);
        assert!(!state.record_failure());
        assert!(!state.record_failure());
        assert!(state.record_failure());
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let mut state = ReconnectState::new(0);
        assert_eq!(state.threshold(), 1);
        assert!(state.record_failure());
    }

    #[test]
    fn test_mark_reconnect_records_time() {
        let mut state = ReconnectState::default();
        assert!(state.last_reconnect_at().is_none());
        let at = state.mark_reconnect();
        assert_eq!(state.last_reconnect_at(), Some(at));
    }

    #[test]
    fn test_reconnect_starts_a_fresh_count() {
        let mut state = ReconnectState::new(3);
        assert!(!state.record_failure());
        assert!(!state.record_failure());
        state.mark_reconnect();
        assert_eq!(state.consecutive_errors(), 0);
        assert!(!state.record_failure());
        assert!(!state.record_failure());
        assert!(state.record_failure());
    }

    #[test]
    fn test_sleep_is_interrupted_by_stop() {
        let stop = AtomicBool::new(true);
        let start = Instant::now();
        assert!(!sleep_unless_stopped(Duration::from_secs(10), &stop));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_completes() {
        let stop = AtomicBool::new(false);
        assert!(sleep_unless_stopped(Duration::from_millis(10), &stop));
    }
}
