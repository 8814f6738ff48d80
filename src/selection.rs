//! Ordered backend selection: probe, open, negotiate, fall through.

use crate::backend::{Backend, BackendDescriptor, CameraHandle};
use crate::errors::{BackendAttempt, CameraError};
use crate::negotiate::negotiate;
use crate::types::{CaptureConfig, NegotiatedMode, ParamOutcome, ParamValue};
use std::sync::Arc;

/// An opened, negotiated backend ready for streaming.
pub struct ActiveBackend {
    pub descriptor: BackendDescriptor,
    pub handle: Box<dyn CameraHandle>,
    pub mode: NegotiatedMode,
}

impl ActiveBackend {
    pub fn close(&mut self) {
        self.handle.close();
    }
}

impl std::fmt::Debug for ActiveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveBackend")
            .field("descriptor", &self.descriptor)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Backends sorted by ascending priority; ties keep registration order.
pub fn by_priority(backends: &[Arc<dyn Backend>]) -> Vec<Arc<dyn Backend>> {
    let mut ordered = backends.to_vec();
    ordered.sort_by_key(|b| b.descriptor().priority);
    ordered
}

/// Open the first backend that is present, opens cleanly and negotiates a
/// resolution. Every failure is recorded and the search moves on; only total
/// exhaustion is an error.
pub fn select_and_open(
    backends: &[Arc<dyn Backend>],
    config: &CaptureConfig,
) -> Result<ActiveBackend, CameraError> {
    let candidates = config.resolution_candidates();
    let mut attempts = Vec::new();

    for backend in by_priority(backends) {
        let descriptor = backend.descriptor();

        if !backend.probe_available() {
            log::debug!("Backend '{}' not available, skipping", descriptor.id);
            attempts.push(BackendAttempt::new(descriptor.id, "not available"));
            continue;
        }

        let mut handle = match backend.open(config) {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("Backend '{}' failed to open: {}", descriptor.id, e);
                attempts.push(BackendAttempt::new(descriptor.id, e.to_string()));
                continue;
            }
        };

        let mode = match negotiate(handle.as_mut(), &candidates, config.framerate) {
            Ok(mode) => mode,
            Err(e) => {
                log::warn!("Backend '{}' negotiation failed: {}", descriptor.id, e);
                handle.close();
                attempts.push(BackendAttempt::new(descriptor.id, e.to_string()));
                continue;
            }
        };

        apply_best_effort_params(descriptor, handle.as_mut());
        log::info!(
            "Camera opened via '{}' at {} @ {} fps",
            descriptor.id,
            mode.resolution,
            mode.framerate
        );
        return Ok(ActiveBackend {
            descriptor,
            handle,
            mode,
        });
    }

    Err(CameraError::NoBackendAvailable { attempts })
}

fn apply_best_effort_params(descriptor: BackendDescriptor, handle: &mut dyn CameraHandle) {
    match handle.set_param("autofocus", ParamValue::Bool(true)) {
        ParamOutcome::Applied => log::debug!("'{}': continuous autofocus enabled", descriptor.id),
        ParamOutcome::Ignored(reason) => {
            log::debug!("'{}': autofocus ignored: {}", descriptor.id, reason)
        }
        ParamOutcome::Unsupported => {}
    }
}
