//! Camera backends: static descriptors plus the capability traits every
//! concrete driver implements.
//!
//! A [`Backend`] is a factory that knows whether its stack is present on this
//! machine and how to open it. Opening yields a [`CameraHandle`], the stateful
//! resource the production thread owns exclusively until it is closed.

pub mod mjpeg;
#[cfg(feature = "hardware")]
pub mod generic;
pub mod rpicam;

use crate::errors::CameraError;
use crate::types::{CaptureConfig, ParamOutcome, ParamValue, RawFrame, Resolution};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Static metadata for one backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    pub id: &'static str,
    /// Lower is tried first.
    pub priority: u8,
    pub supports_still_mode: bool,
    pub supports_transform: bool,
}

/// Native SBC stack driven through the rpicam/libcamera apps.
pub const RPICAM: BackendDescriptor = BackendDescriptor {
    id: "rpicam",
    priority: 0,
    supports_still_mode: true,
    supports_transform: true,
};

/// Generic SBC stack: the kernel V4L2 interface.
pub const V4L2: BackendDescriptor = BackendDescriptor {
    id: "v4l2",
    priority: 1,
    supports_still_mode: false,
    supports_transform: false,
};

/// Universal fallback: whatever capture API the platform offers.
pub const AUTO: BackendDescriptor = BackendDescriptor {
    id: "auto",
    priority: 2,
    supports_still_mode: false,
    supports_transform: false,
};

/// Every backend id this build knows how to construct.
pub const KNOWN_BACKENDS: [&str; 3] = [RPICAM.id, V4L2.id, AUTO.id];

/// Factory side of a backend.
pub trait Backend: Send + Sync {
    fn descriptor(&self) -> BackendDescriptor;

    /// Cheap presence check with no effect on hardware state.
    fn probe_available(&self) -> bool;

    /// Allocate and start the backend. Must not leave partial hardware state
    /// behind when it fails.
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CameraHandle>, CameraError>;
}

/// An open backend instance. Either fully open or fully closed.
pub trait CameraHandle: Send {
    fn is_open(&self) -> bool;

    /// Ask for a mode and report what the hardware actually settled on.
    fn set_mode(
        &mut self,
        resolution: Resolution,
        framerate: u32,
    ) -> Result<(Resolution, u32), CameraError>;

    fn read(&mut self) -> Result<RawFrame, CameraError>;

    /// Best-effort tuning knob. Failures are reported, never raised.
    fn set_param(&mut self, _name: &str, _value: ParamValue) -> ParamOutcome {
        ParamOutcome::Unsupported
    }

    /// Dedicated full-resolution single shot written straight to `path`.
    fn capture_still(&mut self, _path: &Path) -> Result<(), CameraError> {
        Err(CameraError::UnsupportedOperation(
            "still capture not supported by this backend".to_string(),
        ))
    }

    /// Idempotent.
    fn close(&mut self);

    /// True when `read()` blocks until the next frame is ready.
    fn is_self_paced(&self) -> bool {
        false
    }
}

/// Construct a backend by id. Ids compiled out of this build return `None`.
#[cfg_attr(not(feature = "hardware"), allow(unused_variables))]
pub fn backend_by_id(id: &str, device_index: u32) -> Option<Arc<dyn Backend>> {
    match id {
        "rpicam" => Some(Arc::new(rpicam::RpicamBackend::new())),
        #[cfg(feature = "hardware")]
        "v4l2" => Some(Arc::new(generic::NokhwaBackend::v4l2(device_index))),
        #[cfg(feature = "hardware")]
        "auto" => Some(Arc::new(generic::NokhwaBackend::auto(device_index))),
        _ => None,
    }
}

/// Build the backend table for the given ids, skipping ones not compiled in.
pub fn backends_from_ids(ids: &[String], device_index: u32) -> Vec<Arc<dyn Backend>> {
    ids.iter()
        .filter_map(|id| {
            let backend = backend_by_id(id, device_index);
            if backend.is_none() {
                log::info!("Backend '{}' is not compiled into this build, skipping", id);
            }
            backend
        })
        .collect()
}

/// The full table in priority order.
pub fn default_backends(device_index: u32) -> Vec<Arc<dyn Backend>> {
    let ids: Vec<String> = KNOWN_BACKENDS.iter().map(|s| s.to_string()).collect();
    backends_from_ids(&ids, device_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_priorities_are_ordered() {
        assert!(RPICAM.priority < V4L2.priority);
        assert!(V4L2.priority < AUTO.priority);
        assert!(RPICAM.supports_still_mode);
        assert!(!AUTO.supports_still_mode);
    }

    #[test]
    fn test_rpicam_is_always_compiled() {
        let backend = backend_by_id("rpicam", 0).expect("rpicam backend");
        assert_eq!(backend.descriptor(), RPICAM);
    }

    #[test]
    fn test_unknown_backend_is_skipped() {
        let backends = backends_from_ids(&["bogus".to_string(), "rpicam".to_string()], 0);
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].descriptor().id, "rpicam");
    }

    #[cfg(not(feature = "hardware"))]
    #[test]
    fn test_native_ids_are_skipped_without_hardware() {
        assert!(backend_by_id("v4l2", 3).is_none());
        assert!(backend_by_id("auto", 3).is_none());
        let ids: Vec<_> = default_backends(3)
            .iter()
            .map(|b| b.descriptor().id)
            .collect();
        assert_eq!(ids, vec!["rpicam"]);
    }

    #[cfg(feature = "hardware")]
    #[test]
    fn test_default_table_has_all_backends() {
        let ids: Vec<_> = default_backends(0)
            .iter()
            .map(|b| b.descriptor().id)
            .collect();
        assert_eq!(ids, KNOWN_BACKENDS.to_vec());
    }
}
