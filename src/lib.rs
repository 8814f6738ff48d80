//! picamstream: resilient camera access for single-board computers
//!
//! This crate hides which capture stack is present behind one
//! [`CameraSession`]. It tries backends in priority order, negotiates the
//! largest resolution the chosen one accepts, produces JPEG frames on a
//! dedicated thread and reconnects on its own when a device stops delivering.
//!
//! # Features
//! - Prioritised backend fallback (rpicam, V4L2, platform auto-detect)
//! - Resolution negotiation with a 90% tolerance
//! - Latest-frame buffer readable from any number of threads
//! - Automatic teardown and re-selection after repeated read failures
//! - Still capture with live-frame fallback
//!
//! # Usage
//! ```rust,no_run
//! use picamstream::{CameraSession, StreamConfig};
//!
//! let config = StreamConfig::load_or_default();
//! let session = CameraSession::from_config(&config);
//! session.open(config.capture_config())?;
//! if let Some(jpeg) = session.get_frame() {
//!     println!("{} bytes", jpeg.len());
//! }
//! session.capture_photo("photo.jpg")?;
//! session.stop();
//! # Ok::<(), picamstream::CameraError>(())
//! ```
pub mod backend;
pub mod config;
pub mod encode;
pub mod errors;
pub mod frame_buffer;
pub mod negotiate;
pub mod reconnect;
pub mod selection;
pub mod session;
pub mod types;

// Scripted backends and synthetic frames for offline testing
pub mod testing;

// Re-exports for convenience
pub use backend::{Backend, BackendDescriptor, CameraHandle};
pub use config::StreamConfig;
pub use errors::{BackendAttempt, CameraError};
pub use session::{CameraSession, PhotoSource, SessionState, SessionStats, SessionTiming, StopOutcome};
pub use types::{CaptureConfig, NegotiatedMode, RawFrame, Resolution};

/// Initialize logging for the camera system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "picamstream=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        backends: backend::KNOWN_BACKENDS
            .iter()
            .filter(|id| backend::backend_by_id(id, 0).is_some())
            .map(|id| id.to_string())
            .collect(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Backend ids compiled into this build
    pub backends: Vec<String>,
}
