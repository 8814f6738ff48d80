//! Testing utilities for picamstream
//!
//! Scripted backends and synthetic frames so the whole session can be
//! exercised without camera hardware.

pub mod scripted;
pub mod synthetic_data;

pub use scripted::{fast_timing, ScriptedBackend};
pub use synthetic_data::{synthetic_jpeg_frame, synthetic_rgb_frame};
