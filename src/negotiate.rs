//! First-fit resolution negotiation against an open backend handle.

use crate::backend::CameraHandle;
use crate::errors::CameraError;
use crate::types::{NegotiatedMode, Resolution, ResolutionCandidate};

/// Drivers may round a requested size down; anything at or above 90% of the
/// request in both dimensions counts as granted.
pub const SIZE_TOLERANCE_PERCENT: u64 = 90;

pub fn within_tolerance(requested: Resolution, actual: Resolution) -> bool {
    let wide_enough =
        actual.width as u64 * 100 >= requested.width as u64 * SIZE_TOLERANCE_PERCENT;
    let tall_enough =
        actual.height as u64 * 100 >= requested.height as u64 * SIZE_TOLERANCE_PERCENT;
    wide_enough && tall_enough
}

/// Try `candidates` in order and accept the first one the hardware honours
/// (within tolerance) and can deliver a frame at. Later candidates are never
/// probed once one is accepted.
pub fn negotiate(
    handle: &mut dyn CameraHandle,
    candidates: &[ResolutionCandidate],
    framerate: u32,
) -> Result<NegotiatedMode, CameraError> {
    let mut rejected = Vec::new();

    for candidate in candidates {
        let requested = candidate.resolution;
        let (actual, actual_fps) = match handle.set_mode(requested, framerate) {
            Ok(mode) => mode,
            Err(e) => {
                log::debug!("{} ({}) refused: {}", candidate.label, requested, e);
                rejected.push(format!("{} refused ({})", requested, e));
                continue;
            }
        };

        if !within_tolerance(requested, actual) {
            log::debug!(
                "{} ({}) clamped to {}, below tolerance",
                candidate.label,
                requested,
                actual
            );
            rejected.push(format!("{} clamped to {}", requested, actual));
            continue;
        }

        // Some stacks echo the request from set_mode; the frame is the truth.
        let frame = match handle.read() {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("{} ({}) gave no frame: {}", candidate.label, requested, e);
                rejected.push(format!("{} gave no frame ({})", requested, e));
                continue;
            }
        };
        let delivered = Resolution::new(frame.width, frame.height);
        if !within_tolerance(requested, delivered) {
            log::debug!(
                "{} ({}) delivered {} frames, below tolerance",
                candidate.label,
                requested,
                delivered
            );
            rejected.push(format!("{} delivered {} frames", requested, delivered));
            continue;
        }

        log::info!(
            "Negotiated {} ({} actual {} @ {} fps)",
            candidate.label,
            requested,
            delivered,
            actual_fps
        );
        return Ok(NegotiatedMode {
            resolution: delivered,
            framerate: actual_fps,
            label: candidate.label.clone(),
        });
    }

    Err(CameraError::NegotiationError(if rejected.is_empty() {
        "no resolution candidates".to_string()
    } else {
        rejected.join(", ")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaptureConfig, ParamOutcome, ParamValue, RawFrame};

    #[test]
    fn test_tolerance_boundary() {
        let requested = Resolution::new(1000, 1000);
        assert!(within_tolerance(requested, Resolution::new(900, 900)));
        assert!(within_tolerance(requested, Resolution::new(1200, 1000)));
        assert!(!within_tolerance(requested, Resolution::new(899, 1000)));
        assert!(!within_tolerance(requested, Resolution::new(1000, 899)));
    }

    /// Reports whatever mode it is asked for but always streams VGA, like an
    /// ISP that answers set_mode without checking the sensor.
    struct EchoingVgaHandle {
        asked: Vec<Resolution>,
    }

    impl CameraHandle for EchoingVgaHandle {
        fn is_open(&self) -> bool {
            true
        }

        fn set_mode(
            &mut self,
            resolution: Resolution,
            framerate: u32,
        ) -> Result<(Resolution, u32), CameraError> {
            self.asked.push(resolution);
            Ok((resolution, framerate))
        }

        fn read(&mut self) -> Result<RawFrame, CameraError> {
            Ok(RawFrame::jpeg(640, 480, vec![0xFF, 0xD8, 0xFF, 0xD9]))
        }

        fn set_param(&mut self, _name: &str, _value: ParamValue) -> ParamOutcome {
            ParamOutcome::Unsupported
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_delivered_frame_size_overrides_echoed_mode() {
        let mut handle = EchoingVgaHandle { asked: Vec::new() };
        let candidates = CaptureConfig::new(1920, 1080, 30).resolution_candidates();

        let mode = negotiate(&mut handle, &candidates, 30).unwrap();

        assert_eq!(mode.label, "VGA");
        assert_eq!(mode.resolution, Resolution::new(640, 480));
        assert_eq!(handle.asked.len(), 3);
    }

    #[test]
    fn test_driver_rounding_is_accepted() {
        // 1920x1080 rounded to 1920x1072 by a 16-pixel aligned driver.
        assert!(within_tolerance(
            Resolution::new(1920, 1080),
            Resolution::new(1920, 1072)
        ));
        assert!(!within_tolerance(
            Resolution::new(1920, 1080),
            Resolution::new(1280, 720)
        ));
    }
}
