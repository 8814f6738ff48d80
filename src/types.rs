//! Value types shared by the backends, the negotiator and the session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A resolution offered to the negotiator, with a human label for logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionCandidate {
    pub resolution: Resolution,
    pub label: String,
}

impl ResolutionCandidate {
    pub fn new(width: u32, height: u32, label: impl Into<String>) -> Self {
        Self {
            resolution: Resolution::new(width, height),
            label: label.into(),
        }
    }
}

/// Common capture sizes, best first.
pub const STANDARD_LADDER: [(u32, u32, &str); 3] = [
    (1920, 1080, "1080p"),
    (1280, 720, "720p"),
    (640, 480, "VGA"),
];

/// Parameters handed to `open()`. Backends ignore fields they cannot honour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub resolution: Resolution,
    pub framerate: u32,
    /// Clockwise rotation in degrees.
    pub rotation: u32,
    pub hflip: bool,
    pub vflip: bool,
    /// Device index for backends that enumerate `/dev/video*` style nodes.
    pub device_index: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::new(1280, 720),
            framerate: 30,
            rotation: 0,
            hflip: false,
            vflip: false,
            device_index: 0,
        }
    }
}

impl CaptureConfig {
    pub fn new(width: u32, height: u32, framerate: u32) -> Self {
        Self {
            resolution: Resolution::new(width, height),
            framerate,
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, rotation: u32) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_flip(mut self, hflip: bool, vflip: bool) -> Self {
        self.hflip = hflip;
        self.vflip = vflip;
        self
    }

    pub fn with_device_index(mut self, device_index: u32) -> Self {
        self.device_index = device_index;
        self
    }

    pub fn has_transform(&self) -> bool {
        self.rotation != 0 || self.hflip || self.vflip
    }

    /// The requested resolution followed by every smaller entry of the
    /// standard ladder, in descending quality.
    pub fn resolution_candidates(&self) -> Vec<ResolutionCandidate> {
        let requested = self.resolution;
        let label = STANDARD_LADDER
            .iter()
            .find(|(w, h, _)| Resolution::new(*w, *h) == requested)
            .map(|(_, _, l)| l.to_string())
            .unwrap_or_else(|| "requested".to_string());

        let mut candidates = vec![ResolutionCandidate {
            resolution: requested,
            label,
        }];
        candidates.extend(
            STANDARD_LADDER
                .iter()
                .filter(|(w, h, _)| Resolution::new(*w, *h).area() < requested.area())
                .map(|(w, h, l)| ResolutionCandidate::new(*w, *h, *l)),
        );
        candidates
    }
}

/// What a backend actually settled on after being asked for a mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiatedMode {
    pub resolution: Resolution,
    pub framerate: u32,
    pub label: String,
}

/// Pixel payload of a frame as delivered by a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    /// Packed 8-bit RGB, `width * height * 3` bytes.
    Rgb8(Vec<u8>),
    /// Already JPEG-compressed (MJPEG streams).
    Jpeg(Vec<u8>),
}

/// One undecoded frame straight from a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: PixelData,
}

impl RawFrame {
    pub fn rgb(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: PixelData::Rgb8(data),
        }
    }

    pub fn jpeg(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: PixelData::Jpeg(data),
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            PixelData::Rgb8(d) | PixelData::Jpeg(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Value for a best-effort backend parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

/// Result of a best-effort `set_param` call. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamOutcome {
    Applied,
    /// Recognised but the hardware refused or silently dropped it.
    Ignored(String),
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_for_1080p() {
        let config = CaptureConfig::new(1920, 1080, 30);
        let labels: Vec<_> = config
            .resolution_candidates()
            .into_iter()
            .map(|c| c.label)
            .collect();
        assert_eq!(labels, vec!["1080p", "720p", "VGA"]);
    }

    #[test]
    fn test_candidates_for_720p_skip_larger() {
        let config = CaptureConfig::new(1280, 720, 30);
        let sizes: Vec<_> = config
            .resolution_candidates()
            .into_iter()
            .map(|c| c.resolution)
            .collect();
        assert_eq!(
            sizes,
            vec![Resolution::new(1280, 720), Resolution::new(640, 480)]
        );
    }

    #[test]
    fn test_candidates_for_custom_size() {
        let config = CaptureConfig::new(800, 600, 15);
        let candidates = config.resolution_candidates();
        assert_eq!(candidates[0].label, "requested");
        assert_eq!(candidates[1].resolution, Resolution::new(640, 480));
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_transform_detection() {
        assert!(!CaptureConfig::default().has_transform());
        assert!(CaptureConfig::default().with_rotation(180).has_transform());
        assert!(CaptureConfig::default().with_flip(true, false).has_transform());
    }
}
