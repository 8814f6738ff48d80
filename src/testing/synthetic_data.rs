//! Synthetic frames for offline testing
//!
//! Gradient images whose content shifts with the frame number, so
//! consecutive frames never compare equal.

use crate::encode::{FrameEncoder, JpegFrameEncoder};
use crate::types::RawFrame;

/// Create an RGB24 test frame with a per-frame gradient
pub fn synthetic_rgb_frame(frame_number: u64, width: u32, height: u32) -> RawFrame {
    let mut data = vec![0u8; (width * height * 3) as usize];

    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8); // R
            data[idx + 1] = base.wrapping_add((y % 256) as u8); // G
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8); // B
        }
    }

    RawFrame::rgb(width, height, data)
}

/// The same gradient as a complete JPEG image, as an MJPEG camera would emit it.
///
/// Returns an empty buffer for zero-sized frames.
pub fn synthetic_jpeg_frame(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
    JpegFrameEncoder::default()
        .encode(&synthetic_rgb_frame(frame_number, width, height))
        .map(|bytes| bytes.to_vec())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelData;

    #[test]
    fn test_synthetic_rgb_frame_correct_size() {
        let frame = synthetic_rgb_frame(0, 64, 48);
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.len(), 64 * 48 * 3);
    }

    #[test]
    fn test_synthetic_frames_differ() {
        let frame0 = synthetic_rgb_frame(0, 32, 24);
        let frame1 = synthetic_rgb_frame(1, 32, 24);
        match (frame0.data, frame1.data) {
            (PixelData::Rgb8(a), PixelData::Rgb8(b)) => assert_ne!(a[0], b[0]),
            _ => panic!("expected RGB frames"),
        }
    }

    #[test]
    fn test_synthetic_jpeg_is_complete_image() {
        let jpeg = synthetic_jpeg_frame(9, 16, 16);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        assert!(synthetic_jpeg_frame(0, 0, 0).is_empty());
    }
}
