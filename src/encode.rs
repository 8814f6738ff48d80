//! Frame compression for the stream buffer and photo fallback path.

use crate::errors::CameraError;
use crate::types::{PixelData, RawFrame};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

/// JPEG quality used for streamed frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &RawFrame) -> Result<Bytes, CameraError>;
}

/// Encodes frames to JPEG with the `image` crate. Frames that are already
/// JPEG pass through untouched.
#[derive(Debug, Clone)]
pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    fn encode_rgb(&self, rgb: &[u8], width: u32, height: u32) -> Result<Bytes, CameraError> {
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(CameraError::EncodingError(format!(
                "RGB buffer is {} bytes, expected {} for {}x{}",
                rgb.len(),
                expected,
                width,
                height
            )));
        }

        let mut out = Vec::with_capacity(expected / 8);
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .write_image(rgb, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| CameraError::EncodingError(format!("JPEG encoding failed: {}", e)))?;
        Ok(Bytes::from(out))
    }
}

impl Default for JpegFrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&self, frame: &RawFrame) -> Result<Bytes, CameraError> {
        match &frame.data {
            PixelData::Jpeg(data) => Ok(Bytes::copy_from_slice(data)),
            PixelData::Rgb8(data) => self.encode_rgb(data, frame.width, frame.height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mjpeg::jpeg_dimensions;
    use crate::testing::synthetic_rgb_frame;

    #[test]
    fn test_rgb_frame_becomes_jpeg() {
        let frame = synthetic_rgb_frame(7, 32, 16);
        let bytes = JpegFrameEncoder::default().encode(&frame).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(jpeg_dimensions(&bytes), Some((32, 16)));
    }

    #[test]
    fn test_jpeg_passthrough() {
        let frame = RawFrame::jpeg(2, 2, vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
        let bytes = JpegFrameEncoder::default().encode(&frame).unwrap();
        assert_eq!(bytes.as_ref(), &[0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
    }

    #[test]
    fn test_short_rgb_buffer_is_rejected() {
        let frame = RawFrame::rgb(4, 4, vec![0; 10]);
        let err = JpegFrameEncoder::default().encode(&frame).unwrap_err();
        assert!(matches!(err, CameraError::EncodingError(_)));
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(JpegFrameEncoder::new(0).quality(), 1);
        assert_eq!(JpegFrameEncoder::new(200).quality(), 100);
        assert_eq!(JpegFrameEncoder::default().quality(), 85);
    }
}
