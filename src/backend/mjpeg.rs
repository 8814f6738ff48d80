//! Splitting a raw MJPEG byte stream into individual JPEG images.

use std::io::{self, BufRead, BufReader, Read};

const MARKER: u8 = 0xFF;
const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;

/// Frames larger than this are treated as a corrupt stream.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Reads concatenated JPEG images (SOI..EOI) from a byte stream such as the
/// stdout of `rpicam-vid --codec mjpeg -o -`.
pub struct MjpegReader<R> {
    inner: BufReader<R>,
    max_frame_len: usize,
}

impl<R: Read> MjpegReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::with_capacity(256 * 1024, inner),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Next complete image, or `None` once the stream ends. Bytes between
    /// images are discarded; a trailing partial image is dropped.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut frame = Vec::new();
        let mut in_frame = false;
        let mut prev = 0u8;

        loop {
            let chunk = self.inner.fill_buf()?;
            if chunk.is_empty() {
                return Ok(None);
            }

            let mut consumed = 0;
            let mut complete = false;
            let mut oversized = false;
            for &byte in chunk {
                consumed += 1;
                if in_frame {
                    frame.push(byte);
                    if prev == MARKER && byte == EOI {
                        complete = true;
                        break;
                    }
                    if frame.len() > self.max_frame_len {
                        oversized = true;
                        break;
                    }
                } else if prev == MARKER && byte == SOI {
                    in_frame = true;
                    frame.extend_from_slice(&[MARKER, SOI]);
                }
                prev = byte;
            }
            self.inner.consume(consumed);

            if complete {
                return Ok(Some(frame));
            }
            if oversized {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("MJPEG frame exceeds {} bytes", self.max_frame_len),
                ));
            }
        }
    }
}

/// Width and height from the first SOF segment of a JPEG image.
pub fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 4 || data[0] != MARKER || data[1] != SOI {
        return None;
    }

    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != MARKER {
            return None;
        }
        let marker = data[pos + 1];
        // Fill bytes and standalone markers carry no length field.
        if marker == MARKER {
            pos += 1;
            continue;
        }
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }

        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            if pos + 9 > data.len() {
                return None;
            }
            let height = u16::from_be_bytes([data[pos + 5], data[pos + 6]]) as u32;
            let width = u16::from_be_bytes([data[pos + 7], data[pos + 8]]) as u32;
            return Some((width, height));
        }
        if marker == 0xDA {
            // Start of scan without a frame header.
            return None;
        }
        pos += 2 + len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_jpeg_frame;

    #[test]
    fn test_splits_concatenated_images() {
        let first = synthetic_jpeg_frame(1, 16, 8);
        let second = synthetic_jpeg_frame(2, 32, 16);

        let mut stream = vec![0x00, 0x12, 0xFF];
        stream.extend_from_slice(&first);
        stream.extend_from_slice(b"junk");
        stream.extend_from_slice(&second);

        let mut reader = MjpegReader::new(stream.as_slice());
        assert_eq!(reader.next_frame().unwrap(), Some(first));
        assert_eq!(reader.next_frame().unwrap(), Some(second));
        assert_eq!(reader.next_frame().unwrap(), None);
    }

    #[test]
    fn test_partial_trailing_image_is_dropped() {
        let image = synthetic_jpeg_frame(3, 16, 16);
        let truncated = &image[..image.len() / 2];
        let mut reader = MjpegReader::new(truncated);
        assert_eq!(reader.next_frame().unwrap(), None);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let image = synthetic_jpeg_frame(4, 64, 64);
        let mut reader = MjpegReader::new(image.as_slice()).with_max_frame_len(8);
        assert!(reader.next_frame().is_err());
    }

    #[test]
    fn test_dimensions_from_header() {
        let image = synthetic_jpeg_frame(5, 40, 24);
        assert_eq!(jpeg_dimensions(&image), Some((40, 24)));
    }

    #[test]
    fn test_dimensions_of_garbage() {
        assert_eq!(jpeg_dimensions(b"not a jpeg"), None);
        assert_eq!(jpeg_dimensions(&[0xFF, 0xD8]), None);
    }
}
