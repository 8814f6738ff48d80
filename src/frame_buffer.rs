//! Latest-frame slot shared between the production thread and readers.

use bytes::Bytes;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Slot {
    bytes: Option<Bytes>,
    sequence: u64,
}

/// Holds the most recent encoded frame. The writer swaps in a new `Bytes`
/// (a refcount bump) under the lock; readers clone it out the same way, so
/// neither side ever waits on encoding or I/O.
#[derive(Default)]
pub struct FrameBuffer {
    inner: Mutex<Slot>,
    cv: Condvar,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new frame and return its sequence number (starting at 1).
    pub fn publish(&self, bytes: Bytes) -> u64 {
        let mut slot = self.lock();
        slot.sequence = slot.sequence.saturating_add(1);
        slot.bytes = Some(bytes);
        let sequence = slot.sequence;
        drop(slot);
        self.cv.notify_all();
        sequence
    }

    pub fn latest(&self) -> Option<Bytes> {
        self.lock().bytes.clone()
    }

    pub fn latest_with_sequence(&self) -> Option<(u64, Bytes)> {
        let slot = self.lock();
        slot.bytes.clone().map(|b| (slot.sequence, b))
    }

    /// 0 until the first frame is published.
    pub fn sequence(&self) -> u64 {
        self.lock().sequence
    }

    /// Block until a frame newer than `after` exists or `timeout` elapses.
    pub fn wait_newer(&self, after: u64, timeout: Duration) -> Option<(u64, Bytes)> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if slot.sequence > after {
                if let Some(bytes) = slot.bytes.clone() {
                    return Some((slot.sequence, bytes));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .cv
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }

    /// Back to the never-captured state.
    pub fn clear(&self) {
        let mut slot = self.lock();
        slot.bytes = None;
        slot.sequence = 0;
        drop(slot);
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_empty_buffer() {
        let buffer = FrameBuffer::new();
        assert!(buffer.latest().is_none());
        assert_eq!(buffer.sequence(), 0);
        assert!(buffer.wait_newer(0, Duration::ZERO).is_none());
    }

    #[test]
    fn test_latest_wins() {
        let buffer = FrameBuffer::new();
        assert_eq!(buffer.publish(Bytes::from_static(b"one")), 1);
        assert_eq!(buffer.publish(Bytes::from_static(b"two")), 2);
        assert_eq!(buffer.latest().unwrap().as_ref(), b"two");
        assert_eq!(buffer.latest_with_sequence().unwrap().0, 2);
    }

    #[test]
    fn test_clear_resets_sequence() {
        let buffer = FrameBuffer::new();
        buffer.publish(Bytes::from_static(b"frame"));
        buffer.clear();
        assert!(buffer.latest().is_none());
        assert_eq!(buffer.sequence(), 0);
    }

    #[test]
    fn test_wait_newer_wakes_on_publish() {
        let buffer = Arc::new(FrameBuffer::new());
        let writer = buffer.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.publish(Bytes::from_static(b"late"));
        });

        let (seq, bytes) = buffer
            .wait_newer(0, Duration::from_secs(5))
            .expect("frame should arrive");
        assert_eq!(seq, 1);
        assert_eq!(bytes.as_ref(), b"late");
        handle.join().unwrap();
    }

    #[test]
    fn test_readers_see_monotonic_sequence() {
        let buffer = Arc::new(FrameBuffer::new());
        let writer = buffer.clone();
        let handle = thread::spawn(move || {
            for i in 0..500u32 {
                writer.publish(Bytes::from(i.to_le_bytes().to_vec()));
            }
        });

        let mut last = 0;
        while last < 500 {
            if let Some((seq, bytes)) = buffer.latest_with_sequence() {
                assert!(seq >= last);
                assert_eq!(bytes.len(), 4);
                last = seq;
            }
        }
        handle.join().unwrap();
    }
}
