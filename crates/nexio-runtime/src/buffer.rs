//! Shared per-worker output buffer
//!
//! One `OutputBuffer` exists per worker and is handed to handler writable
//! callbacks, then flushed and reset. It grows on demand up to a configured
//! ceiling. Contract: the buffer is never retained across calls; views given
//! to handlers are valid only for the duration of the callback.

use bytes::BytesMut;

/// Dynamic write buffer with a hard size ceiling
pub struct OutputBuffer {
    buf: BytesMut,
    max: usize,
}

impl OutputBuffer {
    /// Initial allocation; grows toward `max` as handlers fill it
    const INITIAL_CAPACITY: usize = 16 * 1024;

    /// Create a buffer that will never hold more than `max` bytes
    pub fn with_max(max: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(Self::INITIAL_CAPACITY.min(max)),
            max,
        }
    }

    /// Append up to `remaining()` bytes from `data`, returning how many fit
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        self.buf.extend_from_slice(&data[..n]);
        n
    }

    /// Space left before the ceiling
    #[inline]
    pub fn remaining(&self) -> usize {
        self.max - self.buf.len()
    }

    /// Bytes currently queued
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the queued bytes, leaving the buffer empty for reuse
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }

    /// Discard any queued bytes
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
