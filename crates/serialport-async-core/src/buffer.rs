//! Bounded receive buffer
//!
//! A thread-safe FIFO of bytes shared between the background reader (the
//! only producer) and any number of application readers. When a capacity is
//! configured, overflow evicts the oldest bytes first so the most recent
//! traffic is always retained.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::error::{PortError, Result};

/// Capacity-bounded FIFO byte buffer with drop-oldest overflow
#[derive(Debug, Default)]
pub struct BoundedByteQueue {
    /// Upper bound on buffered bytes (None = unbounded)
    capacity: Option<usize>,
    bytes: Mutex<VecDeque<u8>>,
}

impl BoundedByteQueue {
    /// Create a buffer. `None` means unbounded; `Some(0)` is treated as unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity: capacity.filter(|&c| c > 0),
            bytes: Mutex::new(VecDeque::new()),
        }
    }

    /// Create an unbounded buffer
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Configured capacity, if any
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Append the first `len` bytes of `data`.
    ///
    /// If the buffer would exceed its capacity, exactly enough of the oldest
    /// bytes are discarded first to make room. A single write larger than the
    /// capacity keeps only its last `capacity` bytes.
    pub fn write(&self, data: &[u8], len: usize) -> Result<()> {
        if len > data.len() {
            return Err(PortError::InvalidArgument(format!(
                "length {} exceeds buffer of {} bytes",
                len,
                data.len()
            )));
        }
        let mut chunk = &data[..len];
        let mut bytes = self.lock();

        if let Some(capacity) = self.capacity {
            let overflow = (bytes.len() + chunk.len()).saturating_sub(capacity);
            if overflow > 0 {
                let from_buffer = overflow.min(bytes.len());
                bytes.drain(..from_buffer);
                // Whatever is still over budget comes from the head of the new chunk
                chunk = &chunk[overflow - from_buffer..];
                tracing::warn!(
                    discarded = overflow,
                    capacity,
                    "receive buffer overflow, discarded oldest bytes"
                );
            }
        }

        bytes.extend(chunk);
        Ok(())
    }

    /// Append all of `data`
    pub fn write_all(&self, data: &[u8]) {
        // len == data.len() cannot fail
        let _ = self.write(data, data.len());
    }

    /// Remove up to `dst.len()` bytes from the front into `dst`.
    ///
    /// Never waits; returns 0 when the buffer is empty.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let mut bytes = self.lock();
        let count = dst.len().min(bytes.len());
        for (slot, byte) in dst.iter_mut().zip(bytes.drain(..count)) {
            *slot = byte;
        }
        count
    }

    /// Current number of buffered bytes
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Discard everything currently buffered
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        // Every critical section leaves the deque consistent, so a poisoned
        // lock is still safe to use.
        self.bytes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Map the signed capacity convention (`<= 0` means unbounded) to an `Option`
pub fn capacity_from_signed(capacity: i64) -> Option<usize> {
    if capacity > 0 {
        usize::try_from(capacity).ok()
    } else {
        None
    }
}
