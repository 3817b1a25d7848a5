//! Reusable packet buffers for the capture -> relay path.

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A fixed-capacity frame buffer.
///
/// Only the first `len()` bytes are meaningful; the rest is whatever a previous
/// frame left behind.
pub struct PacketBuffer {
    size: usize,
    payload: Box<[u8]>,
}

impl PacketBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            size: 0,
            payload: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.payload.len()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Record how many bytes of the payload hold the current frame.
    pub fn set_len(&mut self, size: usize) {
        self.size = size.min(self.payload.len());
    }

    /// The meaningful bytes of the current frame.
    pub fn frame(&self) -> &[u8] {
        &self.payload[..self.size]
    }

    /// Whole payload, for a read to fill.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }
}

/// Pool of MTU-sized packet buffers.
///
/// Buffers move by value, so a buffer can only be released once per acquire.
pub struct BufferPool {
    idle: SegQueue<PacketBuffer>,
    buffer_size: usize,
    allocated: AtomicUsize,
}

impl BufferPool {
    /// Create an empty pool handing out buffers of `buffer_size` bytes.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            idle: SegQueue::new(),
            buffer_size,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Take an idle buffer, allocating a new one if none is available.
    pub fn acquire(&self) -> PacketBuffer {
        match self.idle.pop() {
            Some(mut buffer) => {
                buffer.size = 0;
                buffer
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                PacketBuffer::with_capacity(self.buffer_size)
            }
        }
    }

    /// Return a buffer for reuse. Contents are not cleared.
    pub fn release(&self, buffer: PacketBuffer) {
        self.idle.push(buffer);
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Buffers currently sitting idle in the pool
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Buffers ever allocated by the pool
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Buffers currently held outside the pool
    pub fn in_flight(&self) -> usize {
        self.allocated().saturating_sub(self.idle_count())
    }
}
