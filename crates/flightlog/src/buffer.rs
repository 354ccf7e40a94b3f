//! Fixed-capacity ring buffer between a producer and the storage worker.
//!
//! The producer appends without ever blocking; the worker drains in
//! block-sized spans. All cursor arithmetic lives in this module.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default drain granularity, one device block.
pub const BLOCK_SIZE: usize = 512;

/// Smallest ring, in blocks.
pub const MIN_BLOCKS: usize = 2;

/// A contiguous region of the ring, ready to be written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Byte offset into the ring.
    pub offset: usize,
    /// Number of bytes.
    pub len: usize,
}

/// Circular byte buffer with head (write) and tail (flush) cursors.
///
/// `unflushed()` is always strictly less than the capacity: the buffer holds
/// at most `capacity - 1` bytes. Appending more than [`free`](Self::free)
/// bytes laps the tail and silently overwrites unflushed data; callers that
/// care check first.
#[derive(Debug)]
pub struct StreamBuffer {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
    block_size: usize,
}

impl StreamBuffer {
    /// Create a ring of `capacity` bytes draining in [`BLOCK_SIZE`] units.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_block_size(capacity, BLOCK_SIZE)
    }

    /// Create a ring with a custom drain granularity.
    ///
    /// Capacities that are a multiple of `block_size` keep every drained
    /// span block-aligned across wrap-around. The ring holds one byte less
    /// than its capacity, so capacities below two blocks are raised to two
    /// blocks; a smaller ring could never fill a whole block.
    #[must_use]
    pub fn with_block_size(capacity: usize, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let capacity = capacity.max(MIN_BLOCKS * block_size);
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            block_size,
        }
    }

    /// Total size of the ring.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Drain granularity.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Write cursor.
    #[must_use]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Flush cursor.
    #[must_use]
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Bytes appended but not yet written to the device.
    #[must_use]
    pub fn unflushed(&self) -> usize {
        let cap = self.capacity();
        (self.head % cap + cap - self.tail % cap) % cap
    }

    /// Bytes that can be appended without lapping the tail.
    #[must_use]
    pub fn free(&self) -> usize {
        self.capacity() - 1 - self.unflushed()
    }

    /// Copy `bytes` in at the head and advance it, wrapping as needed.
    pub fn append(&mut self, bytes: &[u8]) {
        let cap = self.capacity();
        // only the last `cap` bytes can survive a single append
        let bytes = &bytes[bytes.len().saturating_sub(cap)..];
        let first = bytes.len().min(cap - self.head);
        self.buf[self.head..self.head + first].copy_from_slice(&bytes[..first]);
        let rest = &bytes[first..];
        self.buf[..rest.len()].copy_from_slice(rest);
        self.head = (self.head + bytes.len()) % cap;
    }

    /// The next span worth writing, if at least one block is pending.
    ///
    /// The span never crosses the end of the ring and is rounded down to a
    /// whole number of blocks. The only short span is the stretch up to the
    /// end of the ring when the tail has fallen off block alignment; the
    /// next call then resumes aligned from offset zero.
    #[must_use]
    pub fn drain_ready(&self) -> Option<Span> {
        let pending = self.unflushed();
        if pending < self.block_size {
            return None;
        }
        let contiguous = pending.min(self.capacity() - self.tail);
        let blocks = contiguous / self.block_size * self.block_size;
        let len = if blocks == 0 { contiguous } else { blocks };
        Some(Span {
            offset: self.tail,
            len,
        })
    }

    /// The next contiguous span of whatever is pending, for a final flush.
    #[must_use]
    pub fn drain_remaining(&self) -> Option<Span> {
        let pending = self.unflushed();
        if pending == 0 {
            return None;
        }
        Some(Span {
            offset: self.tail,
            len: pending.min(self.capacity() - self.tail),
        })
    }

    /// The bytes covered by `span`.
    #[must_use]
    pub fn bytes(&self, span: Span) -> &[u8] {
        &self.buf[span.offset..span.offset + span.len]
    }

    /// Record that `n` bytes were written out.
    pub fn advance_tail(&mut self, n: usize) {
        let n = n.min(self.unflushed());
        self.tail = (self.tail + n) % self.capacity();
    }
}

/// A ring shared between one producer and the storage worker.
pub type SharedBuffer = Arc<Mutex<StreamBuffer>>;

/// Lock a shared ring, recovering from a poisoned lock.
pub(crate) fn lock(buffer: &SharedBuffer) -> MutexGuard<'_, StreamBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer side of a stream handle.
///
/// Cloning yields another appender onto the same ring. Appends never wait
/// for the storage worker.
#[derive(Debug, Clone)]
pub struct StreamProducer {
    buffer: SharedBuffer,
}

impl StreamProducer {
    pub(crate) fn new(buffer: SharedBuffer) -> Self {
        Self { buffer }
    }

    /// Append bytes to the ring. See [`StreamBuffer::append`].
    pub fn append(&self, bytes: &[u8]) {
        lock(&self.buffer).append(bytes);
    }

    /// Append only if the bytes fit without lapping unflushed data.
    ///
    /// Returns whether the bytes were appended.
    pub fn try_append(&self, bytes: &[u8]) -> bool {
        let mut buffer = lock(&self.buffer);
        if bytes.len() > buffer.free() {
            return false;
        }
        buffer.append(bytes);
        true
    }

    /// Bytes currently waiting for the worker.
    #[must_use]
    pub fn unflushed(&self) -> usize {
        lock(&self.buffer).unflushed()
    }

    /// Room left before the tail would be lapped.
    #[must_use]
    pub fn free(&self) -> usize {
        lock(&self.buffer).free()
    }
}
