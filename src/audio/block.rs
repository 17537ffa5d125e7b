//! Pooled byte blocks for pre-buffered audio data.
//!
//! Converted audio is staged in `DataBlock`s that move between a shared
//! bounded pool and one layer's ready queue. Ownership is structural:
//! blocks are passed by value on checkout and return, so a block always
//! has exactly one owner.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering::Relaxed},
};

use parking_lot::Mutex;

/// A reusable byte buffer with write and read cursors, counted in frames.
#[derive(Debug, Default)]
pub struct DataBlock {
    /// Converted audio bytes. Grown on demand, reused across checkouts.
    pub data: Vec<u8>,
    /// Frames written into `data` by the producer.
    pub frames_written: usize,
    /// Frames already drained by the consumer.
    pub frames_read: usize,
}

impl DataBlock {
    /// Frames written but not yet read.
    #[must_use]
    pub fn frames_available(&self) -> usize {
        self.frames_written - self.frames_read
    }

    /// Grows the buffer to hold at least `bytes`. Returns how many bytes
    /// were newly allocated.
    pub fn ensure_capacity(&mut self, bytes: usize) -> usize {
        if self.data.len() >= bytes {
            return 0;
        }
        let grown = bytes - self.data.len();
        self.data.resize(bytes, 0);
        grown
    }
}

/// A bounded pool of data blocks shared by every audio layer.
///
/// Checkout hands a block out by value; giving one back keeps at most
/// `capacity` blocks for reuse and drops the rest. The capacity doubles
/// as the per-layer ready-queue bound: a layer holding `capacity` ready
/// blocks evicts the oldest before producing more.
#[derive(Clone)]
pub struct BlockPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<DataBlock>>,
    capacity: usize,
    allocated_bytes: AtomicUsize,
}

impl BlockPool {
    /// Default number of blocks kept for reuse.
    ///
    /// Each block holds roughly one update tick's worth of audio. Unless
    /// the backend lags significantly there should never be more than a
    /// couple of blocks ready.
    pub const DEFAULT_CAPACITY: usize = 10;

    /// Creates a pool that retains at most `capacity` blocks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        BlockPool {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                capacity: capacity.max(1),
                allocated_bytes: AtomicUsize::new(0),
            }),
        }
    }

    /// Maximum number of blocks retained, and the ready-queue bound.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Takes a block out of the pool, allocating a fresh one if empty.
    #[must_use]
    pub fn checkout(&self) -> DataBlock {
        self.inner.free.lock().pop().unwrap_or_default()
    }

    /// Returns a block to the pool for reuse.
    ///
    /// Blocks beyond the capacity are dropped so memory stays bounded.
    pub fn give_back(&self, mut block: DataBlock) {
        block.frames_written = 0;
        block.frames_read = 0;

        let mut free = self.inner.free.lock();
        if free.len() < self.inner.capacity {
            free.push(block);
        } else {
            // Dropped for good; its bytes no longer count as live.
            self.inner.allocated_bytes.fetch_sub(block.data.len(), Relaxed);
        }
    }

    /// Records bytes newly allocated inside a checked-out block.
    pub fn note_allocated(&self, bytes: usize) {
        if bytes != 0 {
            self.inner.allocated_bytes.fetch_add(bytes, Relaxed);
        }
    }

    /// Total bytes currently allocated across live blocks.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.load(Relaxed)
    }
}

impl Default for BlockPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
