//! Buffer Pool
//!
//! Recycles fixed-size byte buffers used by the codecs for header and
//! metadata encode/decode. Purely a throughput optimization: a pool that never
//! recycles anything behaves identically apart from allocation counts.
//!
//! Pools are owned by the component that uses them; there is no process-wide
//! pool.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// Idle buffers retained per pool unless configured otherwise
const DEFAULT_MAX_IDLE: usize = 64;

/// A pool of recyclable byte buffers of at least `block_size` bytes
#[derive(Debug)]
pub struct BufferPool {
    block_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool handing out buffers of `block_size` bytes
    pub fn new(block_size: usize) -> Self {
        Self::with_max_idle(block_size, DEFAULT_MAX_IDLE)
    }

    /// Create a pool that keeps at most `max_idle` released buffers
    pub fn with_max_idle(block_size: usize, max_idle: usize) -> Self {
        Self {
            block_size,
            max_idle,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Take a buffer with `len() == block_size()`.
    ///
    /// Contents are unspecified; callers overwrite what they use. The buffer
    /// goes back to the pool when the guard is dropped.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buf = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.block_size]);
        PooledBuffer { pool: self, buf }
    }

    /// Return a buffer explicitly (same as dropping it)
    pub fn release(&self, buffer: PooledBuffer<'_>) {
        drop(buffer);
    }

    /// Size guaranteed by every acquired buffer
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of buffers currently waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn put_back(&self, mut buf: Vec<u8>) {
        // Grown buffers keep their capacity but go back at block length.
        if buf.capacity() < self.block_size {
            return;
        }
        buf.resize(self.block_size, 0);
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }
}

/// A buffer on loan from a [`BufferPool`]
///
/// Derefs to `Vec<u8>` so it can be resized when a payload outgrows the
/// block size.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Vec<u8>,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.put_back(buf);
    }
}
