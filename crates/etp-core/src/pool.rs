//! Reusable encode buffers.
//!
//! Every emit and every acknowledgement encodes into scratch space. Pulling
//! that space from a shared `object-pool` instead of allocating per frame
//! keeps allocation churn flat under load. Buffers return to the pool when
//! the [`PooledBuf`] guard drops.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use bytes::BytesMut;
use object_pool::{Pool, ReusableOwned};

/// Initial capacity of each pooled buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;

/// Number of buffers allocated up front.
const DEFAULT_POOL_SIZE: usize = 32;

/// Buffers that grew beyond this are replaced before returning to the pool.
const MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

/// A pool of reusable byte buffers.
///
/// Cloning is cheap; clones share the same underlying pool.
#[derive(Clone)]
pub struct BufferPool {
    pool: Arc<Pool<BytesMut>>,
    buffer_capacity: usize,
}

impl BufferPool {
    /// Create a pool with default settings.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_SIZE, DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a pool pre-filled with `pool_size` buffers of
    /// `buffer_capacity` bytes.
    pub fn with_capacity(pool_size: usize, buffer_capacity: usize) -> Self {
        let pool = Pool::new(pool_size, move || BytesMut::with_capacity(buffer_capacity));
        Self { pool: Arc::new(pool), buffer_capacity }
    }

    /// Borrow an empty buffer. Falls back to a fresh allocation when the pool
    /// is drained.
    pub fn get(&self) -> PooledBuf {
        let capacity = self.buffer_capacity;
        let mut inner = self.pool.pull_owned(move || BytesMut::with_capacity(capacity));
        inner.clear();
        PooledBuf { inner, buffer_capacity: capacity }
    }

    /// Initial capacity of buffers handed out by this pool.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool").field("buffer_capacity", &self.buffer_capacity).finish()
    }
}

/// A buffer on loan from a [`BufferPool`].
///
/// Freeze encoded bytes with `split().freeze()`; the remaining capacity stays
/// with the guard and is reused once the frozen bytes are released.
pub struct PooledBuf {
    inner: ReusableOwned<BytesMut>,
    buffer_capacity: usize,
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if self.inner.capacity() > MAX_RETAINED_CAPACITY {
            *self.inner = BytesMut::with_capacity(self.buffer_capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;

    #[test]
    fn buffers_come_back_empty() {
        let pool = BufferPool::with_capacity(1, 64);
        {
            let mut buf = pool.get();
            buf.put_slice(b"stale bytes");
        }
        let buf = pool.get();
        assert!(buf.is_empty());
    }

    #[test]
    fn drained_pool_still_hands_out_buffers() {
        let pool = BufferPool::with_capacity(1, 16);
        let a = pool.get();
        let b = pool.get();
        assert!(a.capacity() >= 16);
        assert!(b.capacity() >= 16);
    }

    #[test]
    fn frozen_bytes_outlive_the_guard() {
        let pool = BufferPool::new();
        let frozen = {
            let mut buf = pool.get();
            buf.put_slice(b"payload");
            buf.split().freeze()
        };
        assert_eq!(&frozen[..], b"payload");
    }

    #[test]
    fn oversized_buffers_are_not_retained() {
        let pool = BufferPool::with_capacity(1, 16);
        {
            let mut buf = pool.get();
            buf.reserve(MAX_RETAINED_CAPACITY * 2);
        }
        let buf = pool.get();
        assert!(buf.capacity() <= MAX_RETAINED_CAPACITY);
    }
}
