//! Correlation id generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of correlation ids for requests expecting a reply.
///
/// Implementations must never return 0 (reserved for "no reply expected")
/// and must not repeat an id while a request carrying it can still be
/// pending.
pub trait IdGenerator: Send + Sync + 'static {
    /// Next correlation id.
    fn next_id(&self) -> u64;
}

/// Monotonic counter starting at 1, skipping 0 on wrap-around.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    /// Counter whose first id is 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Counter whose first id is `start` (or 1 if `start` is 0).
    pub fn starting_at(start: u64) -> Self {
        Self { next: AtomicU64::new(start) }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> u64 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}
