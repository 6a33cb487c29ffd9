//! Monotonic request id generator.

use std::sync::atomic::{AtomicU64, Ordering};

static GLOBAL: RequestIdGenerator = RequestIdGenerator::new();

/// Hands out strictly increasing request ids, starting at 1.
///
/// Ids only need to be unique within one in-flight wire call, so separate
/// generators may hand out overlapping values.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Process-wide generator.
    pub fn global() -> &'static RequestIdGenerator {
        &GLOBAL
    }

    /// Take the next id.
    pub fn take(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Restart the sequence at 1.
    pub fn reset(&self) {
        self.next.store(1, Ordering::Relaxed);
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
