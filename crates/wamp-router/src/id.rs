//! Id allocation
//!
//! Ids are handed out from a counter that wraps inside `[1, 2^53)`, so every
//! id stays representable as an IEEE double on the client side.

use std::sync::atomic::{AtomicU64, Ordering};
use wamp_core::{Id, MAX_ID};

/// Monotonic id source shared across tasks
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(first: Id) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Take the next id
    pub fn next(&self) -> Id {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current + 1 >= MAX_ID { 1 } else { current + 1 })
            })
            .unwrap_or_else(|current| current)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
