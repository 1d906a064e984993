//! Placeholder id generation
//!
//! Placeholder ids are `temp-<n>` with `n` strictly increasing per engine
//! instance, so two optimistic messages never share an id even when their text
//! and timestamp are identical.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::types::MessageId;

/// Monotonic generator of placeholder message ids
#[derive(Debug)]
pub struct PlaceholderIds {
    next: AtomicU64,
}

impl PlaceholderIds {
    /// Start numbering at 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocate the next placeholder id
    pub fn next_id(&self) -> MessageId {
        MessageId::placeholder(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PlaceholderIds {
    fn default() -> Self {
        Self::new()
    }
}
