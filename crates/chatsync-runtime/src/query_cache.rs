//! In-memory read-through query cache
//!
//! Default [`QueryCache`] used by the engine when the host does not bring its own.
//! Entries go stale after a fixed age or when invalidated; a stale entry reads as
//! a miss so the caller refetches.

use std::time::Duration;

use chatsync_core::{QueryCache, QueryKey, QueryValue};
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone)]
struct Entry {
    value: QueryValue,
    fetched_at: Instant,
    invalidated: bool,
}

/// Keyed cache with staleness and explicit invalidation
#[derive(Debug)]
pub struct InMemoryQueryCache {
    entries: DashMap<QueryKey, Entry>,
    stale_after: Duration,
}

impl InMemoryQueryCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            stale_after,
        }
    }

    /// Whether the key has been invalidated since it was last set
    pub fn is_invalidated(&self, key: &QueryKey) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.invalidated)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl QueryCache for InMemoryQueryCache {
    fn get(&self, key: &QueryKey) -> Option<QueryValue> {
        let entry = self.entries.get(key)?;
        if entry.invalidated || entry.fetched_at.elapsed() >= self.stale_after {
            trace!(%key, "Query cache miss");
            return None;
        }
        Some(entry.value.clone())
    }

    fn set(&self, key: QueryKey, value: QueryValue) {
        self.entries.insert(
            key,
            Entry {
                value,
                fetched_at: Instant::now(),
                invalidated: false,
            },
        );
    }

    fn invalidate(&self, key: &QueryKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.invalidated = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_core::ConversationId;

    #[tokio::test]
    async fn test_set_get_invalidate() {
        let cache = InMemoryQueryCache::new(Duration::from_secs(30));
        let key = QueryKey::Messages(ConversationId::new("c1"));
        assert!(cache.get(&key).is_none());

        cache.set(key.clone(), QueryValue::Messages(Vec::new()));
        assert_eq!(cache.get(&key), Some(QueryValue::Messages(Vec::new())));

        cache.invalidate(&key);
        assert!(cache.is_invalidated(&key));
        assert!(cache.get(&key).is_none());

        cache.set(key.clone(), QueryValue::Messages(Vec::new()));
        assert!(cache.get(&key).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_go_stale() {
        let cache = InMemoryQueryCache::new(Duration::from_secs(30));
        cache.set(QueryKey::Conversations, QueryValue::Conversations(Vec::new()));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.get(&QueryKey::Conversations).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&QueryKey::Conversations).is_none());
    }

    #[test]
    fn test_invalidate_missing_key_is_noop() {
        let cache = InMemoryQueryCache::new(Duration::from_secs(1));
        cache.invalidate(&QueryKey::Conversations);
        assert!(cache.is_empty());
    }
}
