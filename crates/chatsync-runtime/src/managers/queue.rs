//! Offline outbound queue
//!
//! FIFO store of messages that could not be sent immediately. Only the send
//! coordinator writes to it. Iteration always goes through [`OutboundQueue::snapshot`]
//! so a flush pass never observes the live queue changing underneath it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chatsync_core::{MessageId, PendingMessage, SendError};
use tracing::debug;

// ----------------------------------------------------------------------------
// Outbound Queue
// ----------------------------------------------------------------------------

/// FIFO queue of pending outbound messages with a practical size cap
#[derive(Debug)]
pub struct OutboundQueue {
    entries: Mutex<VecDeque<PendingMessage>>,
    max_pending: usize,
}

impl OutboundQueue {
    pub fn new(max_pending: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_pending,
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<PendingMessage>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the tail
    pub fn enqueue(&self, pending: PendingMessage) -> Result<(), SendError> {
        let mut entries = self.entries();
        if entries.len() >= self.max_pending {
            return Err(SendError::QueueFull {
                capacity: self.max_pending,
            });
        }
        debug!(
            temp_id = %pending.temp_id,
            conversation_id = %pending.conversation_id,
            depth = entries.len() + 1,
            "Queued outbound message"
        );
        entries.push_back(pending);
        Ok(())
    }

    /// Remove the entry with this placeholder id; no-op if absent
    pub fn dequeue(&self, temp_id: &MessageId) -> Option<PendingMessage> {
        let mut entries = self.entries();
        let position = entries.iter().position(|p| &p.temp_id == temp_id)?;
        entries.remove(position)
    }

    /// Ordered copy of the queue
    pub fn snapshot(&self) -> Vec<PendingMessage> {
        self.entries().iter().cloned().collect()
    }

    pub fn contains(&self, temp_id: &MessageId) -> bool {
        self.entries().iter().any(|p| &p.temp_id == temp_id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_pending
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pending(n: u64) -> PendingMessage {
        PendingMessage::new("c1".into(), format!("message {n}"), MessageId::placeholder(n))
    }

    #[test]
    fn test_fifo_order() {
        let queue = OutboundQueue::new(10);
        queue.enqueue(pending(1)).unwrap();
        queue.enqueue(pending(2)).unwrap();
        queue.enqueue(pending(3)).unwrap();

        let ids: Vec<_> = queue.snapshot().into_iter().map(|p| p.temp_id).collect();
        assert_eq!(
            ids,
            vec![
                MessageId::placeholder(1),
                MessageId::placeholder(2),
                MessageId::placeholder(3)
            ]
        );
    }

    #[test]
    fn test_dequeue_missing_is_noop() {
        let queue = OutboundQueue::new(10);
        queue.enqueue(pending(1)).unwrap();
        assert!(queue.dequeue(&MessageId::placeholder(9)).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let queue = OutboundQueue::new(10);
        queue.enqueue(pending(1)).unwrap();
        let snapshot = queue.snapshot();
        queue.dequeue(&MessageId::placeholder(1));
        assert_eq!(snapshot.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capacity_enforced() {
        let queue = OutboundQueue::new(2);
        queue.enqueue(pending(1)).unwrap();
        queue.enqueue(pending(2)).unwrap();
        assert_eq!(
            queue.enqueue(pending(3)),
            Err(SendError::QueueFull { capacity: 2 })
        );
        assert!(!queue.contains(&MessageId::placeholder(3)));
    }

    proptest! {
        #[test]
        fn prop_dequeue_preserves_relative_order(
            count in 1u64..40,
            removals in proptest::collection::vec(1u64..40, 0..20),
        ) {
            let queue = OutboundQueue::new(100);
            for n in 1..=count {
                queue.enqueue(pending(n)).unwrap();
            }
            for n in &removals {
                queue.dequeue(&MessageId::placeholder(*n));
            }

            let expected: Vec<_> = (1..=count)
                .filter(|n| !removals.contains(n))
                .map(MessageId::placeholder)
                .collect();
            let actual: Vec<_> = queue.snapshot().into_iter().map(|p| p.temp_id).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
