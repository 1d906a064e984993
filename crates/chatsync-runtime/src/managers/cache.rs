//! Per-conversation message cache
//!
//! The single source of truth for rendering. Each conversation has its own log
//! guarded by its own locks, so mutations of different conversations never
//! contend, while mutations of the same conversation are serialized together
//! with the subscriber notifications they trigger.
//!
//! Messages are kept in non-decreasing timestamp order: new messages are
//! inserted after the last message whose timestamp is not later than theirs,
//! so equal timestamps keep insertion order.
//!
//! Subscribers receive a snapshot of the conversation after every change and
//! must not mutate the cache from inside the handler. Reading is fine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use chatsync_core::{ConversationId, Message, MessageId};
use dashmap::DashMap;
use tracing::{debug, trace};

/// Handler invoked with the conversation's messages after each change
pub type MessageHandler = Arc<dyn Fn(&[Message]) + Send + Sync>;

/// Hook invoked after every change to any conversation
pub type ChangeHook = Arc<dyn Fn(&ConversationId, &[Message]) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Conversation Log
// ----------------------------------------------------------------------------

#[derive(Default)]
struct ConversationLog {
    /// Held across a mutation and its notifications
    order: Mutex<()>,
    state: Mutex<LogState>,
}

#[derive(Default)]
struct LogState {
    messages: Vec<Message>,
    subscribers: Vec<(u64, MessageHandler)>,
}

impl LogState {
    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    fn insert_ordered(&mut self, message: Message) {
        let position = self
            .messages
            .iter()
            .rposition(|m| m.timestamp <= message.timestamp)
            .map_or(0, |p| p + 1);
        self.messages.insert(position, message);
    }

    /// Drop the oldest confirmed messages beyond the cap
    fn evict(&mut self, max_messages: usize) -> usize {
        let mut evicted = 0;
        while self.messages.len() > max_messages {
            match self.messages.iter().position(|m| !m.is_pending()) {
                Some(oldest) => {
                    self.messages.remove(oldest);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

// ----------------------------------------------------------------------------
// Message Cache
// ----------------------------------------------------------------------------

/// Ordered per-conversation message store
pub struct MessageCache {
    conversations: DashMap<ConversationId, Arc<ConversationLog>>,
    next_subscriber: AtomicU64,
    max_messages_per_conversation: usize,
    change_hook: RwLock<Option<ChangeHook>>,
}

impl MessageCache {
    pub fn new(max_messages_per_conversation: usize) -> Self {
        Self {
            conversations: DashMap::new(),
            next_subscriber: AtomicU64::new(1),
            max_messages_per_conversation,
            change_hook: RwLock::new(None),
        }
    }

    fn log(&self, conversation_id: &ConversationId) -> Arc<ConversationLog> {
        self.conversations
            .entry(conversation_id.clone())
            .or_default()
            .clone()
    }

    /// Apply `f` to a conversation and notify if it reports a change
    fn mutate<R>(
        &self,
        conversation_id: &ConversationId,
        f: impl FnOnce(&mut LogState) -> (R, bool),
    ) -> R {
        let log = self.log(conversation_id);
        let _order = lock(&log.order);

        let (result, snapshot, handlers) = {
            let mut state = lock(&log.state);
            let (result, changed) = f(&mut state);
            if !changed {
                return result;
            }
            let evicted = state.evict(self.max_messages_per_conversation);
            if evicted > 0 {
                debug!(%conversation_id, evicted, "Evicted old messages");
            }
            let handlers: Vec<MessageHandler> =
                state.subscribers.iter().map(|(_, h)| h.clone()).collect();
            (result, state.messages.clone(), handlers)
        };

        trace!(%conversation_id, subscribers = handlers.len(), "Notifying subscribers");
        for handler in handlers {
            handler(&snapshot);
        }
        if let Some(hook) = self.change_hook() {
            hook(conversation_id, &snapshot);
        }
        result
    }

    /// Append a message; ignored if the conversation already holds its id
    pub fn append(&self, conversation_id: &ConversationId, message: Message) -> bool {
        self.mutate(conversation_id, |state| {
            if state.position(&message.id).is_some() {
                debug!(%conversation_id, message_id = %message.id, "Ignoring duplicate message");
                return (false, false);
            }
            state.insert_ordered(message);
            (true, true)
        })
    }

    /// Swap a placeholder for its server-confirmed copy
    ///
    /// Correlation is by placeholder id only. If the confirmed id is already
    /// present (its echo arrived first) the placeholder is simply dropped. If the
    /// placeholder is gone the confirmed copy is still inserted, since the server
    /// has it. Returns whether the placeholder was found.
    pub fn replace(
        &self,
        conversation_id: &ConversationId,
        temp_id: &MessageId,
        confirmed: Message,
    ) -> bool {
        self.mutate(conversation_id, |state| {
            let found = match state.position(temp_id) {
                Some(position) => {
                    state.messages.remove(position);
                    true
                }
                None => false,
            };
            let inserted = if state.position(&confirmed.id).is_none() {
                state.insert_ordered(confirmed);
                true
            } else {
                false
            };
            (found, found || inserted)
        })
    }

    /// Remove a message by id
    pub fn remove(&self, conversation_id: &ConversationId, temp_id: &MessageId) -> Option<Message> {
        self.mutate(conversation_id, |state| match state.position(temp_id) {
            Some(position) => (Some(state.messages.remove(position)), true),
            None => (None, false),
        })
    }

    /// Merge fetched history into the conversation, skipping known ids
    pub fn hydrate(&self, conversation_id: &ConversationId, messages: Vec<Message>) -> usize {
        self.mutate(conversation_id, |state| {
            let mut added = 0;
            for message in messages {
                if state.position(&message.id).is_none() {
                    state.insert_ordered(message);
                    added += 1;
                }
            }
            (added, added > 0)
        })
    }

    /// Ordered copy of a conversation's messages
    pub fn get(&self, conversation_id: &ConversationId) -> Vec<Message> {
        match self.conversations.get(conversation_id) {
            Some(log) => lock(&log.state).messages.clone(),
            None => Vec::new(),
        }
    }

    /// Whether a conversation holds a message with this id
    pub fn contains(&self, conversation_id: &ConversationId, id: &MessageId) -> bool {
        self.conversations
            .get(conversation_id)
            .is_some_and(|log| lock(&log.state).position(id).is_some())
    }

    /// Register a handler; it is invoked immediately with the current messages
    pub fn subscribe(&self, conversation_id: &ConversationId, handler: MessageHandler) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let log = self.log(conversation_id);
        let _order = lock(&log.order);

        let snapshot = {
            let mut state = lock(&log.state);
            state.subscribers.push((id, handler.clone()));
            state.messages.clone()
        };
        handler(&snapshot);

        Subscription {
            log: Arc::downgrade(&log),
            id,
            conversation_id: conversation_id.clone(),
        }
    }

    /// Number of live subscribers across all conversations
    pub fn subscriber_count(&self) -> usize {
        self.conversations
            .iter()
            .map(|entry| lock(&entry.value().state).subscribers.len())
            .sum()
    }

    /// Drop every subscriber and the change hook
    pub fn clear_subscribers(&self) {
        for entry in self.conversations.iter() {
            lock(&entry.value().state).subscribers.clear();
        }
        self.set_change_hook(None);
    }

    pub fn set_change_hook(&self, hook: Option<ChangeHook>) {
        *self.change_hook.write().unwrap_or_else(PoisonError::into_inner) = hook;
    }

    fn change_hook(&self) -> Option<ChangeHook> {
        self.change_hook
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        self.conversations.iter().map(|e| e.key().clone()).collect()
    }
}

impl core::fmt::Debug for MessageCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageCache")
            .field("conversations", &self.conversations.len())
            .field(
                "max_messages_per_conversation",
                &self.max_messages_per_conversation,
            )
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Subscription
// ----------------------------------------------------------------------------

/// Unsubscribe token; dropping it removes the handler
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    log: Weak<ConversationLog>,
    id: u64,
    conversation_id: ConversationId,
}

impl Subscription {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(log) = self.log.upgrade() {
            lock(&log.state).subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("conversation_id", &self.conversation_id)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_core::{PendingMessage, SenderType};
    use chrono::{DateTime, Duration, Utc};

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn message(id: &str, conversation: &str, secs: i64) -> Message {
        Message::new(
            MessageId::new(id),
            conversation.into(),
            SenderType::Customer,
            format!("text {id}"),
            base() + Duration::seconds(secs),
        )
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    fn recorder() -> (MessageHandler, Arc<Mutex<Vec<Vec<String>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |messages: &[Message]| {
            sink.lock()
                .unwrap()
                .push(messages.iter().map(|m| m.id.to_string()).collect());
        });
        (handler, seen)
    }

    #[test]
    fn test_append_keeps_timestamp_order() {
        let cache = MessageCache::new(100);
        let c1 = ConversationId::new("c1");
        cache.append(&c1, message("m1", "c1", 0));
        cache.append(&c1, message("m3", "c1", 20));
        cache.append(&c1, message("m2", "c1", 10));
        cache.append(&c1, message("m4", "c1", 20));

        assert_eq!(ids(&cache.get(&c1)), vec!["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn test_duplicate_ids_ignored() {
        let cache = MessageCache::new(100);
        let c1 = ConversationId::new("c1");
        assert!(cache.append(&c1, message("m1", "c1", 0)));
        assert!(!cache.append(&c1, message("m1", "c1", 5)));
        assert_eq!(cache.get(&c1).len(), 1);
    }

    #[test]
    fn test_replace_matches_placeholder_not_text() {
        let cache = MessageCache::new(100);
        let c1 = ConversationId::new("c1");
        let first = PendingMessage::new(c1.clone(), "Same", MessageId::placeholder(1));
        let second = PendingMessage::new(c1.clone(), "Same", MessageId::placeholder(2));
        cache.append(&c1, Message::optimistic(&first, base()));
        cache.append(&c1, Message::optimistic(&second, base()));

        let confirmed = Message {
            id: MessageId::new("m9"),
            ..Message::optimistic(&second, base() + Duration::seconds(1))
        };
        assert!(cache.replace(&c1, &MessageId::placeholder(2), confirmed));

        assert_eq!(ids(&cache.get(&c1)), vec!["temp-1", "m9"]);
    }

    #[test]
    fn test_replace_when_echo_already_arrived() {
        let cache = MessageCache::new(100);
        let c1 = ConversationId::new("c1");
        let pending = PendingMessage::new(c1.clone(), "Hi", MessageId::placeholder(1));
        cache.append(&c1, Message::optimistic(&pending, base()));
        cache.append(&c1, message("m10", "c1", 1));

        assert!(cache.replace(&c1, &MessageId::placeholder(1), message("m10", "c1", 1)));
        assert_eq!(ids(&cache.get(&c1)), vec!["m10"]);
    }

    #[test]
    fn test_remove_rolls_back() {
        let cache = MessageCache::new(100);
        let c1 = ConversationId::new("c1");
        cache.append(&c1, message("temp-1", "c1", 0));
        assert!(cache.remove(&c1, &MessageId::placeholder(1)).is_some());
        assert!(cache.remove(&c1, &MessageId::placeholder(1)).is_none());
        assert!(cache.get(&c1).is_empty());
    }

    #[test]
    fn test_conversations_are_isolated() {
        let cache = MessageCache::new(100);
        cache.append(&"c1".into(), message("m1", "c1", 0));
        cache.append(&"c2".into(), message("m1", "c2", 0));
        assert_eq!(cache.get(&"c1".into()).len(), 1);
        assert_eq!(cache.get(&"c2".into()).len(), 1);
        assert!(cache.get(&"c3".into()).is_empty());
    }

    #[test]
    fn test_subscribe_sees_existing_and_later_changes() {
        let cache = MessageCache::new(100);
        let c2 = ConversationId::new("c2");
        cache.append(&c2, message("m1", "c2", 0));

        let (handler, seen) = recorder();
        let subscription = cache.subscribe(&c2, handler);
        cache.append(&c2, message("m2", "c2", 1));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec!["m1".to_string()], vec!["m1".to_string(), "m2".to_string()]]
        );

        drop(subscription);
        cache.append(&c2, message("m3", "c2", 2));
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(cache.subscriber_count(), 0);
    }

    #[test]
    fn test_unchanged_mutation_does_not_notify() {
        let cache = MessageCache::new(100);
        let c1 = ConversationId::new("c1");
        let (handler, seen) = recorder();
        let _subscription = cache.subscribe(&c1, handler);

        cache.remove(&c1, &MessageId::placeholder(7));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_hydrate_merges_without_duplicates() {
        let cache = MessageCache::new(100);
        let c1 = ConversationId::new("c1");
        cache.append(&c1, message("m2", "c1", 10));
        cache.append(&c1, message("temp-1", "c1", 30));

        let added = cache.hydrate(&c1, vec![message("m1", "c1", 0), message("m2", "c1", 10)]);
        assert_eq!(added, 1);
        assert_eq!(ids(&cache.get(&c1)), vec!["m1", "m2", "temp-1"]);
    }

    #[test]
    fn test_eviction_spares_pending() {
        let cache = MessageCache::new(2);
        let c1 = ConversationId::new("c1");
        cache.append(&c1, message("m1", "c1", 0));
        cache.append(&c1, message("temp-1", "c1", 1));
        cache.append(&c1, message("m2", "c1", 2));

        assert_eq!(ids(&cache.get(&c1)), vec!["temp-1", "m2"]);
    }

    #[test]
    fn test_change_hook_and_clear() {
        let cache = MessageCache::new(100);
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        cache.set_change_hook(Some(Arc::new(move |_: &ConversationId, _: &[Message]| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        let (handler, _) = recorder();
        let _subscription = cache.subscribe(&"c1".into(), handler);

        cache.append(&"c1".into(), message("m1", "c1", 0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.clear_subscribers();
        cache.append(&"c1".into(), message("m2", "c1", 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.subscriber_count(), 0);
    }
}
