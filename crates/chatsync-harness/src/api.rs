//! Mock remote message API
//!
//! In-memory backend with the two demo conversations the app ships with.
//! Sends return the server copy with an `m<N>` id and update the conversation
//! summary; failures, latency and a hold gate for in-flight sends are scriptable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chatsync_core::{
    sort_most_recent_first, ConversationId, ConversationSummary, Message, MessageApi, MessageId,
    RemoteError, SendError, SenderType,
};
use chrono::Utc;
use tokio::sync::watch;
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// First server id handed out when none is configured
const DEFAULT_FIRST_ID: u64 = 100;

// ----------------------------------------------------------------------------
// Seed Data
// ----------------------------------------------------------------------------

/// The demo conversations and their history, timestamped relative to now
pub fn seed_data() -> (Vec<ConversationSummary>, Vec<Message>) {
    let now = Utc::now();
    let minutes = chrono::Duration::minutes;

    let conversations = vec![
        ConversationSummary {
            id: "c1".into(),
            customer_name: "Nimal Perera".to_string(),
            last_message: "2 chicken kottu no spicy and 1 coke deliver today".to_string(),
            unread_count: 2,
            last_timestamp: now - minutes(4),
            has_active_order: true,
        },
        ConversationSummary {
            id: "c2".into(),
            customer_name: "Sahan Grocery".to_string(),
            last_message: "Do you have 5kg samba rice?".to_string(),
            unread_count: 0,
            last_timestamp: now - minutes(60),
            has_active_order: false,
        },
    ];

    let messages = vec![
        Message::new(
            MessageId::new("m1"),
            "c1".into(),
            SenderType::Customer,
            "2 chicken kottu no spicy and 1 coke deliver today",
            now - minutes(6),
        ),
        Message::new(
            MessageId::new("m2"),
            "c1".into(),
            SenderType::Business,
            "Sure, can I confirm your address?",
            now - minutes(4),
        ),
    ];

    (conversations, messages)
}

// ----------------------------------------------------------------------------
// Mock Message API
// ----------------------------------------------------------------------------

#[derive(Default)]
struct ApiState {
    conversations: Vec<ConversationSummary>,
    messages: Vec<Message>,
    send_failures: VecDeque<SendError>,
    offline: bool,
    unavailable: bool,
    latency: Duration,
    sent: Vec<(ConversationId, String)>,
}

struct ApiInner {
    state: Mutex<ApiState>,
    /// `true` while sends are held
    gate: watch::Sender<bool>,
    attempts: AtomicU64,
    next_id: AtomicU64,
}

/// Scriptable [`MessageApi`]
#[derive(Clone)]
pub struct MockMessageApi {
    inner: Arc<ApiInner>,
}

impl MockMessageApi {
    /// Empty backend
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            inner: Arc::new(ApiInner {
                state: Mutex::new(ApiState::default()),
                gate,
                attempts: AtomicU64::new(0),
                next_id: AtomicU64::new(DEFAULT_FIRST_ID),
            }),
        }
    }

    /// Backend preloaded with the demo conversations
    pub fn seeded() -> Self {
        let api = Self::new();
        let (conversations, messages) = seed_data();
        {
            let mut state = lock(&api.inner.state);
            state.conversations = conversations;
            state.messages = messages;
        }
        api
    }

    /// Number used for the next server id (`m<N>`)
    pub fn set_next_id(&self, next: u64) {
        self.inner.next_id.store(next, Ordering::SeqCst);
    }

    /// Fail the next send attempt with `error`; calls queue up
    pub fn fail_next_send(&self, error: SendError) {
        lock(&self.inner.state).send_failures.push_back(error);
    }

    /// Fail every send with a network error until switched back
    pub fn set_offline(&self, offline: bool) {
        lock(&self.inner.state).offline = offline;
    }

    /// Fail the read endpoints until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.inner.state).unavailable = unavailable;
    }

    pub fn set_latency(&self, latency: Duration) {
        lock(&self.inner.state).latency = latency;
    }

    /// Park sends in flight until [`release_sends`](Self::release_sends)
    pub fn hold_sends(&self) {
        self.inner.gate.send_replace(true);
    }

    pub fn release_sends(&self) {
        self.inner.gate.send_replace(false);
    }

    /// Add a message to the server-side history
    pub fn add_message(&self, message: Message) {
        lock(&self.inner.state).messages.push(message);
    }

    /// Successful sends, in completion order
    pub fn sent(&self) -> Vec<(ConversationId, String)> {
        lock(&self.inner.state).sent.clone()
    }

    /// Every send attempt, including failed ones
    pub fn send_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    fn latency(&self) -> Duration {
        lock(&self.inner.state).latency
    }

    async fn simulate_latency(&self) {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MockMessageApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageApi for MockMessageApi {
    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<Message, SendError> {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.simulate_latency().await;

        let mut gate = self.inner.gate.subscribe();
        let released = gate.wait_for(|held| !*held).await.is_ok();
        if !released {
            return Err(SendError::Network {
                reason: "backend gone".to_string(),
            });
        }

        let mut state = lock(&self.inner.state);
        if let Some(error) = state.send_failures.pop_front() {
            debug!(attempt, %conversation_id, %error, "Mock send failed");
            return Err(error);
        }
        if state.offline {
            return Err(SendError::Network {
                reason: "backend offline".to_string(),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let message = Message::new(
            MessageId::new(format!("m{id}")),
            conversation_id.clone(),
            SenderType::Business,
            text,
            Utc::now(),
        );
        state.messages.push(message.clone());
        if let Some(summary) = state
            .conversations
            .iter_mut()
            .find(|summary| &summary.id == conversation_id)
        {
            summary.last_message = text.to_string();
            summary.last_timestamp = message.timestamp;
        }
        state.sent.push((conversation_id.clone(), text.to_string()));
        debug!(attempt, %conversation_id, message_id = %message.id, "Mock send accepted");
        Ok(message)
    }

    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RemoteError> {
        self.simulate_latency().await;
        let state = lock(&self.inner.state);
        if state.unavailable {
            return Err(RemoteError::Unavailable {
                reason: "backend unavailable".to_string(),
            });
        }

        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|message| &message.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|message| message.timestamp);
        Ok(messages)
    }

    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>, RemoteError> {
        self.simulate_latency().await;
        let state = lock(&self.inner.state);
        if state.unavailable {
            return Err(RemoteError::Unavailable {
                reason: "backend unavailable".to_string(),
            });
        }

        let mut conversations = state.conversations.clone();
        sort_most_recent_first(&mut conversations);
        Ok(conversations)
    }
}

impl core::fmt::Debug for MockMessageApi {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MockMessageApi")
            .field("send_attempts", &self.send_attempts())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_conversations_most_recent_first() {
        let api = MockMessageApi::seeded();
        let conversations = api.fetch_conversations().await.unwrap();
        let names: Vec<_> = conversations.iter().map(|c| c.customer_name.as_str()).collect();
        assert_eq!(names, vec!["Nimal Perera", "Sahan Grocery"]);
    }

    #[tokio::test]
    async fn test_send_updates_summary() {
        let api = MockMessageApi::seeded();
        api.set_next_id(9);
        let message = api.send_message(&"c2".into(), "Yes, in stock").await.unwrap();

        assert_eq!(message.id, MessageId::new("m9"));
        assert_eq!(message.sender_type, SenderType::Business);
        let conversations = api.fetch_conversations().await.unwrap();
        assert_eq!(conversations[0].id, ConversationId::new("c2"));
        assert_eq!(conversations[0].last_message, "Yes, in stock");
        assert_eq!(api.fetch_messages(&"c2".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed() {
        let api = MockMessageApi::new();
        api.fail_next_send(SendError::Rejected {
            reason: "spam".into(),
        });

        assert!(api.send_message(&"c1".into(), "hi").await.is_err());
        assert!(api.send_message(&"c1".into(), "hi").await.is_ok());
        assert_eq!(api.send_attempts(), 2);
        assert_eq!(api.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_held_sends_wait_for_release() {
        let api = MockMessageApi::new();
        api.hold_sends();

        let pending = tokio::spawn({
            let api = api.clone();
            async move { api.send_message(&"c1".into(), "later").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());

        api.release_sends();
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_reads() {
        let api = MockMessageApi::seeded();
        api.set_unavailable(true);
        assert!(api.fetch_messages(&"c1".into()).await.is_err());
        assert!(api.fetch_conversations().await.is_err());
    }
}
