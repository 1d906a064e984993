//! Optimistic send coordination
//!
//! A send happens in two phases:
//!
//! 1. [`SendCoordinator::stage`] (synchronous) validates the text, applies a
//!    pending message to the cache and picks a route: immediate send when
//!    connected, otherwise the offline queue.
//! 2. [`SendCoordinator::deliver`] (asynchronous) performs the network send and
//!    reconciles the cache with the result.
//!
//! Reconciliation always correlates by placeholder id. Queued messages are sent
//! by [`SendCoordinator::flush`], strictly in FIFO order, stopping at the first
//! failure. A flush requested while another run is active is not lost: the
//! active run goes again once its current pass ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chatsync_core::{
    ChatSyncResult, ConversationId, EngineNotification, Message, MessageApi, MessageConfig,
    MessageId, NotificationSender, PendingMessage, PlaceholderIds, SendConfig, SendError,
    ValidationError,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn, Instrument};

use crate::lifecycle::Lifecycle;
use crate::managers::{ConnectionManager, MessageCache, OutboundQueue};
use crate::stats::EngineStats;

/// Hook invoked after a placeholder has been reconciled
pub type ConfirmationHook = Arc<dyn Fn(&ConversationId, &Message) + Send + Sync>;

// ----------------------------------------------------------------------------
// Send Outcomes
// ----------------------------------------------------------------------------

/// Route chosen for a staged send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedSend {
    /// Connected: send now
    Immediate(PendingMessage),
    /// Offline, or queued behind earlier messages
    Queued(PendingMessage),
    /// The queue refused the message; the optimistic copy was rolled back
    Rejected { temp_id: MessageId, error: SendError },
}

impl StagedSend {
    pub fn temp_id(&self) -> &MessageId {
        match self {
            StagedSend::Immediate(pending) | StagedSend::Queued(pending) => &pending.temp_id,
            StagedSend::Rejected { temp_id, .. } => temp_id,
        }
    }
}

/// Result of a send as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Confirmed by the server and reconciled in the cache
    Delivered { temp_id: MessageId, message: Message },
    /// Accepted into the offline queue; still pending in the cache
    Queued { temp_id: MessageId },
    /// Send failed; the optimistic message was rolled back
    Failed { temp_id: MessageId, error: SendError },
    /// The offline queue is full; the optimistic message was rolled back
    Rejected { temp_id: MessageId, error: SendError },
    /// Completed after the engine was shut down; nothing was changed
    Discarded { temp_id: MessageId },
}

impl SendOutcome {
    pub fn temp_id(&self) -> &MessageId {
        match self {
            SendOutcome::Delivered { temp_id, .. }
            | SendOutcome::Queued { temp_id }
            | SendOutcome::Failed { temp_id, .. }
            | SendOutcome::Rejected { temp_id, .. }
            | SendOutcome::Discarded { temp_id } => temp_id,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }

    pub fn error(&self) -> Option<&SendError> {
        match self {
            SendOutcome::Failed { error, .. } | SendOutcome::Rejected { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Summary of one flush run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Queued messages confirmed during the run
    pub sent: usize,
    /// Messages left in the queue afterwards
    pub remaining: usize,
    /// Entry whose failure stopped the run
    pub halted_on: Option<MessageId>,
    /// Another run was already in progress
    pub skipped: bool,
}

// ----------------------------------------------------------------------------
// Send Coordinator
// ----------------------------------------------------------------------------

/// Executes optimistic sends and owns the offline queue
pub struct SendCoordinator {
    cache: Arc<MessageCache>,
    queue: OutboundQueue,
    connection: Arc<ConnectionManager>,
    api: Arc<dyn MessageApi>,
    ids: PlaceholderIds,
    send_config: SendConfig,
    message_config: MessageConfig,
    notifier: NotificationSender,
    lifecycle: Lifecycle,
    stats: Arc<EngineStats>,
    flush_lock: tokio::sync::Mutex<()>,
    /// Set by every flush request, cleared when a run starts a pass for it
    flush_requested: AtomicBool,
    confirmation_hook: RwLock<Option<ConfirmationHook>>,
}

/// Construction parameters for [`SendCoordinator`]
pub struct CoordinatorParts {
    pub cache: Arc<MessageCache>,
    pub connection: Arc<ConnectionManager>,
    pub api: Arc<dyn MessageApi>,
    pub send_config: SendConfig,
    pub message_config: MessageConfig,
    pub max_pending: usize,
    pub notifier: NotificationSender,
    pub lifecycle: Lifecycle,
    pub stats: Arc<EngineStats>,
}

impl SendCoordinator {
    pub fn new(parts: CoordinatorParts) -> Self {
        Self {
            cache: parts.cache,
            queue: OutboundQueue::new(parts.max_pending),
            connection: parts.connection,
            api: parts.api,
            ids: PlaceholderIds::new(),
            send_config: parts.send_config,
            message_config: parts.message_config,
            notifier: parts.notifier,
            lifecycle: parts.lifecycle,
            stats: parts.stats,
            flush_lock: tokio::sync::Mutex::new(()),
            flush_requested: AtomicBool::new(false),
            confirmation_hook: RwLock::new(None),
        }
    }

    pub fn set_confirmation_hook(&self, hook: Option<ConfirmationHook>) {
        *self
            .confirmation_hook
            .write()
            .unwrap_or_else(PoisonError::into_inner) = hook;
    }

    /// Ordered copy of the offline queue
    pub fn pending(&self) -> Vec<PendingMessage> {
        self.queue.snapshot()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Validate, apply optimistically and choose a route
    pub fn stage(&self, conversation_id: &ConversationId, text: &str) -> ChatSyncResult<StagedSend> {
        if conversation_id.is_empty() {
            return Err(ValidationError::EmptyConversationId.into());
        }
        let text = self.message_config.normalize_text(text)?;
        if !self.lifecycle.is_alive() {
            return Err(SendError::EngineShutDown.into());
        }

        let pending = PendingMessage::new(conversation_id.clone(), text, self.ids.next_id());
        self.cache
            .append(conversation_id, Message::optimistic(&pending, Utc::now()));

        if self.connection.is_connected() {
            debug!(%conversation_id, temp_id = %pending.temp_id, "Staged immediate send");
            return Ok(StagedSend::Immediate(pending));
        }

        match self.queue.enqueue(pending.clone()) {
            Ok(()) => {
                self.stats.record_queued();
                info!(%conversation_id, temp_id = %pending.temp_id, "Message queued for delivery");
                Ok(StagedSend::Queued(pending))
            }
            Err(error) => {
                let temp_id = pending.temp_id;
                warn!(%conversation_id, %temp_id, %error, "Offline queue refused message");
                self.cache.remove(conversation_id, &temp_id);
                Ok(StagedSend::Rejected { temp_id, error })
            }
        }
    }

    /// Carry out a staged send
    pub async fn deliver(self: &Arc<Self>, staged: StagedSend) -> SendOutcome {
        match staged {
            StagedSend::Immediate(pending) => {
                let result = self.send_with_retry(&pending).await;
                self.reconcile(pending, result)
            }
            StagedSend::Queued(pending) => {
                // came online after routing; the reconnect flush may already have run
                if self.connection.is_connected() {
                    self.spawn_flush();
                }
                SendOutcome::Queued {
                    temp_id: pending.temp_id,
                }
            }
            StagedSend::Rejected { temp_id, error } => SendOutcome::Rejected { temp_id, error },
        }
    }

    /// Stage and deliver in one call
    pub async fn send(
        self: &Arc<Self>,
        conversation_id: &ConversationId,
        text: &str,
    ) -> ChatSyncResult<SendOutcome> {
        let staged = self.stage(conversation_id, text)?;
        Ok(self.deliver(staged).await)
    }

    fn reconcile(&self, pending: PendingMessage, result: Result<Message, SendError>) -> SendOutcome {
        let temp_id = pending.temp_id.clone();
        if !self.lifecycle.is_alive() {
            debug!(%temp_id, "Discarding send completion after shutdown");
            return SendOutcome::Discarded { temp_id };
        }

        match result {
            Ok(message) => {
                self.confirm(&pending, message.clone());
                self.stats.record_sent();
                SendOutcome::Delivered { temp_id, message }
            }
            Err(error) => {
                warn!(
                    conversation_id = %pending.conversation_id,
                    %temp_id,
                    %error,
                    "Send failed, rolling back"
                );
                self.cache.remove(&pending.conversation_id, &temp_id);
                self.stats.record_failed();
                let _ = self.notifier.send(EngineNotification::MessageFailed {
                    temp_id: temp_id.clone(),
                });
                SendOutcome::Failed { temp_id, error }
            }
        }
    }

    fn confirm(&self, pending: &PendingMessage, message: Message) {
        debug!(
            conversation_id = %pending.conversation_id,
            temp_id = %pending.temp_id,
            message_id = %message.id,
            "Reconciling confirmed message"
        );
        self.cache
            .replace(&pending.conversation_id, &pending.temp_id, message.clone());

        let hook = self
            .confirmation_hook
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(&pending.conversation_id, &message);
        }

        let _ = self.notifier.send(EngineNotification::MessageConfirmed {
            temp_id: pending.temp_id.clone(),
            message,
        });
    }

    /// Network send with a bounded retry budget
    async fn send_with_retry(&self, pending: &PendingMessage) -> Result<Message, SendError> {
        let max_attempts = self.send_config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .api
                .send_message(&pending.conversation_id, &pending.text)
                .await
            {
                Ok(message) => return Ok(message),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt < max_attempts && self.lifecycle.is_alive() => {
                    debug!(temp_id = %pending.temp_id, attempt, error = %err, "Retrying send");
                    tokio::time::sleep(self.send_config.retry_delay()).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(SendError::RetriesExhausted {
                        attempts: attempt,
                        last: err.to_string(),
                    })
                }
            }
        }
    }

    /// Run a flush in the background
    pub fn spawn_flush(self: &Arc<Self>) {
        let coordinator = self.clone();
        tokio::spawn(
            async move {
                coordinator.flush().await;
            }
            .in_current_span(),
        );
    }

    /// Send queued messages in FIFO order, stopping at the first failure
    ///
    /// Only one run is active at a time. A call made while another run is in
    /// progress returns a skipped report and leaves a request behind; the active
    /// run starts another pass for it once its current pass ends, even when that
    /// pass halted. Messages queued during a pass are picked up before it ends.
    pub async fn flush(&self) -> FlushReport {
        self.flush_requested.store(true, Ordering::Release);
        let mut report = FlushReport::default();
        let mut ran = false;

        loop {
            let Ok(running) = self.flush_lock.try_lock() else {
                if ran {
                    break;
                }
                debug!("Flush already in progress, request recorded");
                return FlushReport {
                    remaining: self.queue.len(),
                    skipped: true,
                    ..FlushReport::default()
                };
            };
            while self.flush_requested.swap(false, Ordering::AcqRel) {
                if !self.lifecycle.is_alive() {
                    break;
                }
                report.halted_on = None;
                self.flush_pass(&mut report).await;
            }
            drop(running);
            ran = true;

            // a request that raced the unlock would otherwise be skipped by its caller
            if !self.flush_requested.load(Ordering::Acquire) {
                break;
            }
        }

        report.remaining = self.queue.len();
        if self.lifecycle.is_alive() {
            info!(sent = report.sent, remaining = report.remaining, "Flush finished");
            let _ = self.notifier.send(EngineNotification::FlushCompleted {
                sent: report.sent,
                remaining: report.remaining,
            });
        }
        report
    }

    async fn flush_pass(&self, report: &mut FlushReport) {
        loop {
            let snapshot = self.queue.snapshot();
            if snapshot.is_empty() {
                return;
            }
            debug!(depth = snapshot.len(), "Flushing outbound queue");

            for pending in snapshot {
                if !self.lifecycle.is_alive() || !self.connection.is_connected() {
                    return;
                }
                match self.send_with_retry(&pending).await {
                    Ok(message) => {
                        if !self.lifecycle.is_alive() {
                            debug!(temp_id = %pending.temp_id, "Discarding flush completion after shutdown");
                            return;
                        }
                        self.queue.dequeue(&pending.temp_id);
                        self.confirm(&pending, message);
                        self.stats.record_flushed();
                        report.sent += 1;
                    }
                    Err(error) => {
                        warn!(
                            conversation_id = %pending.conversation_id,
                            temp_id = %pending.temp_id,
                            %error,
                            "Flush halted"
                        );
                        report.halted_on = Some(pending.temp_id);
                        return;
                    }
                }
            }
        }
    }

    pub fn clear_hooks(&self) {
        self.set_confirmation_hook(None);
    }
}

impl core::fmt::Debug for SendCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SendCoordinator")
            .field("queue", &self.queue)
            .field("send_config", &self.send_config)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_core::{create_notification_channel, ChannelConfig, EngineConfig, SenderType};
    use chatsync_harness::{MockMessageApi, MockTransport};

    struct Fixture {
        coordinator: Arc<SendCoordinator>,
        cache: Arc<MessageCache>,
        connection: Arc<ConnectionManager>,
        api: MockMessageApi,
        lifecycle: Lifecycle,
    }

    fn fixture(max_pending: usize) -> Fixture {
        let config = EngineConfig::testing();
        let lifecycle = Lifecycle::new();
        let stats = Arc::new(EngineStats::default());
        let cache = Arc::new(MessageCache::new(100));
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(MockTransport::new()),
            config.reconnect.clone(),
            lifecycle.clone(),
            stats.clone(),
        ));
        let api = MockMessageApi::new();
        let (notifier, _) = create_notification_channel(&ChannelConfig::default());
        let coordinator = Arc::new(SendCoordinator::new(CoordinatorParts {
            cache: cache.clone(),
            connection: connection.clone(),
            api: Arc::new(api.clone()),
            send_config: config.send.clone(),
            message_config: config.messages.clone(),
            max_pending,
            notifier,
            lifecycle: lifecycle.clone(),
            stats,
        }));
        Fixture {
            coordinator,
            cache,
            connection,
            api,
            lifecycle,
        }
    }

    async fn go_online(connection: &Arc<ConnectionManager>) {
        connection.connect();
        connection.mark_connected();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while !connection.is_connected() {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    fn c1() -> ConversationId {
        ConversationId::new("c1")
    }

    #[tokio::test]
    async fn test_stage_applies_pending_message() {
        let f = fixture(10);
        let staged = f.coordinator.stage(&c1(), "  Hello  ").unwrap();

        assert!(matches!(staged, StagedSend::Queued(_)));
        let messages = f.cache.get(&c1());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "Hello");
        assert_eq!(messages[0].sender_type, SenderType::Business);
        assert!(messages[0].is_pending());
    }

    #[tokio::test]
    async fn test_validation_leaves_cache_untouched() {
        let f = fixture(10);
        assert!(f.coordinator.stage(&c1(), "   ").is_err());
        assert!(f.coordinator.stage(&ConversationId::new(" "), "hi").is_err());
        assert!(f.cache.get(&c1()).is_empty());
        assert_eq!(f.coordinator.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_connected_send_reconciles() {
        let f = fixture(10);
        go_online(&f.connection).await;
        f.api.set_next_id(9);

        let outcome = f.coordinator.send(&c1(), "Hello").await.unwrap();

        assert!(outcome.is_delivered());
        let messages = f.cache.get(&c1());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, MessageId::new("m9"));
        assert!(!messages.iter().any(|m| m.id == *outcome.temp_id()));
    }

    #[tokio::test]
    async fn test_connected_failure_rolls_back() {
        let f = fixture(10);
        go_online(&f.connection).await;
        f.api.fail_next_send(SendError::Rejected {
            reason: "blocked".into(),
        });

        let outcome = f.coordinator.send(&c1(), "X").await.unwrap();

        assert!(matches!(outcome, SendOutcome::Failed { .. }));
        assert!(f.cache.get(&c1()).is_empty());
        assert_eq!(f.coordinator.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let f = fixture(10);
        go_online(&f.connection).await;
        for _ in 0..2 {
            f.api.fail_next_send(SendError::Network {
                reason: "timeout".into(),
            });
        }

        let outcome = f.coordinator.send(&c1(), "X").await.unwrap();

        assert_eq!(
            outcome.error(),
            Some(&SendError::RetriesExhausted {
                attempts: 2,
                last: "Network failure while sending: timeout".into()
            })
        );
        assert_eq!(f.api.send_attempts(), 2);
    }

    #[tokio::test]
    async fn test_single_network_blip_is_retried() {
        let f = fixture(10);
        go_online(&f.connection).await;
        f.api.fail_next_send(SendError::Network {
            reason: "timeout".into(),
        });

        let outcome = f.coordinator.send(&c1(), "X").await.unwrap();
        assert!(outcome.is_delivered());
        assert_eq!(f.api.send_attempts(), 2);
    }

    #[tokio::test]
    async fn test_queue_full_rolls_back() {
        let f = fixture(1);
        f.coordinator.send(&c1(), "first").await.unwrap();
        let outcome = f.coordinator.send(&c1(), "second").await.unwrap();

        assert_eq!(
            outcome.error(),
            Some(&SendError::QueueFull { capacity: 1 })
        );
        let texts: Vec<_> = f.cache.get(&c1()).into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["first"]);
    }

    #[tokio::test]
    async fn test_flush_stops_at_first_failure() {
        let f = fixture(10);
        f.coordinator.send(&c1(), "one").await.unwrap();
        f.coordinator.send(&c1(), "two").await.unwrap();
        go_online(&f.connection).await;
        f.api.fail_next_send(SendError::Rejected {
            reason: "later".into(),
        });

        let report = f.coordinator.flush().await;

        assert_eq!(report.sent, 0);
        assert_eq!(report.halted_on, Some(MessageId::placeholder(1)));
        let queued: Vec<_> = f.coordinator.pending().into_iter().map(|p| p.temp_id).collect();
        assert_eq!(queued, vec![MessageId::placeholder(1), MessageId::placeholder(2)]);
        assert!(f.cache.get(&c1()).iter().all(Message::is_pending));
    }

    #[tokio::test]
    async fn test_flush_drains_in_order() {
        let f = fixture(10);
        f.coordinator.send(&c1(), "one").await.unwrap();
        f.coordinator.send(&"c2".into(), "two").await.unwrap();
        go_online(&f.connection).await;

        let report = f.coordinator.flush().await;

        assert_eq!(report.sent, 2);
        assert_eq!(report.remaining, 0);
        let sent: Vec<_> = f.api.sent().into_iter().map(|(_, text)| text).collect();
        assert_eq!(sent, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_flush_requested_during_halted_run_goes_again() {
        let f = fixture(10);
        f.coordinator.send(&c1(), "one").await.unwrap();
        go_online(&f.connection).await;
        f.api.hold_sends();

        let coordinator = f.coordinator.clone();
        let running = tokio::spawn(async move { coordinator.flush().await });
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while f.api.send_attempts() == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        let skipped = f.coordinator.flush().await;
        assert!(skipped.skipped);
        assert_eq!(skipped.remaining, 1);

        f.api.fail_next_send(SendError::Rejected {
            reason: "stale session".into(),
        });
        f.api.release_sends();
        let report = running.await.unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(report.halted_on, None);
        assert_eq!(f.api.send_attempts(), 2);
    }

    #[tokio::test]
    async fn test_flush_offline_sends_nothing() {
        let f = fixture(10);
        f.coordinator.send(&c1(), "one").await.unwrap();
        let report = f.coordinator.flush().await;
        assert_eq!(report.sent, 0);
        assert_eq!(report.remaining, 1);
        assert_eq!(f.api.send_attempts(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_sends() {
        let f = fixture(10);
        f.lifecycle.shut_down();
        let err = f.coordinator.send(&c1(), "late").await.unwrap_err();
        assert_eq!(err, SendError::EngineShutDown.into());
        assert!(f.cache.get(&c1()).is_empty());
    }
}
