//! Running engine handle
//!
//! [`SyncEngine`] is the explicit engine instance the host creates (through
//! [`EngineBuilder`](crate::EngineBuilder)) and destroys (through
//! [`SyncEngine::shutdown`]). It owns every component and is the only way
//! consumers reach them: writes go through `send`, reads through `messages`,
//! `subscribe`, `conversations` and the notification channel.

use std::sync::{Arc, Mutex, PoisonError};

use chatsync_core::{
    sort_most_recent_first, ChatSyncResult, ConnectionState, ConversationId,
    ConversationSummary, EngineConfig, Message, MessageApi, NotificationReceiver,
    NotificationSender, PendingMessage, QueryCache, QueryKey, QueryValue, SendError,
    ValidationError,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};
use uuid::Uuid;

use crate::coordinator::{FlushReport, SendCoordinator, SendOutcome, StagedSend};
use crate::lifecycle::Lifecycle;
use crate::managers::{ConnectionManager, ListenerId, MessageCache, StateListener, Subscription};
use crate::router::EventRouter;
use crate::stats::{EngineStatistics, EngineStats};

pub(crate) struct EngineParts {
    pub engine_id: Uuid,
    pub span: Span,
    pub config: EngineConfig,
    pub cache: Arc<MessageCache>,
    pub connection: Arc<ConnectionManager>,
    pub coordinator: Arc<SendCoordinator>,
    pub router: Arc<EventRouter>,
    pub router_task: JoinHandle<()>,
    pub query_cache: Arc<dyn QueryCache>,
    pub api: Arc<dyn MessageApi>,
    pub notifier: NotificationSender,
    pub lifecycle: Lifecycle,
    pub stats: Arc<EngineStats>,
}

// ----------------------------------------------------------------------------
// Sync Engine
// ----------------------------------------------------------------------------

/// Handle to a running synchronization engine
pub struct SyncEngine {
    engine_id: Uuid,
    span: Span,
    config: EngineConfig,
    cache: Arc<MessageCache>,
    connection: Arc<ConnectionManager>,
    coordinator: Arc<SendCoordinator>,
    router: Arc<EventRouter>,
    router_task: Mutex<Option<JoinHandle<()>>>,
    query_cache: Arc<dyn QueryCache>,
    api: Arc<dyn MessageApi>,
    notifier: NotificationSender,
    lifecycle: Lifecycle,
    stats: Arc<EngineStats>,
}

impl SyncEngine {
    pub(crate) fn from_parts(parts: EngineParts) -> Self {
        Self {
            engine_id: parts.engine_id,
            span: parts.span,
            config: parts.config,
            cache: parts.cache,
            connection: parts.connection,
            coordinator: parts.coordinator,
            router: parts.router,
            router_task: Mutex::new(Some(parts.router_task)),
            query_cache: parts.query_cache,
            api: parts.api,
            notifier: parts.notifier,
            lifecycle: parts.lifecycle,
            stats: parts.stats,
        }
    }

    pub fn engine_id(&self) -> Uuid {
        self.engine_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_alive()
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Begin a connection attempt; `false` if one is already underway
    pub fn connect(&self) -> bool {
        let _entered = self.span.enter();
        self.connection.connect()
    }

    /// Close the transport and cancel automatic reconnection
    pub async fn disconnect(&self) {
        self.connection.disconnect().instrument(self.span.clone()).await
    }

    /// Register a connection state listener
    pub fn on_state_change(
        &self,
        listener: impl Fn(&chatsync_core::StateChange) + Send + Sync + 'static,
    ) -> ListenerId {
        let listener: StateListener = Arc::new(listener);
        self.connection.on_state_change(listener)
    }

    pub fn remove_state_listener(&self, id: ListenerId) -> bool {
        self.connection.remove_listener(id)
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Apply a message optimistically and pick its route, without awaiting
    pub fn stage(&self, conversation_id: &ConversationId, text: &str) -> ChatSyncResult<StagedSend> {
        let _entered = self.span.enter();
        self.coordinator.stage(conversation_id, text)
    }

    /// Complete a send returned by [`stage`](Self::stage)
    pub async fn deliver(&self, staged: StagedSend) -> SendOutcome {
        self.coordinator
            .deliver(staged)
            .instrument(self.span.clone())
            .await
    }

    /// Send a message
    ///
    /// The pending message is in the cache before this future first yields.
    pub async fn send(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> ChatSyncResult<SendOutcome> {
        let staged = self.stage(conversation_id, text)?;
        Ok(self.deliver(staged).await)
    }

    /// Flush the offline queue now
    pub async fn flush(&self) -> FlushReport {
        self.coordinator.flush().instrument(self.span.clone()).await
    }

    /// Ordered copy of the offline queue
    pub fn pending(&self) -> Vec<PendingMessage> {
        self.coordinator.pending()
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    /// Current messages of a conversation
    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.cache.get(conversation_id)
    }

    /// Observe a conversation; the handler runs now and after every change
    pub fn subscribe(
        &self,
        conversation_id: &ConversationId,
        handler: impl Fn(&[Message]) + Send + Sync + 'static,
    ) -> Subscription {
        self.cache.subscribe(conversation_id, Arc::new(handler))
    }

    /// Fetch a conversation's history and merge it into the cache
    pub async fn load_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> ChatSyncResult<Vec<Message>> {
        if conversation_id.is_empty() {
            return Err(ValidationError::EmptyConversationId.into());
        }
        let mut history = self
            .api
            .fetch_messages(conversation_id)
            .instrument(self.span.clone())
            .await?;
        if !self.lifecycle.is_alive() {
            return Err(SendError::EngineShutDown.into());
        }

        history.sort_by_key(|message| message.timestamp);
        let added = self.cache.hydrate(conversation_id, history);
        debug!(parent: &self.span, %conversation_id, added, "Conversation hydrated");
        Ok(self.cache.get(conversation_id))
    }

    /// Conversation list, most recent first, read through the query cache
    pub async fn conversations(&self) -> ChatSyncResult<Vec<ConversationSummary>> {
        if let Some(QueryValue::Conversations(list)) = self.query_cache.get(&QueryKey::Conversations) {
            return Ok(list);
        }

        let mut list = self
            .api
            .fetch_conversations()
            .instrument(self.span.clone())
            .await?;
        sort_most_recent_first(&mut list);
        self.query_cache
            .set(QueryKey::Conversations, QueryValue::Conversations(list.clone()));
        Ok(list)
    }

    /// Subscribe to engine notifications
    pub fn notifications(&self) -> NotificationReceiver {
        self.notifier.subscribe()
    }

    pub fn stats(&self) -> EngineStatistics {
        self.stats.snapshot()
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Tear the engine down
    ///
    /// Listeners, subscribers and hooks are released before the transport is
    /// closed. Sends still in flight may complete, but their results are
    /// discarded. Calling this twice is harmless.
    pub async fn shutdown(&self) {
        if !self.lifecycle.shut_down() {
            return;
        }
        info!(parent: &self.span, "Shutting down chatsync engine");
        self.release();
        self.connection
            .disconnect()
            .instrument(self.span.clone())
            .await;

        info!(parent: &self.span, stats = ?self.stats.snapshot(), "Engine shut down");
    }

    fn release(&self) {
        self.connection.clear_listeners();
        self.cache.clear_subscribers();
        self.router.unwire();
        if let Some(task) = self
            .router_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if self.lifecycle.shut_down() {
            warn!(parent: &self.span, "Engine dropped without shutdown");
            self.release();
        }
    }
}

impl core::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("engine_id", &self.engine_id)
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish()
    }
}
