//! Inbound transport event routing
//!
//! The EventRouter is the single consumer of the transport event channel. It
//! processes events strictly in arrival order and drives the other components:
//! connection events go to the ConnectionManager, inbound messages go to the
//! MessageCache. Every transition to Connected, whoever promotes it, triggers a
//! queue flush through a state listener.
//!
//! It also raises the conversation-list invalidation signal whenever a new
//! inbound message lands or a send is confirmed. The components it drives never
//! reference it; it installs hooks on them instead.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use chatsync_core::{
    ConnectionState, ConversationId, EngineNotification, Message, NotificationSender, QueryCache,
    QueryKey, QueryValue, StateChange, TransportEvent, TransportEventReceiver,
};
use tracing::{debug, info, trace};

use crate::coordinator::SendCoordinator;
use crate::lifecycle::Lifecycle;
use crate::managers::{ConnectionManager, ListenerId, MessageCache};
use crate::stats::EngineStats;

fn signal_conversations_changed(query_cache: &dyn QueryCache, notifier: &NotificationSender) {
    query_cache.invalidate(&QueryKey::Conversations);
    let _ = notifier.send(EngineNotification::ConversationsInvalidated);
}

// ----------------------------------------------------------------------------
// Event Router
// ----------------------------------------------------------------------------

pub struct EventRouter {
    cache: Arc<MessageCache>,
    connection: Arc<ConnectionManager>,
    coordinator: Arc<SendCoordinator>,
    query_cache: Arc<dyn QueryCache>,
    notifier: NotificationSender,
    lifecycle: Lifecycle,
    stats: Arc<EngineStats>,
    flush_listener: Mutex<Option<ListenerId>>,
}

impl EventRouter {
    pub fn new(
        cache: Arc<MessageCache>,
        connection: Arc<ConnectionManager>,
        coordinator: Arc<SendCoordinator>,
        query_cache: Arc<dyn QueryCache>,
        notifier: NotificationSender,
        lifecycle: Lifecycle,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            cache,
            connection,
            coordinator,
            query_cache,
            notifier,
            lifecycle,
            stats,
            flush_listener: Mutex::new(None),
        }
    }

    /// Install the hooks that keep the query cache in step with the engine
    pub fn wire(&self) {
        let query_cache = self.query_cache.clone();
        self.cache.set_change_hook(Some(Arc::new(
            move |conversation_id: &ConversationId, messages: &[Message]| {
                query_cache.set(
                    QueryKey::Messages(conversation_id.clone()),
                    QueryValue::Messages(messages.to_vec()),
                );
            },
        )));

        let query_cache = self.query_cache.clone();
        let notifier = self.notifier.clone();
        self.coordinator.set_confirmation_hook(Some(Arc::new(
            move |_: &ConversationId, _: &Message| {
                signal_conversations_changed(query_cache.as_ref(), &notifier);
            },
        )));

        let coordinator: Weak<SendCoordinator> = Arc::downgrade(&self.coordinator);
        let id = self.connection.on_state_change(Arc::new(move |change: &StateChange| {
            if change.to != ConnectionState::Connected {
                return;
            }
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.spawn_flush();
            }
        }));
        let previous = self
            .flush_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(id);
        if let Some(previous) = previous {
            self.connection.remove_listener(previous);
        }
    }

    /// Remove the hooks installed by [`wire`](Self::wire)
    pub fn unwire(&self) {
        self.cache.set_change_hook(None);
        self.coordinator.clear_hooks();
        let listener = self
            .flush_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = listener {
            self.connection.remove_listener(id);
        }
    }

    /// Consume transport events until the channel closes or the engine shuts down
    pub async fn run(self: Arc<Self>, mut events: TransportEventReceiver) {
        info!("Event router started");
        while let Some(event) = events.recv().await {
            if !self.lifecycle.is_alive() {
                break;
            }
            self.handle_event(event);
        }
        info!("Event router stopped");
    }

    /// Apply one transport event
    pub fn handle_event(&self, event: TransportEvent) {
        if !self.lifecycle.is_alive() {
            trace!(event = event.event_name(), "Ignoring event after shutdown");
            return;
        }
        trace!(event = event.event_name(), "Routing transport event");

        match event {
            TransportEvent::Connected => {
                self.connection.mark_connected();
            }
            TransportEvent::Disconnected { reason } => {
                self.connection.handle_transport_loss(&reason);
            }
            TransportEvent::MessageArrived(message) => {
                let conversation_id = message.conversation_id.clone();
                let message_id = message.id.clone();
                if self.cache.append(&conversation_id, message) {
                    self.stats.record_inbound();
                    debug!(%conversation_id, %message_id, "Inbound message applied");
                    signal_conversations_changed(self.query_cache.as_ref(), &self.notifier);
                }
            }
        }
    }
}

impl core::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventRouter")
            .field("connection", &self.connection)
            .field("alive", &self.lifecycle.is_alive())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
