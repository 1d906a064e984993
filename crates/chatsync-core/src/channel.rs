//! Engine Channel Types
//!
//! Two channels cross the engine boundary:
//! - transport → event router: [`TransportEvent`] over a bounded mpsc channel,
//!   preserving arrival order.
//! - engine → UI: [`EngineNotification`] over a broadcast channel, one receiver
//!   per interested consumer.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::config::ChannelConfig;
use crate::connection::ConnectionState;
use crate::types::{Message, MessageId};

// ----------------------------------------------------------------------------
// TransportEvent: Transport → Event Router
// ----------------------------------------------------------------------------

/// Inbound events produced by a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportEvent {
    /// The transport established its connection
    Connected,
    /// The transport lost its connection
    Disconnected { reason: String },
    /// A message was pushed by the server
    MessageArrived(Message),
}

impl TransportEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            TransportEvent::Connected => "Connected",
            TransportEvent::Disconnected { .. } => "Disconnected",
            TransportEvent::MessageArrived(_) => "MessageArrived",
        }
    }
}

// ----------------------------------------------------------------------------
// EngineNotification: Engine → UI
// ----------------------------------------------------------------------------

/// Notifications for UI consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineNotification {
    /// The connection state changed
    ConnectionChanged(ConnectionState),
    /// The conversation list needs refreshing
    ConversationsInvalidated,
    /// A placeholder was reconciled with the server copy
    MessageConfirmed { temp_id: MessageId, message: Message },
    /// A connected-path send failed and was rolled back
    MessageFailed { temp_id: MessageId },
    /// A flush pass ended
    FlushCompleted { sent: usize, remaining: usize },
}

impl fmt::Display for EngineNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineNotification::ConnectionChanged(state) => write!(f, "connection {state}"),
            EngineNotification::ConversationsInvalidated => write!(f, "conversations invalidated"),
            EngineNotification::MessageConfirmed { temp_id, message } => {
                write!(f, "{temp_id} confirmed as {}", message.id)
            }
            EngineNotification::MessageFailed { temp_id } => write!(f, "{temp_id} failed"),
            EngineNotification::FlushCompleted { sent, remaining } => {
                write!(f, "flush sent {sent}, {remaining} remaining")
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Types
// ----------------------------------------------------------------------------

pub type TransportEventSender = tokio::sync::mpsc::Sender<TransportEvent>;
pub type TransportEventReceiver = tokio::sync::mpsc::Receiver<TransportEvent>;
pub type NotificationSender = tokio::sync::broadcast::Sender<EngineNotification>;
pub type NotificationReceiver = tokio::sync::broadcast::Receiver<EngineNotification>;

/// Create bounded transport event channel (Transport → Event Router)
pub fn create_transport_event_channel(
    config: &ChannelConfig,
) -> (TransportEventSender, TransportEventReceiver) {
    tokio::sync::mpsc::channel(config.event_buffer_size)
}

/// Create broadcast notification channel (Engine → UI)
///
/// Receivers are created with `sender.subscribe()`; the returned receiver can be dropped.
pub fn create_notification_channel(
    config: &ChannelConfig,
) -> (NotificationSender, NotificationReceiver) {
    tokio::sync::broadcast::channel(config.notification_buffer_size)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
