//! Core data model for chatsync
//!
//! Identifiers use newtypes so a conversation id can never be passed where a
//! message id is expected. A [`MessageId`] is either server-assigned or a local
//! placeholder (`temp-<n>`); delivery status is derived from which one it is.

use chrono::{DateTime, Utc};
use core::fmt;
use serde::{Deserialize, Serialize};

/// Prefix shared by every locally generated placeholder id
pub const PLACEHOLDER_PREFIX: &str = "temp-";

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Identifier of a conversation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a message, server-assigned or a local placeholder
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the placeholder id for the given sequence number
    pub fn placeholder(sequence: u64) -> Self {
        Self(format!("{PLACEHOLDER_PREFIX}{sequence}"))
    }

    /// Whether this id was generated locally and not yet confirmed by the server
    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(PLACEHOLDER_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Customer,
    Business,
    System,
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderType::Customer => write!(f, "customer"),
            SenderType::Business => write!(f, "business"),
            SenderType::System => write!(f, "system"),
        }
    }
}

/// Transient delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Optimistically applied, awaiting server confirmation
    Pending,
    /// Confirmed by the server (or received from it)
    Sent,
    /// The send attempt failed; only ever reported through send outcomes
    Failed,
}

/// A chat message as rendered by consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_type: SenderType,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        sender_type: SenderType,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_type,
            text: text.into(),
            timestamp,
        }
    }

    /// Build the optimistic local copy of an outbound business message
    pub fn optimistic(pending: &PendingMessage, timestamp: DateTime<Utc>) -> Self {
        Self::new(
            pending.temp_id.clone(),
            pending.conversation_id.clone(),
            SenderType::Business,
            pending.text.clone(),
            timestamp,
        )
    }

    /// Delivery status derived from the id
    pub fn delivery_status(&self) -> DeliveryStatus {
        if self.id.is_placeholder() {
            DeliveryStatus::Pending
        } else {
            DeliveryStatus::Sent
        }
    }

    pub fn is_pending(&self) -> bool {
        self.delivery_status() == DeliveryStatus::Pending
    }
}

// ----------------------------------------------------------------------------
// Pending Message
// ----------------------------------------------------------------------------

/// An outbound message waiting in the offline queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub conversation_id: ConversationId,
    pub text: String,
    pub temp_id: MessageId,
}

impl PendingMessage {
    pub fn new(conversation_id: ConversationId, text: impl Into<String>, temp_id: MessageId) -> Self {
        Self {
            conversation_id,
            text: text.into(),
            temp_id,
        }
    }
}

// ----------------------------------------------------------------------------
// Conversation Summary
// ----------------------------------------------------------------------------

/// Summary row of the conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub customer_name: String,
    pub last_message: String,
    pub unread_count: u32,
    pub last_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub has_active_order: bool,
}

/// Sort summaries most recent first
pub fn sort_most_recent_first(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| b.last_timestamp.cmp(&a.last_timestamp));
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
