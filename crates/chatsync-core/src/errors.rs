//! Error types for the chatsync engine
//!
//! The taxonomy follows how each failure is recovered from:
//! - [`TransportError`]: connection drops and failed connect attempts. Always
//!   recoverable and absorbed by the connection manager's reconnect loop.
//! - [`SendError`]: one message could not reach the server within its retry budget.
//!   Recoverable per message (rolled back, or left queued during a flush).
//! - [`ConfigurationError`]: a missing collaborator or invalid setting. Fatal at
//!   engine construction time.
//! - [`ValidationError`]: input refused before any state is touched.
//! - [`RemoteError`]: read-side fetches (history, conversation list) failed.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connect attempt failed: {reason}")]
    ConnectFailed { reason: String },
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },
    #[error("Transport is closed")]
    Closed,
}

/// Failures of a single outbound message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("Server rejected message: {reason}")]
    Rejected { reason: String },
    #[error("Network failure while sending: {reason}")]
    Network { reason: String },
    #[error("Send failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("Offline queue is full (capacity: {capacity})")]
    QueueFull { capacity: usize },
    #[error("Engine has been shut down")]
    EngineShutDown,
}

impl SendError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Network { .. })
    }
}

/// Invalid engine construction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Missing collaborator: {name}")]
    MissingCollaborator { name: String },
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigurationError {
    pub(crate) fn invalid(field: &str, reason: &str) -> Self {
        ConfigurationError::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Input refused before touching the cache or queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Message text is empty")]
    EmptyText,
    #[error("Message text too long ({length} characters, max: {max})")]
    TextTooLong { length: usize, max: usize },
    #[error("Conversation id is empty")]
    EmptyConversationId,
}

/// Read-side remote failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Remote endpoint unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("Conversation not found: {conversation_id}")]
    ConversationNotFound { conversation_id: String },
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Top-level error type for the chatsync engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatSyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Send error: {0}")]
    Send(#[from] SendError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("Channel error: {message}")]
    Channel { message: String },
}

pub type ChatSyncResult<T> = Result<T, ChatSyncError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
