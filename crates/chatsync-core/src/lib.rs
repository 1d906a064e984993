//! chatsync Core
//!
//! This crate provides the foundational types for the chatsync real-time message
//! synchronization engine: the message data model, the connection state machine,
//! engine configuration, the error taxonomy, and the narrow collaborator traits
//! (transport, remote message API, keyed query cache) the engine is driven through.
//!
//! The engine itself lives in `chatsync-runtime`; scriptable collaborators for tests
//! and demos live in `chatsync-harness`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod config;
pub mod connection;
pub mod errors;
pub mod ids;
pub mod query;
pub mod remote;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{
    create_notification_channel, create_transport_event_channel, EngineNotification,
    NotificationReceiver, NotificationSender, TransportEvent, TransportEventReceiver,
    TransportEventSender,
};
pub use config::{
    CacheConfig, ChannelConfig, EngineConfig, MessageConfig, QueueConfig, ReconnectConfig,
    SendConfig,
};
pub use connection::{
    ConnectionEvent, ConnectionState, StateChange, StateTransitionError, TransitionCause,
};
pub use errors::{
    ChatSyncError, ChatSyncResult, ConfigurationError, RemoteError, SendError, TransportError,
    ValidationError,
};
pub use ids::PlaceholderIds;
pub use query::{QueryCache, QueryKey, QueryValue};
pub use remote::MessageApi;
pub use transport::Transport;
pub use types::{
    sort_most_recent_first, ConversationId, ConversationSummary, DeliveryStatus, Message,
    MessageId, PendingMessage, SenderType, PLACEHOLDER_PREFIX,
};
