//! chatsync Runtime
//!
//! The real-time message synchronization engine. Five components cooperate:
//!
//! - [`MessageCache`]: per-conversation ordered store, the single source of
//!   truth for rendering
//! - [`OutboundQueue`]: FIFO of messages waiting for a connection
//! - [`ConnectionManager`]: connection state machine and reconnect policy
//! - [`SendCoordinator`]: optimistic sends, reconciliation and queue flushing
//! - [`EventRouter`]: turns transport events into calls on the others
//!
//! Hosts build a [`SyncEngine`] with [`EngineBuilder`] and tear it down with
//! [`SyncEngine::shutdown`].

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod builder;
pub mod coordinator;
pub mod engine;
pub mod lifecycle;
pub mod managers;
pub mod query_cache;
pub mod router;
pub mod stats;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use builder::EngineBuilder;
pub use coordinator::{
    ConfirmationHook, CoordinatorParts, FlushReport, SendCoordinator, SendOutcome, StagedSend,
};
pub use engine::SyncEngine;
pub use lifecycle::Lifecycle;
pub use managers::{
    ChangeHook, ConnectionManager, ListenerId, MessageCache, MessageHandler, OutboundQueue,
    ReconnectBackoff, StateListener, Subscription,
};
pub use query_cache::InMemoryQueryCache;
pub use router::EventRouter;
pub use stats::{EngineStatistics, EngineStats};

// Re-export core types for convenience
pub use chatsync_core::*;
