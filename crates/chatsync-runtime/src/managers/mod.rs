//! Stateful managers for the chatsync engine
//!
//! Each manager owns one piece of engine state. The send coordinator and the
//! event router orchestrate them.

pub mod cache;
pub mod connection;
pub mod queue;

pub use cache::{ChangeHook, MessageCache, MessageHandler, Subscription};
pub use connection::{ConnectionManager, ListenerId, ReconnectBackoff, StateListener};
pub use queue::OutboundQueue;
