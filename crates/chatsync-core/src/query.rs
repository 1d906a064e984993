//! Keyed read-through query cache contract
//!
//! The engine depends only on `get`/`set`/`invalidate`; how entries expire
//! and how they are stored is up to the implementation.

use core::fmt;

use crate::types::{ConversationId, ConversationSummary, Message};

/// Keys of the query cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// The conversation list
    Conversations,
    /// One conversation's message list
    Messages(ConversationId),
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::Conversations => write!(f, "conversations"),
            QueryKey::Messages(id) => write!(f, "messages/{id}"),
        }
    }
}

/// Values of the query cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Conversations(Vec<ConversationSummary>),
    Messages(Vec<Message>),
}

/// Generic keyed cache consumed by the engine
pub trait QueryCache: Send + Sync {
    /// Fresh value for the key, if any
    fn get(&self, key: &QueryKey) -> Option<QueryValue>;

    /// Store a value, marking it fresh
    fn set(&self, key: QueryKey, value: QueryValue);

    /// Mark the key as needing a refetch
    fn invalidate(&self, key: &QueryKey);
}
