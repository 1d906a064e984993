//! Remote message API
//!
//! The request/response side of the backend: sending a message is a network
//! round trip that returns the server-confirmed copy, and the read endpoints
//! back hydration and the conversation list.

use async_trait::async_trait;

use crate::errors::{RemoteError, SendError};
use crate::types::{ConversationId, ConversationSummary, Message};

#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Send a message and return the server-confirmed copy
    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<Message, SendError>;

    /// Fetch a conversation's history
    async fn fetch_messages(&self, conversation_id: &ConversationId)
        -> Result<Vec<Message>, RemoteError>;

    /// Fetch the conversation list
    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>, RemoteError>;
}
