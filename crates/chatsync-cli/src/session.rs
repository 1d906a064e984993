//! A running engine wired to the in-process collaborators
//!
//! Both the scripted simulation and the interactive console drive a
//! [`Session`]: the engine plus handles on its mock transport and mock API, so
//! connection drops and customer traffic can be injected by hand.

use std::sync::Arc;
use std::time::Duration;

use chatsync_harness::{MockMessageApi, MockTransport};
use chatsync_runtime::{
    ConnectionState, ConversationId, EngineBuilder, Message, MessageId, SendOutcome, SenderType,
    SyncEngine,
};
use chrono::Utc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{CliAppConfig, SimulationConfig};
use crate::error::{CliError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct Session {
    pub engine: SyncEngine,
    pub transport: MockTransport,
    pub api: MockMessageApi,
    simulation: SimulationConfig,
}

impl Session {
    /// Build the engine over fresh collaborators
    pub async fn start(config: &CliAppConfig, auto_connect: bool) -> Result<Self> {
        let simulation = config.simulation.clone();

        let transport = MockTransport::new();
        transport.set_open_latency(Duration::from_millis(simulation.connect_latency_ms));
        let api = if simulation.seed_demo_data {
            MockMessageApi::seeded()
        } else {
            MockMessageApi::new()
        };
        api.set_latency(Duration::from_millis(simulation.api_latency_ms));

        let engine = EngineBuilder::new()
            .with_config(config.engine.clone())
            .with_transport(Box::new(transport.clone()))
            .with_message_api(Arc::new(api.clone()))
            .auto_connect(auto_connect)
            .build_and_start()
            .await?;
        info!(engine_id = %engine.engine_id(), "Session started");

        Ok(Self {
            engine,
            transport,
            api,
            simulation,
        })
    }

    /// Drop the live connection; the next reconnect attempts are refused
    pub async fn drop_connection(&self, reason: &str) -> bool {
        if self.simulation.failed_reconnects > 0 {
            self.transport
                .fail_opens(self.simulation.failed_reconnects, "connection refused");
        }
        self.transport.drop_connection(reason).await
    }

    /// Push a customer message through the transport
    ///
    /// The message is also stored server-side so a later load sees it.
    pub async fn customer_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Option<Message> {
        let message = Message::new(
            MessageId::new(format!("in-{}", Uuid::new_v4().simple())),
            conversation_id.clone(),
            SenderType::Customer,
            text,
            Utc::now(),
        );
        if !self.transport.deliver(message.clone()).await {
            return None;
        }
        self.api.add_message(message.clone());
        debug!(%conversation_id, message_id = %message.id, "Injected customer message");
        Some(message)
    }

    pub async fn wait_for_state(&self, state: ConnectionState, limit: Duration) -> Result<()> {
        wait_until(limit, &format!("connection {state}"), || {
            self.engine.state() == state
        })
        .await
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}

/// Poll `condition` until it holds or `limit` elapses
pub async fn wait_until(
    limit: Duration,
    what: &str,
    mut condition: impl FnMut() -> bool,
) -> Result<()> {
    let started = Instant::now();
    let reached = timeout(limit, async {
        while !condition() {
            sleep(POLL_INTERVAL).await;
        }
    })
    .await;
    match reached {
        Ok(()) => {
            debug!(what, elapsed_ms = started.elapsed().as_millis() as u64, "Condition reached");
            Ok(())
        }
        Err(_) => Err(CliError::Timeout(what.to_string())),
    }
}

// ----------------------------------------------------------------------------
// Formatting
// ----------------------------------------------------------------------------

pub fn format_message(message: &Message) -> String {
    let marker = if message.is_pending() { " (pending)" } else { "" };
    format!(
        "[{}] {:<8} {:<10} {}{}",
        message.timestamp.format("%H:%M:%S"),
        message.sender_type,
        message.id,
        message.text,
        marker
    )
}

pub fn describe_outcome(outcome: &SendOutcome) -> String {
    match outcome {
        SendOutcome::Delivered { temp_id, message } => {
            format!("{temp_id} delivered as {}", message.id)
        }
        SendOutcome::Queued { temp_id } => format!("{temp_id} queued until reconnect"),
        SendOutcome::Failed { temp_id, error } => format!("{temp_id} failed: {error}"),
        SendOutcome::Rejected { temp_id, error } => format!("{temp_id} rejected: {error}"),
        SendOutcome::Discarded { temp_id } => format!("{temp_id} discarded after shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_messages_are_marked() {
        let message = Message::new(
            MessageId::placeholder(3),
            "c1".into(),
            SenderType::Business,
            "On the way",
            Utc::now(),
        );
        assert!(format_message(&message).ends_with("On the way (pending)"));

        let outcome = SendOutcome::Queued {
            temp_id: MessageId::placeholder(3),
        };
        assert_eq!(describe_outcome(&outcome), "temp-3 queued until reconnect");
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let result = wait_until(Duration::from_millis(20), "never", || false).await;
        assert!(matches!(result, Err(CliError::Timeout(what)) if what == "never"));
    }
}
