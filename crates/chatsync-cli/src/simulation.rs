//! Scripted end-to-end session
//!
//! Connects, loads a conversation, sends while connected, drops the
//! connection, sends while offline, lets the reconnect flush the queue and
//! finally injects a customer reply.

use std::time::Duration;

use chatsync_runtime::{
    ConnectionState, ConversationId, ConversationSummary, EngineNotification, EngineStatistics,
    Message, SendOutcome,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::CliAppConfig;
use crate::error::{CliError, Result};
use crate::session::{describe_outcome, format_message, wait_until, Session};

/// Limit for any single wait in the script
const STEP_LIMIT: Duration = Duration::from_secs(30);

/// Inputs of one simulation run
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub conversation_id: ConversationId,
    /// Messages sent while the connection is down
    pub offline_messages: usize,
    /// Print progress lines while running
    pub narrate: bool,
}

/// What the run ended with
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub conversation_id: ConversationId,
    pub outcomes: Vec<String>,
    pub messages: Vec<Message>,
    pub conversations: Vec<ConversationSummary>,
    pub pending: usize,
    pub transport_opens: u64,
    pub stats: EngineStatistics,
}

pub async fn run(config: &CliAppConfig, plan: &SimulationPlan) -> Result<SimulationReport> {
    let session = Session::start(config, true).await?;
    let result = script(&session, plan).await;
    session.shutdown().await;
    result
}

async fn script(session: &Session, plan: &SimulationPlan) -> Result<SimulationReport> {
    let engine = &session.engine;
    let conversation_id = &plan.conversation_id;
    let narrate = |line: String| {
        if plan.narrate {
            println!("{line}");
        }
    };

    let printer = plan.narrate.then(|| {
        let mut notifications = engine.notifications();
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(EngineNotification::ConversationsInvalidated) => continue,
                    Ok(notification) => println!("  * {notification}"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification printer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    session
        .wait_for_state(ConnectionState::Connected, STEP_LIMIT)
        .await?;
    narrate(format!("Connected; loading {conversation_id}"));

    let history = engine.load_conversation(conversation_id).await?;
    for message in &history {
        narrate(format!("  {}", format_message(message)));
    }

    let mut outcomes = Vec::new();
    let outcome = engine
        .send(conversation_id, "Thanks, your order is being prepared")
        .await?;
    narrate(format!("Connected send: {}", describe_outcome(&outcome)));
    outcomes.push(describe_outcome(&outcome));

    narrate("Dropping the connection".to_string());
    session.drop_connection("simulated network loss").await;
    wait_until(STEP_LIMIT, "the connection to drop", || !engine.state().is_connected()).await?;

    for index in 1..=plan.offline_messages {
        let outcome = engine
            .send(conversation_id, &format!("Offline update {index}"))
            .await?;
        if !matches!(outcome, SendOutcome::Queued { .. }) {
            warn!(outcome = %describe_outcome(&outcome), "Offline send was not queued");
        }
        narrate(format!("Offline send: {}", describe_outcome(&outcome)));
        outcomes.push(describe_outcome(&outcome));
    }

    wait_until(STEP_LIMIT, "the offline queue to drain", || {
        engine.pending().is_empty()
    })
    .await?;
    narrate("Reconnected and flushed the queue".to_string());

    let reply = session
        .customer_message(conversation_id, "Great, see you soon")
        .await
        .ok_or_else(|| CliError::Timeout("the transport to accept a customer message".into()))?;
    wait_until(STEP_LIMIT, "the customer reply to arrive", || {
        engine.messages(conversation_id).iter().any(|m| m.id == reply.id)
    })
    .await?;

    let conversations = engine.conversations().await?;
    let messages = engine.messages(conversation_id);
    for message in &messages {
        narrate(format!("  {}", format_message(message)));
    }

    if let Some(printer) = printer {
        printer.abort();
    }

    let report = SimulationReport {
        conversation_id: conversation_id.clone(),
        outcomes,
        messages,
        conversations,
        pending: engine.pending().len(),
        transport_opens: session.transport.open_count(),
        stats: engine.stats(),
    };
    info!(
        sent = report.stats.sent,
        flushed = report.stats.flushed,
        reconnects = report.stats.reconnect_attempts,
        "Simulation finished"
    );
    Ok(report)
}
