//! Interactive console
//!
//! Reads slash commands from stdin and drives a [`Session`]. Engine
//! notifications are printed as they arrive when enabled.

use std::io::Write;

use chatsync_runtime::{ConversationId, EngineNotification};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::config::CliAppConfig;
use crate::error::{CliError, Result};
use crate::session::{describe_outcome, format_message, Session};

const HELP: &str = "\
Commands:
  /connect                      open the connection
  /disconnect                   close the connection (no automatic reconnect)
  /drop                         simulate a network loss (automatic reconnect)
  /send <conversation> <text>   send a business message
  /customer <conversation> <text>  inject a customer message
  /show <conversation>          print the cached conversation
  /load <conversation>          fetch the conversation history
  /list                         print the conversation list
  /queue                        print the offline queue
  /flush                        flush the offline queue now
  /stats                        print engine counters
  /help                         this text
  /quit                         shut down and exit";

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Connect,
    Disconnect,
    Drop,
    Send {
        conversation_id: ConversationId,
        text: String,
    },
    Customer {
        conversation_id: ConversationId,
        text: String,
    },
    Show(ConversationId),
    Load(ConversationId),
    List,
    Queue,
    Flush,
    Stats,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (name, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let command = match name {
            "/connect" => ConsoleCommand::Connect,
            "/disconnect" => ConsoleCommand::Disconnect,
            "/drop" => ConsoleCommand::Drop,
            "/send" => {
                let (conversation_id, text) = conversation_and_text(name, rest)?;
                ConsoleCommand::Send {
                    conversation_id,
                    text,
                }
            }
            "/customer" => {
                let (conversation_id, text) = conversation_and_text(name, rest)?;
                ConsoleCommand::Customer {
                    conversation_id,
                    text,
                }
            }
            "/show" => ConsoleCommand::Show(conversation(name, rest)?),
            "/load" => ConsoleCommand::Load(conversation(name, rest)?),
            "/list" => ConsoleCommand::List,
            "/queue" => ConsoleCommand::Queue,
            "/flush" => ConsoleCommand::Flush,
            "/stats" => ConsoleCommand::Stats,
            "/help" | "/?" => ConsoleCommand::Help,
            "/quit" | "/exit" => ConsoleCommand::Quit,
            other => return Err(CliError::InvalidCommand(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn conversation(name: &str, rest: &str) -> Result<ConversationId> {
    match rest.split_whitespace().next() {
        Some(id) => Ok(ConversationId::new(id)),
        None => Err(CliError::InvalidCommand(format!("{name} needs a conversation id"))),
    }
}

fn conversation_and_text(name: &str, rest: &str) -> Result<(ConversationId, String)> {
    match rest.split_once(' ') {
        Some((id, text)) if !text.trim().is_empty() => {
            Ok((ConversationId::new(id), text.trim().to_string()))
        }
        _ => Err(CliError::InvalidCommand(format!(
            "usage: {name} <conversation> <text>"
        ))),
    }
}

// ----------------------------------------------------------------------------
// Console Loop
// ----------------------------------------------------------------------------

pub async fn run(config: &CliAppConfig) -> Result<()> {
    let session = Session::start(config, true).await?;
    println!("chatsync console (engine {}). Type /help for commands.", session.engine.engine_id());

    let printer = config.cli.show_notifications.then(|| {
        let mut notifications = session.engine.notifications();
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(EngineNotification::ConversationsInvalidated) => continue,
                    Ok(notification) => println!("\n  * {notification}"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification printer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let result = read_loop(&session, config).await;

    if let Some(printer) = printer {
        printer.abort();
    }
    session.shutdown().await;
    result
}

async fn read_loop(session: &Session, config: &CliAppConfig) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}", config.cli.prompt);
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == ConsoleCommand::Quit {
            return Ok(());
        }
        if let Err(err) = execute(session, config, command).await {
            println!("error: {err}");
        }
    }
}

async fn execute(session: &Session, config: &CliAppConfig, command: ConsoleCommand) -> Result<()> {
    let engine = &session.engine;
    match command {
        ConsoleCommand::Connect => {
            if !engine.connect() {
                println!("already {}", engine.state());
            }
        }
        ConsoleCommand::Disconnect => engine.disconnect().await,
        ConsoleCommand::Drop => {
            if !engine.state().is_connected() {
                println!("not connected");
            } else if !session.drop_connection("dropped from console").await {
                println!("transport has no event channel");
            }
        }
        ConsoleCommand::Send {
            conversation_id,
            text,
        } => {
            let outcome = engine.send(&conversation_id, &text).await?;
            println!("{}", describe_outcome(&outcome));
        }
        ConsoleCommand::Customer {
            conversation_id,
            text,
        } => {
            if session.customer_message(&conversation_id, &text).await.is_none() {
                println!("transport is down; message not delivered");
            }
        }
        ConsoleCommand::Show(conversation_id) => {
            let messages = engine.messages(&conversation_id);
            if messages.is_empty() {
                println!("{conversation_id}: nothing cached (try /load {conversation_id})");
            }
            let skip = messages.len().saturating_sub(config.cli.history_limit);
            for message in &messages[skip..] {
                println!("  {}", format_message(message));
            }
        }
        ConsoleCommand::Load(conversation_id) => {
            let messages = engine.load_conversation(&conversation_id).await?;
            println!("{conversation_id}: {} messages", messages.len());
        }
        ConsoleCommand::List => {
            for summary in engine.conversations().await? {
                println!(
                    "  {:<4} {:<16} {:>2} unread  {}",
                    summary.id, summary.customer_name, summary.unread_count, summary.last_message
                );
            }
        }
        ConsoleCommand::Queue => {
            let pending = engine.pending();
            println!("{} queued ({})", pending.len(), engine.state());
            for entry in pending {
                println!("  {} {} {}", entry.temp_id, entry.conversation_id, entry.text);
            }
        }
        ConsoleCommand::Flush => {
            let report = engine.flush().await;
            if report.skipped {
                println!("a flush is already running");
            } else {
                println!("sent {}, {} remaining", report.sent, report.remaining);
            }
        }
        ConsoleCommand::Stats => {
            let stats = engine.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            println!("confirmation rate: {:.0}%", stats.confirmation_rate() * 100.0);
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_keeps_inner_spaces() {
        let command = ConsoleCommand::parse("/send c1  Your order is  on the way ").unwrap();
        assert_eq!(
            command,
            Some(ConsoleCommand::Send {
                conversation_id: "c1".into(),
                text: "Your order is  on the way".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(ConsoleCommand::parse("   ").unwrap(), None);
        assert_eq!(ConsoleCommand::parse("/drop").unwrap(), Some(ConsoleCommand::Drop));
        assert_eq!(
            ConsoleCommand::parse("/show c2").unwrap(),
            Some(ConsoleCommand::Show("c2".into()))
        );
        assert_eq!(ConsoleCommand::parse("/exit").unwrap(), Some(ConsoleCommand::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            ConsoleCommand::parse("/send c1"),
            Err(CliError::InvalidCommand(_))
        ));
        assert!(matches!(ConsoleCommand::parse("/load"), Err(CliError::InvalidCommand(_))));
        assert!(matches!(
            ConsoleCommand::parse("hello"),
            Err(CliError::InvalidCommand(name)) if name == "hello"
        ));
    }
}
