//! Command dispatch for the chatsync CLI

use std::path::Path;

use tracing::info;

use crate::cli::{Cli, Commands, ConfigAction};
use crate::config::CliAppConfig;
use crate::console;
use crate::error::{CliError, Result};
use crate::session::format_message;
use crate::simulation::{self, SimulationPlan};

pub struct CommandDispatcher;

impl CommandDispatcher {
    pub async fn execute(cli: Cli, config: CliAppConfig) -> Result<()> {
        match cli.command {
            Commands::Simulate {
                conversation,
                messages,
                json,
            } => {
                let plan = SimulationPlan {
                    conversation_id: conversation.into(),
                    offline_messages: messages,
                    narrate: !json,
                };
                Self::handle_simulate_command(&config, &plan, json).await
            }
            Commands::Interactive => console::run(&config).await,
            Commands::Config { action } => {
                Self::handle_config_command(action, &config, cli.config.as_deref())
            }
        }
    }

    async fn handle_simulate_command(
        config: &CliAppConfig,
        plan: &SimulationPlan,
        json: bool,
    ) -> Result<()> {
        info!(
            conversation_id = %plan.conversation_id,
            offline_messages = plan.offline_messages,
            "Starting simulation"
        );
        let report = simulation::run(config, plan).await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!();
        println!("Final state of {}:", report.conversation_id);
        for message in &report.messages {
            println!("  {}", format_message(message));
        }
        println!(
            "sent {} | queued {} | flushed {} | inbound {} | reconnect attempts {} | transport opens {}",
            report.stats.sent,
            report.stats.queued,
            report.stats.flushed,
            report.stats.inbound,
            report.stats.reconnect_attempts,
            report.transport_opens
        );
        Ok(())
    }

    fn handle_config_command(
        action: ConfigAction,
        config: &CliAppConfig,
        explicit: Option<&Path>,
    ) -> Result<()> {
        match action {
            ConfigAction::Show => {
                print!("{}", config.to_toml_string()?);
                Ok(())
            }
            ConfigAction::Init { force } => {
                let path = match explicit {
                    Some(path) => path.to_path_buf(),
                    None => CliAppConfig::default_path().ok_or_else(|| {
                        CliError::Config("no configuration directory on this platform".into())
                    })?,
                };
                if path.exists() && !force {
                    return Err(CliError::Config(format!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    )));
                }
                CliAppConfig::default().save_to_file(&path)?;
                println!("Wrote {}", path.display());
                Ok(())
            }
        }
    }
}
