//! Command-line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// chatsync - real-time message sync engine driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scripted session: offline sends, reconnect, flush, inbound traffic
    Simulate {
        /// Conversation to send into
        #[arg(long, default_value = "c1")]
        conversation: String,

        /// Messages sent while the connection is down
        #[arg(short, long, default_value_t = 3)]
        messages: usize,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drive the engine from an interactive console
    Interactive,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_simulate_arguments() {
        let cli = Cli::try_parse_from(["chatsync", "-v", "simulate", "--messages", "5", "--json"])
            .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Simulate {
                conversation,
                messages,
                json,
            } => {
                assert_eq!(conversation, "c1");
                assert_eq!(messages, 5);
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
