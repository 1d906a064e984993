//! chatsync CLI
//!
//! Drives the chatsync engine over the in-process harness collaborators,
//! either through a scripted simulation or an interactive console.

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;
pub mod session;
pub mod simulation;

pub use cli::{Cli, Commands, ConfigAction};
pub use commands::CommandDispatcher;
pub use config::{CliAppConfig, CliConfig, SimulationConfig};
pub use error::{CliError, Result};
