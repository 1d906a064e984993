//! Configuration for the chatsync CLI
//!
//! One TOML file carries the engine tunables plus console and simulation
//! settings. Every section is optional.

use std::path::{Path, PathBuf};

use chatsync_core::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Complete CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliAppConfig {
    pub engine: EngineConfig,
    pub cli: CliConfig,
    pub simulation: SimulationConfig,
}

/// Interactive console settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub prompt: String,
    /// Print engine notifications as they arrive
    pub show_notifications: bool,
    /// Messages shown per conversation by `/show`
    pub history_limit: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            prompt: "chatsync> ".to_string(),
            show_notifications: true,
            history_limit: 20,
        }
    }
}

/// Behaviour of the in-process collaborators the CLI runs against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Round trip of every mock API call
    pub api_latency_ms: u64,
    /// Delay before a mock transport open completes
    pub connect_latency_ms: u64,
    /// Connect attempts refused after each injected drop
    pub failed_reconnects: usize,
    /// Start with the demo conversations loaded
    pub seed_demo_data: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            api_latency_ms: 150,
            connect_latency_ms: 50,
            failed_reconnects: 2,
            seed_demo_data: true,
        }
    }
}

impl CliAppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        Ok(())
    }

    /// `~/.config/chatsync/config.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chatsync").join("config.toml"))
    }

    /// Resolve the effective configuration
    ///
    /// An explicit path must exist. Without one the default path is used when
    /// present, otherwise built-in defaults apply.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
