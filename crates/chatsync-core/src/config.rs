//! Centralized Configuration Management
//!
//! All engine tunables live in [`EngineConfig`]. Every section deserializes with
//! defaults so a partial TOML file is enough.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigurationError, ValidationError};

// ----------------------------------------------------------------------------
// Reconnect Configuration
// ----------------------------------------------------------------------------

/// Backoff between transport reconnect attempts
///
/// Attempts are unbounded: reconnection continues until it succeeds or the
/// engine is shut down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay_ms: u64,
    /// Ceiling for the delay between attempts
    pub max_delay_ms: u64,
    /// Multiplier applied after each failed attempt
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// ----------------------------------------------------------------------------
// Send Configuration
// ----------------------------------------------------------------------------

/// Bounded retry budget for a single message send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendConfig {
    /// Total attempts per send, including the first
    pub max_attempts: u32,
    /// Delay between attempts
    pub retry_delay_ms: u64,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2, // one retry
            retry_delay_ms: 200,
        }
    }
}

impl SendConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// ----------------------------------------------------------------------------
// Queue Configuration
// ----------------------------------------------------------------------------

/// Offline queue limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued messages while offline
    pub max_pending: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_pending: 500 }
    }
}

// ----------------------------------------------------------------------------
// Cache Configuration
// ----------------------------------------------------------------------------

/// Message cache and query cache limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum messages kept per conversation (pending messages are never evicted)
    pub max_messages_per_conversation: usize,
    /// Age after which a read-through query entry is refetched
    pub query_stale_after_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_messages_per_conversation: 5_000,
            query_stale_after_ms: 30_000,
        }
    }
}

impl CacheConfig {
    pub fn query_stale_after(&self) -> Duration {
        Duration::from_millis(self.query_stale_after_ms)
    }
}

// ----------------------------------------------------------------------------
// Message Configuration
// ----------------------------------------------------------------------------

/// Outbound message validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    /// Maximum text length in characters after trimming
    pub max_text_length: usize,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_text_length: 2_000,
        }
    }
}

impl MessageConfig {
    /// Trim outbound text and check it against the limits
    pub fn normalize_text(&self, text: &str) -> Result<String, ValidationError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyText);
        }
        let length = trimmed.chars().count();
        if length > self.max_text_length {
            return Err(ValidationError::TextTooLong {
                length,
                max: self.max_text_length,
            });
        }
        Ok(trimmed.to_string())
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the engine's channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Transport → event router
    pub event_buffer_size: usize,
    /// Engine → UI notification broadcast
    pub notification_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 128,       // inbound bursts after reconnect
            notification_buffer_size: 64, // slow UI receivers lag rather than block
        }
    }
}

// ----------------------------------------------------------------------------
// Engine Configuration
// ----------------------------------------------------------------------------

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reconnect: ReconnectConfig,
    pub send: SendConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    pub messages: MessageConfig,
    pub channels: ChannelConfig,
}

impl EngineConfig {
    /// Fast timings for tests
    pub fn testing() -> Self {
        Self {
            reconnect: ReconnectConfig {
                initial_delay_ms: 5,
                max_delay_ms: 50,
                backoff_multiplier: 2.0,
            },
            send: SendConfig {
                max_attempts: 2,
                retry_delay_ms: 1,
            },
            queue: QueueConfig { max_pending: 100 },
            cache: CacheConfig {
                max_messages_per_conversation: 1_000,
                query_stale_after_ms: 30_000,
            },
            messages: MessageConfig::default(),
            channels: ChannelConfig::default(),
        }
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.reconnect.backoff_multiplier < 1.0 || !self.reconnect.backoff_multiplier.is_finite() {
            return Err(ConfigurationError::invalid(
                "reconnect.backoff_multiplier",
                "must be a finite value >= 1.0",
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(ConfigurationError::invalid(
                "reconnect.max_delay_ms",
                "must not be smaller than reconnect.initial_delay_ms",
            ));
        }
        if self.send.max_attempts == 0 {
            return Err(ConfigurationError::invalid(
                "send.max_attempts",
                "at least one attempt is required",
            ));
        }
        if self.queue.max_pending == 0 {
            return Err(ConfigurationError::invalid("queue.max_pending", "must be positive"));
        }
        if self.cache.max_messages_per_conversation == 0 {
            return Err(ConfigurationError::invalid(
                "cache.max_messages_per_conversation",
                "must be positive",
            ));
        }
        if self.messages.max_text_length == 0 {
            return Err(ConfigurationError::invalid(
                "messages.max_text_length",
                "must be positive",
            ));
        }
        if self.channels.event_buffer_size == 0 || self.channels.notification_buffer_size == 0 {
            return Err(ConfigurationError::invalid("channels", "buffer sizes must be positive"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
