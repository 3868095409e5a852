//! # Configuration Management
//!
//! Centralized configuration for the multiplexing layer.
//!
//! This module provides structured configuration for connections and their
//! channels: flow-control window sizing, packet limits, and the optional
//! bound on pending request completions.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//!
//! ## Flow Control Considerations
//! - The default window (128 KB) keeps a full-speed stream from stalling
//!   between grants while bounding per-channel buffering
//! - The default max packet (32 KB) keeps single fragments comfortably under
//!   typical transport record limits

use crate::error::{MuxError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default per-channel receive window in bytes
pub const DEFAULT_WINDOW_SIZE: u32 = 131072;

/// Default largest packet accepted on a channel
pub const DEFAULT_MAX_PACKET: u32 = 32768;

/// Main configuration structure for a multiplexed connection
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MuxConfig {
    /// Per-channel flow-control defaults
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Optional bound on how long a pending request completion may wait.
    ///
    /// `None` preserves the protocol's inherited behavior: a request whose
    /// reply never arrives waits forever.
    #[serde(default, with = "opt_duration_serde")]
    pub request_timeout: Option<Duration>,
}

impl MuxConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MuxError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| MuxError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Validate the configuration for common misconfigurations.
    ///
    /// Returns a list of validation errors. Empty list means the
    /// configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.channel.validate();

        if let Some(timeout) = self.request_timeout {
            if timeout.as_millis() < 10 {
                errors.push("Request timeout too short (minimum: 10ms)".to_string());
            }
        }

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MuxError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Per-channel flow-control configuration
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Receive window advertised when a channel opens
    pub window_size: u32,

    /// Largest packet this side will accept on the channel
    pub max_packet: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            max_packet: DEFAULT_MAX_PACKET,
        }
    }
}

impl ChannelConfig {
    /// Validate channel configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.window_size == 0 {
            errors.push("Window size must be greater than 0".to_string());
        }

        if self.max_packet == 0 {
            errors.push("Max packet must be greater than 0".to_string());
        } else if self.max_packet > self.window_size {
            errors.push(format!(
                "Max packet ({}) cannot exceed the window size ({})",
                self.max_packet, self.window_size
            ));
        }

        errors
    }
}

/// Helper module for Option<Duration> serialization/deserialization
mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
