//! Configuration loading for rendezvous-relay.
//!
//! Configuration is loaded from an optional TOML file. Every field has a
//! default, so an empty file (or no file) yields a working relay.

use serde::Deserialize;
use std::path::PathBuf;

/// Smallest accepted `limits.max_frame_size`. Leaves room for `setup`,
/// key exchange frames and short messages.
pub const MIN_FRAME_SIZE: usize = 1024;

/// Root configuration for rendezvous-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Limits and timeouts.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Periodic stats logging.
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// TCP listen address (default: 0.0.0.0:3000).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Broadcast "<id> joined" / "<id> left" as the relay sentinel (default: false).
    #[serde(default)]
    pub announce_membership: bool,
}

/// Limits and timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum frame body size in bytes (default: 64 KiB).
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Frames buffered per connection before the relay drops (default: 256).
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    /// Maximum simultaneously registered clients (default: 10000).
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
    /// Connection attempts allowed per IP per minute (default: 60).
    #[serde(default = "default_connections_per_ip")]
    pub connections_per_ip: u32,
    /// Frames allowed per client per minute (default: 600).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Close connections silent for this many seconds (default: 0 = never).
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

/// Periodic stats logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    /// Interval in seconds (default: 60).
    #[serde(default = "default_stats_interval")]
    pub interval_secs: u64,
    /// Enable the stats task (default: true).
    #[serde(default = "default_stats_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_frame_size() -> usize {
    rendezvous_types::DEFAULT_MAX_FRAME_SIZE
}

fn default_outbound_queue() -> usize {
    256
}

fn default_max_concurrent_sessions() -> usize {
    10_000
}

fn default_connections_per_ip() -> u32 {
    60
}

fn default_messages_per_minute() -> u32 {
    600
}

fn default_stats_interval() -> u64 {
    60
}

fn default_stats_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            announce_membership: false,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            outbound_queue: default_outbound_queue(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            connections_per_ip: default_connections_per_ip(),
            messages_per_minute: default_messages_per_minute(),
            idle_timeout_secs: 0,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_stats_interval(),
            enabled: default_stats_enabled(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a limit
    /// that must be positive is zero.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: RelayConfig = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        let checks = [
            ("limits.max_frame_size", limits.max_frame_size as u64),
            ("limits.outbound_queue", limits.outbound_queue as u64),
            ("limits.connections_per_ip", limits.connections_per_ip as u64),
            ("limits.messages_per_minute", limits.messages_per_minute as u64),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if limits.max_frame_size < MIN_FRAME_SIZE {
            return Err(ConfigError::Invalid {
                field: "limits.max_frame_size",
                reason: format!("must be at least {} bytes", MIN_FRAME_SIZE),
            });
        }
        if self.stats.enabled && self.stats.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "stats.interval_secs",
                reason: "must be greater than zero when stats are enabled".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config value {field}: {reason}")]
    Invalid {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
