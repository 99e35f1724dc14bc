//! Configuration module for relaychat.

use serde::Deserialize;
use std::path::Path;

use crate::{RelayError, Result};

/// Broker URL that selects the in-process broker instead of NATS.
pub const MEMORY_BROKER_URL: &str = "memory";

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Room history store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Path to the SQLite history database.
    #[serde(default = "default_history_path")]
    pub path: String,
}

fn default_history_path() -> String {
    "data/history.db".to_string()
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
        }
    }
}

/// Message broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Broker URL (`nats://...`, or `memory` for a single-instance deployment).
    #[serde(default = "default_broker_url")]
    pub url: String,
    /// Channel carrying chat-visible traffic between instances.
    #[serde(default = "default_broker_channel")]
    pub channel: String,
}

fn default_broker_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_broker_channel() -> String {
    "chat-channel".to_string()
}

impl BrokerConfig {
    /// Whether the in-process broker was requested.
    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_BROKER_URL
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            channel: default_broker_channel(),
        }
    }
}

/// Stock bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Base URL of the quote service.
    #[serde(default = "default_quote_url")]
    pub quote_url: String,
    /// Upper bound on one quote lookup, in seconds.
    #[serde(default = "default_bot_timeout")]
    pub timeout_secs: u64,
    /// Username the bot posts as.
    #[serde(default = "default_bot_username")]
    pub username: String,
}

fn default_quote_url() -> String {
    "https://stooq.com/q/l/".to_string()
}

fn default_bot_timeout() -> u64 {
    5
}

fn default_bot_username() -> String {
    "Bot".to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            quote_url: default_quote_url(),
            timeout_secs: default_bot_timeout(),
            username: default_bot_username(),
        }
    }
}

/// Broadcast hub configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Capacity of the fan-in queue feeding the dispatcher.
    ///
    /// Producers wait when the queue is full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Capacity of each connection's outbound queue.
    ///
    /// A connection whose queue is full during a dispatch pass is evicted.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_outbound_capacity() -> usize {
    256
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file. Empty disables file logging.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/relaychat.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// History store configuration.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Broker configuration.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Stock bot configuration.
    #[serde(default)]
    pub bot: BotConfig,
    /// Hub configuration.
    #[serde(default)]
    pub hub: HubConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(RelayError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| RelayError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `SERVER_HOST`, `SERVER_PORT`: listen address
    /// - `BROKER_URL`: broker URL
    /// - `HISTORY_PATH`: history database path
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = lookup("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| RelayError::Config(format!("invalid SERVER_PORT: {port}")))?;
        }
        if let Some(url) = lookup("BROKER_URL") {
            self.broker.url = url;
        }
        if let Some(path) = lookup("HISTORY_PATH") {
            self.history.path = path;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.broker.channel.is_empty() {
            return Err(RelayError::Config("broker.channel must not be empty".to_string()));
        }
        if self.hub.queue_capacity == 0 || self.hub.outbound_capacity == 0 {
            return Err(RelayError::Config(
                "hub queue capacities must be greater than zero".to_string(),
            ));
        }
        if self.bot.timeout_secs == 0 {
            return Err(RelayError::Config(
                "bot.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
