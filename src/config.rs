//! Configuration module for guestnet
//!
//! JSON configuration for the transport and the echo demo binary.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Virtual transport tuning
    #[serde(default)]
    pub transport: TransportConfig,

    /// Echo round trip run by the binary
    #[serde(default)]
    pub echo: EchoConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.transport.accept_buffer == 0 || self.transport.receive_buffer == 0 {
            return Err(Error::Config("channel buffers must hold at least one item".into()));
        }
        Ok(())
    }
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Capacities of the per-listener and per-connection channels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Inbound connections queued per listener before the host blocks
    #[serde(default = "default_buffer")]
    pub accept_buffer: usize,

    /// Payload fragments queued per connection before the host blocks
    #[serde(default = "default_buffer")]
    pub receive_buffer: usize,
}

fn default_buffer() -> usize {
    10
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            accept_buffer: default_buffer(),
            receive_buffer: default_buffer(),
        }
    }
}

/// Echo demo settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoConfig {
    /// Virtual port the echo server listens on
    #[serde(default = "default_echo_port")]
    pub port: u16,

    /// Message sent through the round trip
    #[serde(default = "default_echo_message")]
    pub message: String,

    /// Read deadline for the reply, in milliseconds
    #[serde(default = "default_echo_timeout")]
    pub timeout_ms: u64,
}

fn default_echo_port() -> u16 {
    1984
}

fn default_echo_message() -> String {
    "hello".to_string()
}

fn default_echo_timeout() -> u64 {
    5000
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            port: default_echo_port(),
            message: default_echo_message(),
            timeout_ms: default_echo_timeout(),
        }
    }
}
