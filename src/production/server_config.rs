//! Import server configuration
//!
//! Configuration is loaded from environment variables or a TOML file:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | PORT_SERVER_ADDR | 0.0.0.0:50051 | Listen address |
//! | PORT_MAX_FRAME_BYTES | 4194304 | Largest wire frame accepted |
//! | PORT_LOG_FORMAT | text | `text` or `json` |

use crate::config::{env_parse, load_toml, ConfigError};
use crate::observability::LogFormat;
use crate::wire::{DEFAULT_MAX_FRAME_BYTES, MAX_FRAME_BYTES_MAX, MAX_FRAME_BYTES_MIN};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:50051";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address; port 0 picks a free port
    pub bind_addr: String,
    pub max_frame_bytes: usize,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    /// Loopback on an ephemeral port
    pub fn test() -> Self {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            max_frame_bytes: 64 * 1024,
            log_format: LogFormat::Text,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = ServerConfig::default();
        ServerConfig {
            bind_addr: std::env::var("PORT_SERVER_ADDR").unwrap_or(defaults.bind_addr),
            max_frame_bytes: env_parse("PORT_MAX_FRAME_BYTES").unwrap_or(defaults.max_frame_bytes),
            log_format: env_parse("PORT_LOG_FORMAT").unwrap_or(defaults.log_format),
        }
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: ServerConfig = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr.parse::<SocketAddr>().map_err(|e| {
            ConfigError::Invalid(format!("bind_addr '{}': {}", self.bind_addr, e))
        })?;
        if !(MAX_FRAME_BYTES_MIN..=MAX_FRAME_BYTES_MAX).contains(&self.max_frame_bytes) {
            return Err(ConfigError::Invalid(format!(
                "max_frame_bytes {} outside [{}, {}]",
                self.max_frame_bytes, MAX_FRAME_BYTES_MIN, MAX_FRAME_BYTES_MAX
            )));
        }
        Ok(())
    }
}
