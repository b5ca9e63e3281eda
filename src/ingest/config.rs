//! Import client configuration
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | PORT_SERVER_ADDR | 127.0.0.1:50051 | Import server address |
//! | PORT_SOURCE_PATH | ports.json | Source document |
//! | PORT_RECORD_DELAY_MS | 0 | Pause after each emitted record |
//! | PORT_CHANNEL_CAPACITY | 0 | Ingest channel capacity (0 = rendezvous) |
//! | PORT_MAX_FRAME_BYTES | 4194304 | Largest wire frame accepted |
//! | PORT_LOG_FORMAT | text | `text` or `json` |

use super::channel::{CAPACITY_MAX, DEFAULT_CAPACITY};
use crate::config::{duration_millis, env_parse, load_toml, ConfigError};
use crate::observability::LogFormat;
use crate::wire::{DEFAULT_MAX_FRAME_BYTES, MAX_FRAME_BYTES_MAX, MAX_FRAME_BYTES_MIN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:50051";
pub const DEFAULT_SOURCE_PATH: &str = "ports.json";
pub const RECORD_DELAY_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_addr: String,
    pub source_path: PathBuf,
    /// Pause after each emitted record (0 = none)
    #[serde(with = "duration_millis")]
    pub per_record_delay: Duration,
    pub channel_capacity: usize,
    pub max_frame_bytes: usize,
    pub log_format: LogFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            source_path: PathBuf::from(DEFAULT_SOURCE_PATH),
            per_record_delay: Duration::ZERO,
            channel_capacity: DEFAULT_CAPACITY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            log_format: LogFormat::Text,
        }
    }
}

impl ClientConfig {
    /// Configuration for tests
    pub fn test(server_addr: impl Into<String>) -> Self {
        ClientConfig {
            server_addr: server_addr.into(),
            max_frame_bytes: 64 * 1024,
            ..Default::default()
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = ClientConfig::default();
        ClientConfig {
            server_addr: std::env::var("PORT_SERVER_ADDR").unwrap_or(defaults.server_addr),
            source_path: std::env::var("PORT_SOURCE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.source_path),
            per_record_delay: env_parse::<u64>("PORT_RECORD_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.per_record_delay),
            channel_capacity: env_parse("PORT_CHANNEL_CAPACITY")
                .unwrap_or(defaults.channel_capacity),
            max_frame_bytes: env_parse("PORT_MAX_FRAME_BYTES").unwrap_or(defaults.max_frame_bytes),
            log_format: env_parse("PORT_LOG_FORMAT").unwrap_or(defaults.log_format),
        }
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: ClientConfig = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("server_addr is empty".to_string()));
        }
        if self.channel_capacity > CAPACITY_MAX {
            return Err(ConfigError::Invalid(format!(
                "channel_capacity {} exceeds max {}",
                self.channel_capacity, CAPACITY_MAX
            )));
        }
        if !(MAX_FRAME_BYTES_MIN..=MAX_FRAME_BYTES_MAX).contains(&self.max_frame_bytes) {
            return Err(ConfigError::Invalid(format!(
                "max_frame_bytes {} outside [{}, {}]",
                self.max_frame_bytes, MAX_FRAME_BYTES_MIN, MAX_FRAME_BYTES_MAX
            )));
        }
        if self.per_record_delay > RECORD_DELAY_MAX {
            return Err(ConfigError::Invalid(format!(
                "per_record_delay {:?} exceeds max {:?}",
                self.per_record_delay, RECORD_DELAY_MAX
            )));
        }
        Ok(())
    }
}
