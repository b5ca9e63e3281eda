//! Logging setup for the binaries
//!
//! The level filter comes from `RUST_LOG` (default `info`). Output is
//! human-readable text or one JSON object per line for log shippers.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Error type returned by the binaries' `main`
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Install the global tracing subscriber. Fails if one is already set.
pub fn init_tracing(format: LogFormat) -> Result<(), BoxError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
}
