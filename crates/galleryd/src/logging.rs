//! Process-wide log/tracing setup.
//!
//! Library code logs through the `log` facade and opens `tracing` spans
//! around job execution; [`init`] routes both into one subscriber.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to install log bridge: {0}")]
    LogBridge(#[from] log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(format: LogFormat) -> Result<(), LoggingError> {
    tracing_log::LogTracer::init()?;

    let registry = Registry::default().with(env_filter());
    match format {
        LogFormat::Text => {
            let subscriber = registry.with(fmt::layer().with_target(true));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = registry.with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    log::debug!("Logging initialized ({:?})", format);
    Ok(())
}
