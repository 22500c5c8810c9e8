//! Structured logging setup for the registrar daemon.
//!
//! Component log targets allow per-module filtering:
//!
//! | Target | Description |
//! |--------|-------------|
//! | `registrar::core` | Poll loop lifecycle |
//! | `registrar::grouping` | Candidate pre-filtering and grouping |
//! | `registrar::estimator` | Fee-window decisions and forecasts |
//! | `registrar::execution` | Submission outcomes |
//! | `registrar::vault` | Secret seal/open events (never plaintext) |
//! | `registrar::store` | Request store adapter |
//! | `registrar::chain` | Chain gateway adapter |
//!
//! ```bash
//! # Debug only the estimator
//! RUST_LOG=info,registrar::estimator=debug registrard
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable format (default for development)
    #[default]
    Pretty,
    /// JSON format (best for log aggregation)
    Json,
    /// Compact single-line format
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default level directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Stdout format.
    #[serde(default)]
    pub format: LogFormat,

    /// When set, additionally writes daily-rotated JSON logs to
    /// `<log_dir>/registrar.log` (supervisors capture stdout separately).
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Enable stdout logging (default: true).
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_enable_stdout() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_stdout: true,
        }
    }
}

fn base_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Quiet the HTTP stack by default; it is noisy at info.
        EnvFilter::new(level)
            .add_directive("hyper=warn".parse().expect("static directive"))
            .add_directive("reqwest=warn".parse().expect("static directive"))
    })
}

/// Initialize the global subscriber from configuration.
///
/// Returns the appender guards which must be kept alive for the process
/// lifetime so buffered log lines are flushed on shutdown.
pub fn init_logging(config: &LogConfig) -> Result<Vec<WorkerGuard>, Box<dyn std::error::Error>> {
    let mut guards = Vec::new();
    let filter = base_filter(&config.level);

    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "registrar.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);

        let file_layer = fmt::layer().with_writer(writer).with_ansi(false).json();

        if config.enable_stdout {
            match config.format {
                LogFormat::Json => tracing_subscriber::registry()
                    .with(filter)
                    .with(file_layer)
                    .with(fmt::layer().json())
                    .init(),
                LogFormat::Compact => tracing_subscriber::registry()
                    .with(filter)
                    .with(file_layer)
                    .with(fmt::layer().compact())
                    .init(),
                LogFormat::Pretty => tracing_subscriber::registry()
                    .with(filter)
                    .with(file_layer)
                    .with(fmt::layer().with_target(false))
                    .init(),
            }
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .init();
        }
    } else {
        match config.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init(),
            LogFormat::Compact => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .compact()
                .init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init(),
        }
    }

    Ok(guards)
}

/// Log target constants for component-specific filtering.
///
/// ```ignore
/// tracing::debug!(target: targets::ESTIMATOR, partition, "forecast taken");
/// ```
pub mod targets {
    /// Poll loop lifecycle
    pub const CORE: &str = "registrar::core";
    /// Candidate pre-filtering and grouping
    pub const GROUPING: &str = "registrar::grouping";
    /// Fee-window decisions and forecasts
    pub const ESTIMATOR: &str = "registrar::estimator";
    /// Submission outcomes
    pub const EXECUTION: &str = "registrar::execution";
    /// Secret seal/open events
    pub const VAULT: &str = "registrar::vault";
    /// Request store adapter
    pub const STORE: &str = "registrar::store";
    /// Chain gateway adapter
    pub const CHAIN: &str = "registrar::chain";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.enable_stdout);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn format_serde() {
        let json = serde_json::to_string(&LogFormat::Json).unwrap();
        assert_eq!(json, "\"json\"");

        let parsed: LogFormat = serde_json::from_str("\"compact\"").unwrap();
        assert_eq!(parsed, LogFormat::Compact);
    }
}
