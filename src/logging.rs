//! Structured logging through `tracing`
//!
//! The library only emits events. Hosts call [`setup_logging`] once to get a
//! console subscriber; `RUST_LOG` directives take precedence over the
//! configured level.

use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// `[logging]` table of the scanner config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// One JSON object per line instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn init(&self) {
        setup_logging(Some(&self.level), self.json);
    }
}

fn parse_level(level: &str) -> Level {
    match level.trim().to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a global fmt subscriber. Later calls are no-ops, as is the first
/// one when the host already set a global subscriber.
pub fn setup_logging(level: Option<&str>, json: bool) {
    let level_str = level.unwrap_or("info");
    let level = parse_level(level_str);

    INIT.call_once(|| {
        let filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let installed = if json {
            tracing_subscriber::fmt()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_env_filter(filter)
                .try_init()
                .is_ok()
        } else {
            tracing_subscriber::fmt()
                .with_target(true)
                .with_env_filter(filter)
                .try_init()
                .is_ok()
        };

        if installed {
            tracing::info!(log_level = %level_str, json, "Logging initialized");
        }
    });
}
