//! Logging bootstrap for binaries and tests embedding the engine.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the host's choice. [`init_logging`] is a small default for hosts that
//! have none.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Subscriber settings, typically the `logging` section of the host config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `rowkit_db=debug,info`.
    pub level: String,
    /// Emit one JSON object per event instead of human-readable lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

/// Install a global fmt subscriber.
///
/// Returns `false` without touching anything when a global subscriber is
/// already set, so calling it more than once is harmless.
#[must_use]
pub fn init_logging(cfg: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if cfg.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}
