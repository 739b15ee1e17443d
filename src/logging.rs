//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The filter comes from, in order:
//! 1. the `level` argument (e.g. a CLI flag),
//! 2. the `TASK_ENGINE_LOG` environment variable (any `EnvFilter` directive),
//! 3. `info`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

pub const LOG_ENV: &str = "TASK_ENGINE_LOG";

/// Installs the global subscriber. Later calls are ignored.
pub fn init_logging(level: Option<&str>) {
    let filter = level
        .and_then(|lvl| EnvFilter::try_new(lvl).ok())
        .or_else(|| EnvFilter::try_from_env(LOG_ENV).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    // Logs go to stderr so command output on stdout stays clean.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
