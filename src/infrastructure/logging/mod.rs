//! Logging setup.
//!
//! Human-readable output goes to stderr so stdout stays clean for
//! command output (including `--json` mode). An optional JSON file
//! layer captures structured logs for long executions.

use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Environment variable controlling the log filter.
pub const LOG_ENV: &str = "SPECFORGE_LOG";

/// Environment variable enabling the JSON file layer; its value is the
/// directory daily log files are written to.
pub const LOG_DIR_ENV: &str = "SPECFORGE_LOG_DIR";

/// Initialize the global subscriber. Returns a guard that must stay
/// alive while file logging is active.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("warn,specforge=info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    if let Some(log_dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(log_dir, "specforge.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false)
            .boxed();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init()
            .ok();
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init()
            .ok();
        Ok(None)
    }
}
