//! Logging and tracing initialization.
//!
//! Logs always go to stderr; stdout is reserved for command reports
//! (`tickcap info`, `tickcap compare`) so they stay pipeable.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{TickcapError, TickcapResult};

/// Build the filter: `RUST_LOG` when set, otherwise the configured level.
/// A malformed configured level is a config error rather than silently
/// logging nothing.
pub fn build_filter(config: &LoggingConfig) -> TickcapResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    parse_level(&config.level)
}

fn parse_level(level: &str) -> TickcapResult<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| TickcapError::config(format!("invalid log level {level:?}: {e}")))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(config: &LoggingConfig) -> TickcapResult<()> {
    let env_filter = build_filter(config)?;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    if config.json {
        let subscriber = builder.json().finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    } else {
        // Connection tasks and blocking encode jobs interleave; thread names
        // tell them apart.
        let subscriber = builder
            .with_target(true)
            .with_thread_names(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    }
    Ok(())
}
