//! Telemetry and logging initialization
//!
//! Structured logging with `tracing` and `tracing-subscriber`. Logs always go
//! to stderr so command output on stdout stays machine-readable.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact human-readable lines
    Compact,
    /// One JSON object per line
    Json,
}

/// Filter directive used when `verbose` is requested
pub const VERBOSE_FILTER: &str = "debug,rusqlite=info,notify=info";

/// Initialize the global tracing subscriber.
///
/// `level` is an `EnvFilter` directive (e.g. `"info"`); `RUST_LOG` takes
/// precedence when set. Calling this twice in one process is a no-op.
///
/// # Example
/// ```
/// use ledger_common::telemetry::{init_tracing, LogFormat};
///
/// init_tracing("info", LogFormat::Compact);
/// tracing::info!("ledger started");
/// ```
pub fn init_tracing(level: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .with(env_filter)
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing("warn", LogFormat::Compact);
        init_tracing("debug", LogFormat::Json);
        tracing::warn!("still logging");
    }
}
