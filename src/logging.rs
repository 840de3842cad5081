//! Diagnostic logging. Everything goes to stderr so listings on stdout stay
//! machine readable.

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Environment variable holding a log filter, e.g. `debug` or `llm_bridge=trace`.
pub(crate) const LOG_ENV: &str = "LLM_BRIDGE_LOG";

const DEFAULT_LEVEL: &str = "warn";

#[derive(Debug, Error)]
pub(crate) enum LogError {
    #[error("invalid log filter \"{0}\": {1}")]
    InvalidFilter(String, String),
    #[error("logging was already initialized")]
    AlreadyInitialized,
}

/// Picks the filter: the command line wins, then the environment, then the
/// config file.
pub(crate) fn resolve_level(cli: Option<&str>, env: Option<String>, config: Option<&str>) -> String {
    cli.map(str::to_string)
        .or(env.filter(|l| !l.trim().is_empty()))
        .or(config.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

pub(crate) fn init_logging(level: &str, format: LogFormat, ansi: bool) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(level)
        .map_err(|e| LogError::InvalidFilter(level.to_string(), e.to_string()))?;

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(ansi)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
    .map_err(|_| LogError::AlreadyInitialized)
}
