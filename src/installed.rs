//! Read-only view of the models already materialized by the local inference
//! engine. This is advisory: it feeds display and post-provisioning checks,
//! never placement decisions.

mod ollama;

pub(crate) use ollama::OllamaInstalled;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::fmt;

/// General categories of listing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    /// The engine could not be reached. It is probably not running.
    Connection,
    /// The engine did not answer in time.
    TimedOut,
    /// The engine answered with an error status.
    Api,
    /// The engine's answer could not be understood.
    UnexpectedResponse,
    /// The configured address is not a valid URL.
    InvalidAddress,
}

#[derive(Debug)]
pub(crate) struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    #[cfg(test)]
    pub(crate) fn from_kind(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }

    pub(crate) fn from_source(kind: ErrorKind, source: Box<dyn StdError + Send + Sync>) -> Error {
        Error {
            kind,
            source: Some(source),
        }
    }

    pub(crate) fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn message(&self) -> &'static str {
        match self.kind {
            ErrorKind::Connection => "failed to connect to the local inference engine",
            ErrorKind::TimedOut => "the local inference engine did not respond in time",
            ErrorKind::Api => "the local inference engine returned an error",
            ErrorKind::UnexpectedResponse => "the local inference engine sent an unexpected response",
            ErrorKind::InvalidAddress => "the local inference engine address is invalid",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message(), source),
            None => write!(f, "{}", self.message()),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|e| &**e as _)
    }
}

/// A model present in the local engine's store.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub(crate) struct InstalledModel {
    pub name: String,
    /// Size on disk in bytes.
    pub size: u64,
    pub modified: String,
}

impl InstalledModel {
    /// Whether this model is what pulling `identifier` produces. The engine
    /// tags untagged pulls as `:latest`, and stores `hf.co/...` pulls under
    /// their full path.
    pub(crate) fn matches(&self, identifier: &str) -> bool {
        if self.name == identifier {
            return true;
        }

        match self.name.strip_suffix(":latest") {
            Some(base) => base == identifier,
            None => false,
        }
    }
}

#[async_trait]
pub(crate) trait InstalledModels: Send + Sync {
    /// Lists installed models in the engine's order.
    async fn list_installed(&self) -> Result<Vec<InstalledModel>, Error>;
}

/// Formats a byte count the way `ollama list` does (decimal units).
pub(crate) fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1000 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = "B";

    for next in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = next;
    }

    if value < 10.0 {
        format!("{:.1} {}", value, unit)
    } else {
        format!("{:.0} {}", value, unit)
    }
}
