//! The registry is the ordered list of model entries the routing proxy reads
//! from its config file. Index 0 is the default route.
//!
//! Two invariants hold for every registry produced by the [`placement`] policy:
//! - no two entries share a `name`;
//! - at most one entry belongs to the local family (`ollama/...`).
//!
//! Adding a local entry or switching to one also places it at the head. The
//! [`store`] owns the file itself: it loads a fresh [`Registry`] at the start of
//! every mutating operation and writes the whole list back atomically. Nothing
//! is cached between operations.

pub(crate) mod atomic;
pub(crate) mod entry;
pub(crate) mod lock;
pub(crate) mod placement;
pub(crate) mod store;

use std::io;
use std::path::PathBuf;

use serde_yaml::Mapping;
use thiserror::Error;

use entry::{ModelEntry, ValidationError};

#[derive(Error, Debug)]
pub(crate) enum Error {
    /// The registry file does not exist
    #[error("registry file \"{}\" not found", .0.display())]
    ConfigNotFound(PathBuf),
    /// The registry file exists but could not be read
    #[error("failed to read registry file \"{}\": {}", .0.display(), .1)]
    ConfigUnreadable(PathBuf, #[source] io::Error),
    /// The registry file is not well-formed
    #[error("failed to parse registry file \"{}\": {}: {}", .path.display(), .field, .message)]
    ConfigParseError {
        path: PathBuf,
        field: String,
        message: String,
    },
    /// The registry could not be written back; the previous file is intact
    #[error("failed to write registry file \"{}\": {}", .0.display(), .1)]
    ConfigWriteError(PathBuf, #[source] io::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("model \"{0}\" already exists in the registry, pass --force to replace it")]
    DuplicateModel(String),
    #[error("model \"{0}\" is not in the registry (matched neither a name nor a backend spec)")]
    ModelNotFound(String),
    /// Another process holds the registry lock
    #[error("timed out waiting for registry lock \"{}\", another llm-bridge is updating the registry", .0.display())]
    LockTimeout(PathBuf),
    #[error("failed to create registry lock \"{}\": {}", .0.display(), .1)]
    LockFailed(PathBuf, #[source] io::Error),
}

/// An ordered list of model entries, plus every other top-level key of the
/// file it was loaded from.
#[derive(Debug, Clone, Default)]
pub(crate) struct Registry {
    pub(crate) entries: Vec<ModelEntry>,
    /// Top-level keys other than the model list, in file order.
    pub(crate) settings: Mapping,
    /// Where the model list sat among the top-level keys.
    pub(crate) list_position: Option<usize>,
}

impl PartialEq for Registry {
    // The list position is a formatting detail, not part of the value.
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries && self.settings == other.settings
    }
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry::default()
    }

    #[cfg(test)]
    pub(crate) fn from_entries(entries: Vec<ModelEntry>) -> Registry {
        Registry {
            entries,
            ..Registry::default()
        }
    }

    pub(crate) fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    /// The entry that receives default-routed traffic.
    pub(crate) fn head(&self) -> Option<&ModelEntry> {
        self.entries.first()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}
