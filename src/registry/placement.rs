//! Placement decides where entries go when one is added or selected. It never
//! touches storage: it takes a [`Registry`] and returns the new one, which the
//! caller persists.

use core::fmt;

use super::entry::{BackendSpec, ModelEntry, ValidationError};
use super::{Error, Registry};

/// A requested change to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Operation {
    /// Register `name` as routing to `backend_spec`.
    Add {
        name: String,
        backend_spec: String,
        force: bool,
    },
    /// Make an existing entry the default route. `name` is matched against
    /// entry names first, then as a substring of backend specs.
    Switch { name: String },
}

impl Operation {
    /// An operation with a backend spec adds, one without switches.
    pub(crate) fn resolve(name: &str, backend_spec: Option<&str>, force: bool) -> Operation {
        match backend_spec {
            Some(backend_spec) => Operation::Add {
                name: name.to_string(),
                backend_spec: backend_spec.to_string(),
                force,
            },
            None => Operation::Switch {
                name: name.to_string(),
            },
        }
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            Operation::Add { name, .. } | Operation::Switch { name } => name,
        }
    }

    /// Checks the operation's inputs without looking at any registry.
    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if self.name().trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if let Operation::Add { backend_spec, .. } = self {
            BackendSpec::parse(backend_spec)?;
        }

        Ok(())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Add {
                name, backend_spec, ..
            } => write!(f, "add \"{}\" ({})", name, backend_spec),
            Operation::Switch { name } => write!(f, "switch to \"{}\"", name),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PlacementPolicy {
    local_endpoint: String,
}

impl PlacementPolicy {
    /// `local_endpoint` is the address written into local-family entries.
    pub(crate) fn new(local_endpoint: &str) -> PlacementPolicy {
        PlacementPolicy {
            local_endpoint: local_endpoint.to_string(),
        }
    }

    pub(crate) fn apply(&self, registry: Registry, operation: &Operation) -> Result<Registry, Error> {
        operation.validate()?;

        match operation {
            Operation::Add {
                name,
                backend_spec,
                force,
            } => self.add(registry, name, backend_spec, *force),
            Operation::Switch { name } => switch(registry, name),
        }
    }

    fn add(
        &self,
        mut registry: Registry,
        name: &str,
        backend_spec: &str,
        force: bool,
    ) -> Result<Registry, Error> {
        let backend = BackendSpec::parse(backend_spec)?;

        if let Some(index) = registry.position(name) {
            if !force {
                return Err(Error::DuplicateModel(name.to_string()));
            }

            registry.entries.remove(index);
        }

        let entry = ModelEntry::new(name, backend, &self.local_endpoint);

        if entry.is_local_family() {
            registry.entries.retain(|e| !e.is_local_family());
            registry.entries.insert(0, entry);
        } else {
            registry.entries.push(entry);
            keep_first_local(&mut registry.entries);
        }

        Ok(registry)
    }
}

fn find(registry: &Registry, name: &str) -> Option<usize> {
    registry.position(name).or_else(|| {
        registry
            .entries
            .iter()
            .position(|e| e.backend.to_string().contains(name))
    })
}

fn switch(mut registry: Registry, name: &str) -> Result<Registry, Error> {
    let index = find(&registry, name).ok_or_else(|| Error::ModelNotFound(name.to_string()))?;

    let entry = registry.entries.remove(index);

    if entry.is_local_family() {
        registry.entries.retain(|e| !e.is_local_family());
        registry.entries.insert(0, entry);
    } else {
        registry.entries.insert(0, entry);
        keep_first_local(&mut registry.entries);
    }

    Ok(registry)
}

/// Drops every local-family entry after the first. A registry that was valid
/// on load has at most one, so this only repairs hand-edited files.
fn keep_first_local(entries: &mut Vec<ModelEntry>) {
    let mut seen = false;

    entries.retain(|e| {
        if !e.is_local_family() {
            return true;
        }

        !std::mem::replace(&mut seen, true)
    });
}
