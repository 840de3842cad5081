//! Merges installed local models with registry entries for presentation.
//! Nothing here feeds back into placement.

use serde::Serialize;

use crate::installed::{format_size, InstalledModel};
use crate::registry::entry::{Family, ModelEntry};
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct DisplayModel {
    pub name: String,
    /// Bytes on disk; unknown for models the engine does not hold.
    pub size: Option<u64>,
    pub modified: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether a registry entry routes to this model.
    pub configured: bool,
    /// Whether this model receives default-routed traffic.
    pub active: bool,
}

impl DisplayModel {
    pub(crate) fn size_label(&self) -> String {
        match self.size {
            Some(bytes) => format_size(bytes),
            None => "N/A".to_string(),
        }
    }
}

fn kind_of(entry: &ModelEntry) -> &'static str {
    match entry.backend.family() {
        Family::Ollama => "ollama",
        Family::Remote(tag) if tag == "openai" => "openai",
        Family::Remote(_) => "api",
    }
}

/// Whether `entry` routes to the installed model.
fn routes_to(entry: &ModelEntry, model: &InstalledModel) -> bool {
    if model.matches(&entry.name) {
        return true;
    }

    entry.is_local_family() && model.matches(entry.backend.identifier())
}

/// Installed models come first in the engine's order, then registry entries
/// that matched none of them, in registry order.
pub(crate) fn merge(installed: &[InstalledModel], registry: &Registry) -> Vec<DisplayModel> {
    let head = registry.head();
    let mut covered = vec![false; registry.len()];
    let mut models = Vec::with_capacity(installed.len() + registry.len());

    for model in installed {
        let mut configured = false;
        let mut active = false;

        for (i, entry) in registry.entries().iter().enumerate() {
            if routes_to(entry, model) {
                configured = true;
                covered[i] = true;
                active |= i == 0;
            }
        }

        models.push(DisplayModel {
            name: model.name.clone(),
            size: Some(model.size),
            modified: Some(model.modified.clone()),
            kind: "ollama".to_string(),
            configured,
            active,
        });
    }

    for (i, entry) in registry.entries().iter().enumerate() {
        if covered[i] {
            continue;
        }

        models.push(DisplayModel {
            name: entry.name.clone(),
            size: None,
            modified: None,
            kind: kind_of(entry).to_string(),
            configured: true,
            active: head.map(|h| h.name == entry.name).unwrap_or(false),
        });
    }

    models
}
