use std::collections::HashSet;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_yaml::{Mapping, Value};

use super::atomic::write_atomically;
use super::entry::{BackendSpec, ModelEntry};
use super::lock::RegistryLock;
use super::{Error, Registry};

const MODEL_LIST: &str = "model_list";
const MODEL_NAME: &str = "model_name";
const PARAMS: &str = "litellm_params";
const MODEL: &str = "model";
const API_BASE: &str = "api_base";

/// Reads and writes the registry file. This is the only component that
/// touches the file; everything else works on [`Registry`] values.
#[derive(Debug, Clone)]
pub(crate) struct RegistryStore {
    path: PathBuf,
}

/// Why a document was rejected: the offending field and what was expected.
#[derive(Debug)]
struct Malformed {
    field: String,
    message: String,
}

impl Malformed {
    fn new<F: Into<String>, M: Into<String>>(field: F, message: M) -> Malformed {
        Malformed {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl RegistryStore {
    pub(crate) fn new<P: Into<PathBuf>>(path: P) -> RegistryStore {
        RegistryStore { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn load(&self) -> Result<Registry, Error> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::ConfigNotFound(self.path.clone()))
            }
            Err(err) => return Err(Error::ConfigUnreadable(self.path.clone(), err)),
        };

        let registry = decode(&raw).map_err(|m| Error::ConfigParseError {
            path: self.path.clone(),
            field: m.field,
            message: m.message,
        })?;

        tracing::debug!(
            path = %self.path.display(),
            entries = registry.len(),
            "loaded registry"
        );

        Ok(registry)
    }

    /// Writes the whole registry back. If this fails, the file on disk still
    /// holds its previous contents.
    pub(crate) fn save(&self, registry: &Registry) -> Result<(), Error> {
        let raw = encode(registry)
            .map_err(|e| Error::ConfigWriteError(self.path.clone(), io::Error::other(e)))?;

        write_atomically(&self.path, raw.as_bytes())
            .map_err(|e| Error::ConfigWriteError(self.path.clone(), e))?;

        tracing::debug!(
            path = %self.path.display(),
            entries = registry.len(),
            "saved registry"
        );

        Ok(())
    }

    /// Takes the cross-process lock guarding this registry file.
    pub(crate) async fn lock(&self, timeout: Duration) -> Result<RegistryLock, Error> {
        RegistryLock::acquire(&self.path, timeout).await
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn is_blank(raw: &str) -> bool {
    raw.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#') || line == "---"
    })
}

fn decode(raw: &str) -> Result<Registry, Malformed> {
    if is_blank(raw) {
        return Ok(Registry::new());
    }

    let root: Value =
        serde_yaml::from_str(raw).map_err(|e| Malformed::new("document", e.to_string()))?;

    let root = match root {
        Value::Null => Mapping::new(),
        Value::Mapping(root) => root,
        other => {
            return Err(Malformed::new(
                "document",
                format!("expected a mapping at the top level, found {}", kind(&other)),
            ))
        }
    };

    let mut settings = Mapping::new();
    let mut list = None;
    let mut list_position = None;

    for (key, value) in root {
        if key.as_str() == Some(MODEL_LIST) {
            list_position = Some(settings.len());
            list = Some(value);
        } else {
            settings.insert(key, value);
        }
    }

    let items = match list {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(items)) => items,
        Some(other) => {
            return Err(Malformed::new(
                MODEL_LIST,
                format!("expected a list of model entries, found {}", kind(&other)),
            ))
        }
    };

    let mut entries = Vec::with_capacity(items.len());
    let mut names = HashSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let entry = decode_entry(index, item)?;

        if !names.insert(entry.name.clone()) {
            return Err(Malformed::new(
                format!("{}[{}].{}", MODEL_LIST, index, MODEL_NAME),
                format!("duplicate model name \"{}\", names must be unique", entry.name),
            ));
        }

        entries.push(entry);
    }

    Ok(Registry {
        entries,
        settings,
        list_position,
    })
}

fn decode_entry(index: usize, item: Value) -> Result<ModelEntry, Malformed> {
    let field = format!("{}[{}]", MODEL_LIST, index);

    let item = match item {
        Value::Mapping(item) => item,
        other => {
            return Err(Malformed::new(
                field,
                format!(
                    "expected a mapping with \"{}\" and \"{}\", found {}",
                    MODEL_NAME,
                    PARAMS,
                    kind(&other)
                ),
            ))
        }
    };

    let mut name = None;
    let mut params = None;
    let mut extra = Mapping::new();

    for (key, value) in item {
        match key.as_str() {
            Some(MODEL_NAME) => name = Some(value),
            Some(PARAMS) => params = Some(value),
            _ => {
                extra.insert(key, value);
            }
        }
    }

    let name = match name {
        Some(Value::String(name)) => name,
        Some(other) => {
            return Err(Malformed::new(
                format!("{}.{}", field, MODEL_NAME),
                format!("expected a string, found {}", kind(&other)),
            ))
        }
        None => {
            return Err(Malformed::new(
                format!("{}.{}", field, MODEL_NAME),
                "missing, expected a string",
            ))
        }
    };

    let params_field = format!("{}.{}", field, PARAMS);

    let params = match params {
        Some(Value::Mapping(params)) => params,
        Some(other) => {
            return Err(Malformed::new(
                params_field,
                format!(
                    "expected a mapping with \"{}\", found {}",
                    MODEL,
                    kind(&other)
                ),
            ))
        }
        None => {
            return Err(Malformed::new(
                params_field,
                format!("missing, expected a mapping with \"{}\"", MODEL),
            ))
        }
    };

    let mut model = None;
    let mut api_base = None;
    let mut extra_params = Mapping::new();

    for (key, value) in params {
        match key.as_str() {
            Some(MODEL) => model = Some(value),
            Some(API_BASE) => api_base = Some(value),
            _ => {
                extra_params.insert(key, value);
            }
        }
    }

    let model_field = format!("{}.{}", params_field, MODEL);

    let backend = match model {
        Some(Value::String(model)) => BackendSpec::parse(&model).map_err(|_| {
            Malformed::new(
                &model_field,
                format!(
                    "expected \"<family>/<identifier>\", found \"{}\"",
                    model
                ),
            )
        })?,
        Some(other) => {
            return Err(Malformed::new(
                model_field,
                format!("expected a string, found {}", kind(&other)),
            ))
        }
        None => {
            return Err(Malformed::new(
                model_field,
                "missing, expected \"<family>/<identifier>\"",
            ))
        }
    };

    let endpoint_override = match api_base {
        None | Some(Value::Null) => None,
        Some(Value::String(api_base)) => Some(api_base),
        Some(other) => {
            return Err(Malformed::new(
                format!("{}.{}", params_field, API_BASE),
                format!("expected a string, found {}", kind(&other)),
            ))
        }
    };

    Ok(ModelEntry {
        name,
        backend,
        endpoint_override,
        extra,
        extra_params,
    })
}

fn encode_entry(entry: &ModelEntry) -> Value {
    let mut params = Mapping::new();

    params.insert(MODEL.into(), entry.backend.to_string().into());

    if let Some(api_base) = &entry.endpoint_override {
        params.insert(API_BASE.into(), api_base.clone().into());
    }

    for (key, value) in &entry.extra_params {
        params.insert(key.clone(), value.clone());
    }

    let mut item = Mapping::new();

    item.insert(MODEL_NAME.into(), entry.name.clone().into());
    item.insert(PARAMS.into(), Value::Mapping(params));

    for (key, value) in &entry.extra {
        item.insert(key.clone(), value.clone());
    }

    Value::Mapping(item)
}

fn encode(registry: &Registry) -> Result<String, serde_yaml::Error> {
    let list = Value::Sequence(registry.entries.iter().map(encode_entry).collect());

    let mut root = Mapping::new();
    let mut list = Some(list);

    for (position, (key, value)) in registry.settings.iter().enumerate() {
        if registry.list_position == Some(position) {
            if let Some(list) = list.take() {
                root.insert(MODEL_LIST.into(), list);
            }
        }

        root.insert(key.clone(), value.clone());
    }

    if let Some(list) = list {
        root.insert(MODEL_LIST.into(), list);
    }

    serde_yaml::to_string(&Value::Mapping(root))
}
