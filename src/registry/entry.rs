use core::fmt;
use std::str::FromStr;

use serde_yaml::Mapping;
use thiserror::Error;

/// The family served by the locally hosted inference engine.
pub(crate) const LOCAL_FAMILY: &str = "ollama";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ValidationError {
    #[error("malformed backend spec \"{0}\": expected \"<family>/<identifier>\", e.g. \"ollama/phi3\" or \"openai/gpt-4\"")]
    MalformedSpec(String),
    #[error("model name must not be empty")]
    EmptyName,
}

/// The backend class of an entry, derived once from the `<family>` part of
/// a backend spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Family {
    /// Served by the local inference engine.
    Ollama,
    /// Any remote API provider (`openai`, `anthropic`, ...).
    Remote(String),
}

impl Family {
    fn from_tag(tag: &str) -> Family {
        if tag == LOCAL_FAMILY {
            Family::Ollama
        } else {
            Family::Remote(tag.to_string())
        }
    }

    pub(crate) fn is_local(&self) -> bool {
        matches!(self, Family::Ollama)
    }

    pub(crate) fn as_str(&self) -> &str {
        match self {
            Family::Ollama => LOCAL_FAMILY,
            Family::Remote(tag) => tag.as_str(),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend spec of the form `<family>/<identifier>`. The identifier may
/// itself contain slashes (`ollama/hf.co/elyza/Llama-3-ELYZA-JP-8B-GGUF`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BackendSpec {
    family: Family,
    identifier: String,
}

impl BackendSpec {
    pub(crate) fn parse(raw: &str) -> Result<BackendSpec, ValidationError> {
        match raw.split_once('/') {
            Some((family, identifier))
                if !family.trim().is_empty() && !identifier.trim().is_empty() =>
            {
                Ok(BackendSpec {
                    family: Family::from_tag(family),
                    identifier: identifier.to_string(),
                })
            }
            _ => Err(ValidationError::MalformedSpec(raw.to_string())),
        }
    }

    pub(crate) fn local(identifier: &str) -> Result<BackendSpec, ValidationError> {
        Self::parse(&format!("{}/{}", LOCAL_FAMILY, identifier))
    }

    pub(crate) fn family(&self) -> &Family {
        &self.family
    }

    pub(crate) fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn is_local(&self) -> bool {
        self.family.is_local()
    }
}

impl FromStr for BackendSpec {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendSpec::parse(s)
    }
}

impl fmt::Display for BackendSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.identifier)
    }
}

/// One routable model in the registry.
///
/// Keys the registry file carries beyond the ones modelled here are kept in
/// `extra` (entry level) and `extra_params` (inside `litellm_params`) so that
/// a load/save cycle never drops them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ModelEntry {
    pub name: String,
    pub backend: BackendSpec,
    pub endpoint_override: Option<String>,
    pub(super) extra: Mapping,
    pub(super) extra_params: Mapping,
}

impl ModelEntry {
    /// Builds an entry, pointing local-family entries at `local_endpoint`.
    pub(crate) fn new(name: &str, backend: BackendSpec, local_endpoint: &str) -> ModelEntry {
        let endpoint_override = backend.is_local().then(|| local_endpoint.to_string());

        ModelEntry {
            name: name.to_string(),
            backend,
            endpoint_override,
            extra: Mapping::new(),
            extra_params: Mapping::new(),
        }
    }

    pub(crate) fn is_local_family(&self) -> bool {
        self.backend.is_local()
    }
}
