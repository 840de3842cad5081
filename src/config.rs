use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::provision::{DEFAULT_DEADLINE, DEFAULT_GRACE};
use crate::registry::lock::DEFAULT_LOCK_TIMEOUT;
use crate::restart::DEFAULT_RESTART_TIMEOUT;
use crate::warn;

#[derive(Error, Debug)]
pub(crate) enum ConfigError {
    #[error("failed to read config \"{}\": {}", .0.display(), .1)]
    Read(PathBuf, #[source] io::Error),
    #[error("failed to parse config \"{}\": {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),
}

/// Where the local inference engine lives.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct Local {
    /// The `api_base` written into local entries, as seen by the proxy
    pub endpoint: String,
    /// Where installed models are listed, as seen from this host
    pub api_base: String,
}

impl Default for Local {
    fn default() -> Self {
        Local {
            endpoint: "http://ollama:11434".to_string(),
            api_base: "http://localhost:11434".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct Provisioning {
    pub program: String,
    /// The identifier is appended to these
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub grace_secs: u64,
}

impl Default for Provisioning {
    fn default() -> Self {
        Provisioning {
            program: "docker".to_string(),
            args: ["exec", "ollama", "ollama", "pull"]
                .map(String::from)
                .to_vec(),
            timeout_secs: DEFAULT_DEADLINE.as_secs(),
            grace_secs: DEFAULT_GRACE.as_secs(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct Restart {
    pub program: String,
    /// The service name is appended to these
    pub args: Vec<String>,
    pub service: String,
    pub timeout_secs: u64,
}

impl Default for Restart {
    fn default() -> Self {
        Restart {
            program: "docker".to_string(),
            args: ["compose", "restart"].map(String::from).to_vec(),
            service: "litellm".to_string(),
            timeout_secs: DEFAULT_RESTART_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct Lock {
    pub timeout_secs: u64,
}

impl Default for Lock {
    fn default() -> Self {
        Lock {
            timeout_secs: DEFAULT_LOCK_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Deserialize, Serialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Deserialize, Serialize, Default, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct Logging {
    pub level: Option<String>,
    pub format: LogFormat,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct Config {
    pub registry_path: PathBuf,
    pub local: Local,
    pub provisioning: Provisioning,
    pub restart: Restart,
    pub lock: Lock,
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            registry_path: PathBuf::from("litellm_proxy/config.yaml"),
            local: Local::default(),
            provisioning: Provisioning::default(),
            restart: Restart::default(),
            lock: Lock::default(),
            logging: Logging::default(),
        }
    }
}

impl Config {
    pub(crate) fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning.timeout_secs)
    }

    pub(crate) fn provision_grace(&self) -> Duration {
        Duration::from_secs(self.provisioning.grace_secs)
    }

    pub(crate) fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.restart.timeout_secs)
    }

    pub(crate) fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock.timeout_secs)
    }
}

fn get_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME");

    if let Some(home) = home {
        let home = PathBuf::from(home);

        const USER_PATHS: [&str; 2] = [".config/llm-bridge/config.toml", ".llm-bridge.toml"];

        for &path in USER_PATHS.iter() {
            let fullpath = home.join(path);

            if fullpath.exists() {
                return Some(fullpath);
            }
        }
    }

    let system_config = PathBuf::from("/etc/llm-bridge.toml");

    if system_config.exists() {
        Some(system_config)
    } else {
        None
    }
}

/// Dotted paths of keys in `user_config` that `config` does not know about.
fn extra_fields_helper<'a>(
    path: &mut Vec<&'a String>,
    user_config: &'a toml::Table,
    config: &'a toml::Table,
    extra: &mut Vec<String>,
) {
    for (user_key, user_value) in user_config {
        path.push(user_key);

        match (user_value, config.get(user_key)) {
            (toml::Value::Table(user_value), Some(toml::Value::Table(config_value))) => {
                extra_fields_helper(path, user_value, config_value, extra)
            }
            (_, Some(_)) => {}
            (_, None) => {
                let path: Vec<&str> = path.iter().map(|&s| s.as_str()).collect();

                extra.push(path.join("."));
            }
        }

        path.pop();
    }
}

fn extra_fields(config: &Config, user_config: &toml::Table) -> Vec<String> {
    // Only fails for values toml cannot represent, which Config has none of.
    let known = match toml::Value::try_from(config) {
        Ok(toml::Value::Table(known)) => known,
        _ => return Vec::new(),
    };

    let mut path = Vec::new();
    let mut extra = Vec::new();

    extra_fields_helper(&mut path, user_config, &known, &mut extra);

    extra
}

fn parse_config(path: &Path, raw_config: &str) -> Result<Config, ConfigError> {
    let parse = |err| ConfigError::Parse(path.to_path_buf(), err);

    let user_config: toml::Table = toml::from_str(raw_config).map_err(parse)?;
    let config: Config = toml::from_str(raw_config).map_err(parse)?;

    for key in extra_fields(&config, &user_config) {
        warn!("config contains extraneous key \"{}\", ignoring", key);
    }

    Ok(config)
}

/// Reads the config at `config`, or the first one found in the usual places.
/// Without any config file, every setting takes its default.
pub(crate) fn read_config(config: Option<PathBuf>) -> Result<Config, ConfigError> {
    let config_path = config.or_else(get_config_path);

    if let Some(path) = config_path {
        let raw_config =
            std::fs::read_to_string(&path).map_err(|err| ConfigError::Read(path.clone(), err))?;

        tracing::debug!(path = %path.display(), "using config");

        parse_config(&path, &raw_config)
    } else {
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = parse_config(Path::new("config.toml"), "").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.registry_path, PathBuf::from("litellm_proxy/config.yaml"));
        assert_eq!(config.local.endpoint, "http://ollama:11434");
        assert_eq!(config.provision_timeout(), Duration::from_secs(1800));
        assert_eq!(config.provision_grace(), Duration::from_secs(5));
        assert_eq!(config.restart_timeout(), Duration::from_secs(120));
        assert_eq!(config.lock_timeout(), Duration::from_secs(30));
        assert_eq!(config.provisioning.args, ["exec", "ollama", "ollama", "pull"]);
        assert_eq!(config.restart.service, "litellm");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let raw = r#"
registry_path = "/srv/proxy/config.yaml"

[provisioning]
timeout_secs = 60

[restart]
program = "podman"
args = ["restart"]

[logging]
level = "debug"
format = "json"
"#;

        let config = parse_config(Path::new("config.toml"), raw).unwrap();

        assert_eq!(config.registry_path, PathBuf::from("/srv/proxy/config.yaml"));
        assert_eq!(config.provision_timeout(), Duration::from_secs(60));
        assert_eq!(config.provision_grace(), Duration::from_secs(5));
        assert_eq!(config.provisioning.program, "docker");
        assert_eq!(config.restart.program, "podman");
        assert_eq!(config.restart.service, "litellm");
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_extra_fields_are_found() {
        let raw = r#"
editor = "vim"

[local]
endpoint = "http://127.0.0.1:11434"
port = 11434

[telemetry]
enabled = true
"#;

        let user_config: toml::Table = toml::from_str(raw).unwrap();
        let config: Config = toml::from_str(raw).unwrap();

        let mut extra = extra_fields(&config, &user_config);
        extra.sort();

        assert_eq!(extra, ["editor", "local.port", "telemetry"]);
    }

    #[test]
    fn test_bad_type_is_an_error() {
        let err = parse_config(Path::new("config.toml"), "[lock]\ntimeout_secs = \"soon\"").unwrap_err();

        assert!(matches!(err, ConfigError::Parse(..)));
    }

    #[test]
    fn test_explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();

        let err = read_config(Some(dir.path().join("absent.toml"))).unwrap_err();

        assert!(matches!(err, ConfigError::Read(..)));
    }

    #[test]
    fn test_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "[restart]\nservice = \"proxy\"\n").unwrap();

        let config = read_config(Some(path)).unwrap();

        assert_eq!(config.restart.service, "proxy");
    }
}
