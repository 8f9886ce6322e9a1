//! Connection options and fleet configuration loading

use std::path::{Path, PathBuf};
use std::time::Duration;

use fleetsh_exec::KeySource;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "FLEETSH_CONFIG";

/// Options accepted when constructing a connection
///
/// Unknown keys are rejected, both from TOML and from `from_pairs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionOptions {
    /// SSH user, used when the endpoint does not name one
    #[serde(default)]
    pub user: Option<String>,
    /// SSH port, used when the endpoint does not name one
    #[serde(default)]
    pub port: Option<u16>,
    /// Quote every argument so the shell cannot interpret it
    #[serde(default = "default_safe")]
    pub safe: bool,
    /// Private key files tried in order
    #[serde(default)]
    pub keys: Vec<PathBuf>,
    /// Environment variable holding a base64 private key
    #[serde(default)]
    pub key_env: Option<String>,
    /// Password tried after every key was rejected
    #[serde(default)]
    pub password: Option<String>,
    /// Log every command line at info level instead of debug
    #[serde(default)]
    pub info: bool,
    /// Per-command timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_safe() -> bool {
    true
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            user: None,
            port: None,
            safe: default_safe(),
            keys: Vec::new(),
            key_env: None,
            password: None,
            info: false,
            timeout_secs: None,
        }
    }
}

impl ConnectionOptions {
    /// Build options from `key=value` style pairs
    ///
    /// Recognised keys: `user`, `port`, `safe`, `keys` (comma separated,
    /// appended), `key_env`, `password`, `info`, `timeout`.
    ///
    /// # Errors
    /// Returns `CoreError::Config` for unknown keys or unparsable values
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();

        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "user" => options.user = Some(value.to_string()),
                "port" => options.port = Some(parse_value(key, value)?),
                "safe" => options.safe = parse_value(key, value)?,
                "keys" => options.keys.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .map(PathBuf::from),
                ),
                "key_env" => options.key_env = Some(value.to_string()),
                "password" => options.password = Some(value.to_string()),
                "info" => options.info = parse_value(key, value)?,
                "timeout" => options.timeout_secs = Some(parse_value(key, value)?),
                other => return Err(CoreError::Config(format!("unknown option `{other}`"))),
            }
        }

        Ok(options)
    }

    /// Disable safe mode
    #[must_use]
    pub fn unsafe_mode(mut self) -> Self {
        self.safe = false;
        self
    }

    /// Append a private key path
    #[must_use]
    pub fn with_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.keys.push(path.into());
        self
    }

    /// Per-command timeout
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Keys in the order the SSH transport should try them
    #[must_use]
    pub fn key_sources(&self) -> Vec<KeySource> {
        let mut sources: Vec<KeySource> = self.keys.iter().cloned().map(KeySource::Path).collect();
        if let Some(var) = &self.key_env {
            sources.push(KeySource::Env(var.clone()));
        }
        sources
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CoreError> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::Config(format!("invalid value for `{key}`: {value}")))
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetConfig {
    /// Options applied to every group unless it overrides them
    #[serde(default)]
    pub defaults: ConnectionOptions,
    /// Named host groups
    #[serde(default, rename = "group")]
    pub groups: Vec<GroupConfig>,
}

/// One `[[group]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    /// Group name
    pub name: String,
    /// Member endpoints, `[user@]host[:port]`
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Run members concurrently
    #[serde(default)]
    pub parallel: bool,
    /// Replaces the file-level defaults for this group
    #[serde(default)]
    pub options: Option<ConnectionOptions>,
}

impl FleetConfig {
    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns `CoreError::Config` if the text is not valid configuration
    pub fn from_toml_str(content: &str) -> Result<Self, CoreError> {
        toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Load configuration from file
    ///
    /// # Errors
    /// Returns `CoreError::Config` if file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Load from `$FLEETSH_CONFIG` or the usual paths, else use defaults
    ///
    /// # Errors
    /// Returns `CoreError::Config` if a found file cannot be read or parsed
    pub fn load_default() -> Result<Self, CoreError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }

        let mut paths = vec![PathBuf::from("fleetsh.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("fleetsh/fleetsh.toml"));
        }

        for path in paths {
            if path.exists() {
                return Self::load(&path);
            }
        }

        tracing::warn!("no config file found, using defaults");
        Ok(Self::default())
    }

    /// Find a group by name
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Options a group's members are built with
    #[must_use]
    pub fn options_for(&self, group: &GroupConfig) -> ConnectionOptions {
        group.options.clone().unwrap_or_else(|| self.defaults.clone())
    }
}
