//! Configuration Management
//!
//! Connection settings for the VM backend and the test nodes. Values start
//! from built-in defaults and the recognized keys of a YAML file are merged
//! over them. Unknown keys are ignored.
//!
//! Loading never fails: a missing or malformed file keeps the defaults and
//! logs a warning.
//!
//! ## Recognized keys
//!
//! - `opennebula_ip`: backend host, also used for display addresses (default: `127.0.0.1`)
//! - `end_point`: backend RPC endpoint (default: `http://127.0.0.1:2633/RPC2`)
//! - `credentials`: backend `user:password` (default: `oneadmin:oneadmin`)
//! - `local_sudo_pass`: local administrative password (default: `password`)
//! - `default_ssh_pass`: remote login password for nodes (default: `password`)
//! - `default_interface_ip`: pattern selecting the default interface address (default: `/^127.*/`)

use std::fmt;
use std::path::Path;

use serde_yaml_ng::Value;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/test-agent/config.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    BackendHost,
    Endpoint,
    Credentials,
    LocalSudoPassword,
    DefaultSshPassword,
    DefaultInterfaceIp,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 6] = [
        ConfigKey::BackendHost,
        ConfigKey::Endpoint,
        ConfigKey::Credentials,
        ConfigKey::LocalSudoPassword,
        ConfigKey::DefaultSshPassword,
        ConfigKey::DefaultInterfaceIp,
    ];

    /// Key as written in the configuration file.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::BackendHost => "opennebula_ip",
            ConfigKey::Endpoint => "end_point",
            ConfigKey::Credentials => "credentials",
            ConfigKey::LocalSudoPassword => "local_sudo_pass",
            ConfigKey::DefaultSshPassword => "default_ssh_pass",
            ConfigKey::DefaultInterfaceIp => "default_interface_ip",
        }
    }

    pub fn from_file_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }

    /// Whether the value should be masked when shown to an operator.
    pub fn is_secret(&self) -> bool {
        matches!(
            self,
            ConfigKey::Credentials | ConfigKey::LocalSudoPassword | ConfigKey::DefaultSshPassword
        )
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    backend_host: String,
    endpoint: String,
    credentials: String,
    local_sudo_password: String,
    default_ssh_password: String,
    default_interface_ip: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_host: "127.0.0.1".to_string(),
            endpoint: "http://127.0.0.1:2633/RPC2".to_string(),
            credentials: "oneadmin:oneadmin".to_string(),
            local_sudo_password: "password".to_string(),
            default_ssh_password: "password".to_string(),
            default_interface_ip: "/^127.*/".to_string(),
        }
    }
}

impl Config {
    /// Load the configuration file at `path`, falling back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::read(path) {
            Ok(config) => {
                debug!(path = %path.display(), "Configuration loaded");
                config
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "{} Using defaults.",
                    fallback_reason(&err)
                );
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Parse a YAML document and merge its recognized keys over the defaults.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let document: Value = serde_yaml_ng::from_str(raw)?;
        let mapping = match document {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(mapping) => mapping,
            _ => {
                return Err(ConfigError::InvalidDocument(
                    "top level must be a mapping".to_string(),
                ));
            }
        };

        let mut overrides = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let key = match key {
                Value::String(key) => key,
                other => {
                    debug!(key = ?other, "Ignoring non-string configuration key");
                    continue;
                }
            };
            match scalar_to_string(value) {
                Some(value) => overrides.push((key, value)),
                None => warn!(key = %key, "Ignoring configuration value that is not a scalar"),
            }
        }

        Ok(Self::default().with_overrides(overrides))
    }

    /// Merge recognized keys over this configuration. Unknown keys are ignored.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in overrides {
            let key = key.as_ref();
            match ConfigKey::from_file_key(key) {
                Some(known) => *self.slot(known) = value.into(),
                None => debug!(key = %key, "Ignoring unknown configuration key"),
            }
        }
        self
    }

    pub fn get(&self, key: ConfigKey) -> &str {
        match key {
            ConfigKey::BackendHost => &self.backend_host,
            ConfigKey::Endpoint => &self.endpoint,
            ConfigKey::Credentials => &self.credentials,
            ConfigKey::LocalSudoPassword => &self.local_sudo_password,
            ConfigKey::DefaultSshPassword => &self.default_ssh_password,
            ConfigKey::DefaultInterfaceIp => &self.default_interface_ip,
        }
    }

    fn slot(&mut self, key: ConfigKey) -> &mut String {
        match key {
            ConfigKey::BackendHost => &mut self.backend_host,
            ConfigKey::Endpoint => &mut self.endpoint,
            ConfigKey::Credentials => &mut self.credentials,
            ConfigKey::LocalSudoPassword => &mut self.local_sudo_password,
            ConfigKey::DefaultSshPassword => &mut self.default_ssh_password,
            ConfigKey::DefaultInterfaceIp => &mut self.default_interface_ip,
        }
    }

    pub fn backend_host(&self) -> &str {
        &self.backend_host
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn credentials(&self) -> &str {
        &self.credentials
    }

    pub fn local_sudo_password(&self) -> &str {
        &self.local_sudo_password
    }

    pub fn default_ssh_password(&self) -> &str {
        &self.default_ssh_password
    }

    pub fn default_interface_ip(&self) -> &str {
        &self.default_interface_ip
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Why `load` fell back to the defaults.
fn fallback_reason(err: &ConfigError) -> &'static str {
    match err {
        ConfigError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            "YAML configuration file couldn't be found."
        }
        ConfigError::Io(_) => "YAML configuration file couldn't be read.",
        ConfigError::Yaml(_) | ConfigError::InvalidDocument(_) => {
            "YAML configuration file contains invalid syntax."
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml_ng::Error),
    InvalidDocument(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "IO error: {}", err),
            ConfigError::Yaml(err) => write!(f, "YAML error: {}", err),
            ConfigError::InvalidDocument(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Yaml(err) => Some(err),
            ConfigError::InvalidDocument(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        ConfigError::Yaml(err)
    }
}
