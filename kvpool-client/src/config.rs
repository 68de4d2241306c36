//! Pool configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via KVPOOL_CONFIG)
//! 3. Environment variables
//!
//! A config file names one or more store targets; each target gets its own
//! independent pool:
//!
//! ```yaml
//! max_connections: 10
//! admission: all_time_created
//! targets:
//!   main:
//!     host: 10.0.0.5
//!     port: 6379
//!     password: secret
//!     select: 2
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pool kind used as the prefix of pool names.
pub const POOL_KIND: &str = "redis";

/// Default ceiling on connections per pool.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Hard time budget for one reconnect handshake.
pub const RECONNECT_TIMEOUT: Duration = Duration::from_millis(50);

/// How `prepare_one` decides whether the pool may grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// `total_created + connecting` against the ceiling. Connections that
    /// closed and were discarded keep counting.
    #[default]
    AllTimeCreated,
    /// `idle + in_use + connecting` against the ceiling.
    Live,
}

impl AdmissionPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "all_time_created" | "alltimecreated" | "created" => Some(AdmissionPolicy::AllTimeCreated),
            "live" => Some(AdmissionPolicy::Live),
            _ => None,
        }
    }
}

/// Address and session setup for one store endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Store host.
    pub host: String,
    /// Store port.
    pub port: u16,
    /// Credential sent with `auth` after connecting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Namespace selected with `select` after authenticating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<i64>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: kvpool_protocol::DEFAULT_PORT,
            password: None,
            select: None,
        }
    }
}

impl TargetConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_select(mut self, namespace: i64) -> Self {
        self.select = Some(namespace);
        self
    }

    /// Returns `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn apply_env_overrides(&mut self, name: &str) {
        let prefix = format!("KVPOOL_{}", env_key(name));

        if let Ok(host) = std::env::var(format!("{}_HOST", prefix)) {
            self.host = host;
        }

        if let Ok(port) = std::env::var(format!("{}_PORT", prefix)) {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }

        if let Ok(password) = std::env::var(format!("{}_PASSWORD", prefix)) {
            self.password = if password.is_empty() {
                None
            } else {
                Some(password)
            };
        }

        if let Ok(select) = std::env::var(format!("{}_SELECT", prefix)) {
            if let Ok(parsed) = select.parse() {
                self.select = Some(parsed);
            }
        }
    }
}

fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// File-level configuration covering every target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection ceiling applied to each target's pool.
    pub max_connections: usize,
    /// Growth admission check.
    pub admission: AdmissionPolicy,
    /// Named store targets.
    pub targets: BTreeMap<String, TargetConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            admission: AdmissionPolicy::default(),
            targets: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("KVPOOL_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("KVPOOL_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }

        if let Ok(policy) = std::env::var("KVPOOL_ADMISSION") {
            if let Some(parsed) = AdmissionPolicy::parse(&policy) {
                self.admission = parsed;
            }
        }

        for (name, target) in self.targets.iter_mut() {
            target.apply_env_overrides(name);
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        for (name, target) in &self.targets {
            if target.host.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "target '{}' has an empty host",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Builds the pool configuration for one named target.
    pub fn pool_config(&self, name: &str) -> Result<PoolConfig, ConfigError> {
        let target = self
            .targets
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTarget(name.to_string()))?;
        Ok(PoolConfig::new(name, target.clone())
            .with_max_connections(self.max_connections)
            .with_admission(self.admission))
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Configuration of a single pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Target name, e.g. `main`.
    pub name: String,
    /// Endpoint and session setup.
    pub target: TargetConfig,
    /// Connection ceiling.
    pub max_connections: usize,
    /// Growth admission check.
    pub admission: AdmissionPolicy,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>, target: TargetConfig) -> Self {
        Self {
            name: name.into(),
            target,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            admission: AdmissionPolicy::default(),
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_admission(mut self, admission: AdmissionPolicy) -> Self {
        self.admission = admission;
        self
    }

    /// Diagnostic pool name, `redis:<target>`.
    pub fn pool_name(&self) -> String {
        format!("{}:{}", POOL_KIND, self.name)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
    UnknownTarget(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
            ConfigError::UnknownTarget(name) => {
                write!(f, "no target named '{}' in configuration", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
