//! Configuration types for namepal
//!
//! Configuration is read once at startup from a YAML file and passed into
//! each component's constructor. There is no hot-reload and no global
//! configuration value.
//!
//! The file path comes from `NAMEPAL_CONFIG`; a few values can be
//! overridden from the environment so secrets need not live in the file:
//!
//! - `NAMEPAL_LOG_LEVEL`: log level for either daemon
//! - `NAMEPAL_BACKEND_TOKEN`: pi-hole token (manager)
//! - `NAMEPAL_ENDPOINT`: manager base URL (agent)

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

/// Environment variable holding the configuration file path
pub const CONFIG_PATH_ENV: &str = "NAMEPAL_CONFIG";

/// Default timeout for a single outbound HTTP call
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Configuration of the reconciling daemon (`namepal-manager`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Address the registration endpoint listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// DNS backend to reconcile against
    pub backend: BackendConfig,

    /// Log level filter
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl ManagerConfig {
    /// Parse from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    /// Read the file named by `NAMEPAL_CONFIG` (default `manager.yml`),
    /// apply environment overrides and validate
    pub fn load() -> Result<Self> {
        let mut config: Self = read_file(&config_path("manager.yml"))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup("NAMEPAL_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(new_token) = lookup("NAMEPAL_BACKEND_TOKEN")
            && let BackendConfig::Pihole { token, .. } = &mut self.backend
        {
            *token = new_token;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        validate_log_level(&self.log_level)
    }
}

/// DNS backend configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// pi-hole `customdns` API
    Pihole {
        /// API endpoint (e.g. "http://pi.hole/admin/api.php")
        url: String,
        /// API token
        token: String,
        /// Per-call timeout in seconds
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },

    /// AdGuard Home rewrite API
    Adguard {
        /// Control API base (e.g. "http://adguard.lan/control")
        url: String,
        /// Basic auth user
        #[serde(default)]
        username: Option<String>,
        /// Basic auth password
        #[serde(default)]
        password: Option<String>,
        /// Per-call timeout in seconds
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },

    /// Custom backend registered under `factory`
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl BackendConfig {
    /// Validate the backend configuration
    pub fn validate(&self) -> Result<()> {
        match self {
            BackendConfig::Pihole {
                url,
                token,
                timeout_secs,
            } => {
                validate_http_url("pihole url", url)?;
                if token.is_empty() {
                    return Err(Error::config("pihole token cannot be empty"));
                }
                validate_timeout(*timeout_secs)
            }
            BackendConfig::Adguard {
                url,
                username,
                password,
                timeout_secs,
            } => {
                validate_http_url("adguard url", url)?;
                if username.is_some() != password.is_some() {
                    return Err(Error::config(
                        "adguard username and password must be set together",
                    ));
                }
                validate_timeout(*timeout_secs)
            }
            BackendConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(Error::config("Custom backend factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(Error::config("Custom backend config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the backend type name
    pub fn type_name(&self) -> &str {
        match self {
            BackendConfig::Pihole { .. } => "pihole",
            BackendConfig::Adguard { .. } => "adguard",
            BackendConfig::Custom { factory, .. } => factory,
        }
    }
}

// Secrets never reach the logs.
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendConfig::Pihole {
                url, timeout_secs, ..
            } => f
                .debug_struct("Pihole")
                .field("url", url)
                .field("token", &"<REDACTED>")
                .field("timeout_secs", timeout_secs)
                .finish(),
            BackendConfig::Adguard {
                url,
                username,
                timeout_secs,
                ..
            } => f
                .debug_struct("Adguard")
                .field("url", url)
                .field("username", username)
                .field("password", &"<REDACTED>")
                .field("timeout_secs", timeout_secs)
                .finish(),
            BackendConfig::Custom { factory, .. } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .finish_non_exhaustive(),
        }
    }
}

/// Configuration of the watching daemon (`namepal-agent`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the manager (e.g. "http://manager.lan:8000")
    pub endpoint: String,

    /// Workload source to watch
    #[serde(default)]
    pub source: SourceConfig,

    /// Watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Timeout in seconds for one registration request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Log level filter
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl AgentConfig {
    /// Parse from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    /// Read the file named by `NAMEPAL_CONFIG` (default `agent.yml`),
    /// apply environment overrides and validate
    pub fn load() -> Result<Self> {
        let mut config: Self = read_file(&config_path("agent.yml"))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup("NAMEPAL_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(endpoint) = lookup("NAMEPAL_ENDPOINT") {
            self.endpoint = endpoint;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_http_url("endpoint", &self.endpoint)?;
        self.source.validate()?;
        self.watcher.validate()?;
        validate_timeout(self.timeout_secs)?;
        validate_log_level(&self.log_level)
    }
}

/// Workload source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Docker Engine API
    Docker {
        /// Engine address: `unix:///path/to/docker.sock` or `tcp://host:port`
        #[serde(default = "default_docker_host")]
        host: String,

        /// Timeout for listing and inspection requests, in seconds
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },

    /// Custom source registered under `factory`
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl SourceConfig {
    /// Validate the source configuration
    pub fn validate(&self) -> Result<()> {
        match self {
            SourceConfig::Docker { host, timeout_secs } => {
                validate_timeout(*timeout_secs)?;
                let supported = ["unix://", "tcp://", "http://"];
                if !supported.iter().any(|scheme| host.starts_with(scheme)) {
                    return Err(Error::config(format!(
                        "docker host must start with unix://, tcp:// or http://. Got: {}",
                        host
                    )));
                }
                Ok(())
            }
            SourceConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(Error::config("Custom source factory cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Get the source type name
    pub fn type_name(&self) -> &str {
        match self {
            SourceConfig::Docker { .. } => "docker",
            SourceConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Docker {
            host: default_docker_host(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Watcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Label prefix of router rules (`traefik.http.routers.` + name + suffix)
    #[serde(default = "default_router_label_prefix")]
    pub router_label_prefix: String,

    /// Label suffix of router rules
    #[serde(default = "default_router_label_suffix")]
    pub router_label_suffix: String,

    /// Re-send a desired set even when it equals the previously sent one
    ///
    /// Re-sending lets the manager heal records changed behind its back.
    #[serde(default = "default_emit_unchanged")]
    pub emit_unchanged: bool,
}

impl WatcherConfig {
    /// Validate the watcher configuration
    pub fn validate(&self) -> Result<()> {
        if self.router_label_prefix.is_empty() {
            return Err(Error::config("router_label_prefix cannot be empty"));
        }
        Ok(())
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            router_label_prefix: default_router_label_prefix(),
            router_label_suffix: default_router_label_suffix(),
            emit_unchanged: default_emit_unchanged(),
        }
    }
}

fn config_path(default: &str) -> String {
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| default.to_string())
}

fn read_file<T: DeserializeOwned>(path: &str) -> Result<T> {
    let raw = std::fs::read_to_string(Path::new(path))
        .map_err(|e| Error::config(format!("cannot read {}: {}", path, e)))?;
    serde_yaml::from_str(&raw).map_err(|e| Error::config(format!("cannot parse {}: {}", path, e)))
}

fn validate_http_url(what: &str, url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(Error::config(format!("{} cannot be empty", what)));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(Error::config(format!(
            "{} must use HTTP or HTTPS scheme. Got: {}",
            what, url
        )));
    }
    Ok(())
}

fn validate_timeout(timeout_secs: u64) -> Result<()> {
    if !(1..=300).contains(&timeout_secs) {
        return Err(Error::config(format!(
            "timeout_secs must be between 1 and 300. Got: {}",
            timeout_secs
        )));
    }
    Ok(())
}

fn validate_log_level(level: &str) -> Result<()> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(Error::config(format!(
            "log level '{}' is not valid. Valid levels: trace, debug, info, warn, error",
            level
        ))),
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_docker_host() -> String {
    "unix:///var/run/docker.sock".to_string()
}

fn default_router_label_prefix() -> String {
    "traefik.http.routers.".to_string()
}

fn default_router_label_suffix() -> String {
    ".rule".to_string()
}

fn default_emit_unchanged() -> bool {
    true
}
