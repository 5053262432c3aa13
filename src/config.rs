//! Backend configuration.
//!
//! Process settings come from the environment; the Elastic instance list,
//! catalog source and accepted tokens come from a JSON file. Both are loaded
//! once at startup and passed by value (or `Arc`) to whatever needs them.

use std::env;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::catalog::Entity;
use crate::{BackendError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "./config/elastic.json";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 7007;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Base URL and API key for one Kibana or Elasticsearch endpoint.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceCredentials {
    pub base_url: String,
    pub api_key: String,
}

impl InstanceCredentials {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

// API keys must never end up in logs.
impl fmt::Debug for InstanceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceCredentials")
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

/// A named Elastic deployment. Entities select one through the
/// `elastic/instance` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    #[serde(default)]
    pub kibana: Option<InstanceCredentials>,
    #[serde(default)]
    pub elasticsearch: Option<InstanceCredentials>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ElasticConfig {
    #[serde(default)]
    pub allow_guests: Option<bool>,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConfig {
    /// Catalog API root, e.g. `http://localhost:7007/api/catalog`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Entities served when no catalog URL is configured.
    #[serde(default)]
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

#[derive(Clone, Deserialize)]
pub struct TokenConfig {
    pub token: String,
    pub subject: String,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("token", &"<REDACTED>")
            .field("subject", &self.subject)
            .finish()
    }
}

/// Contents of the backend configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    pub elastic: ElasticConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl BackendConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| BackendError::Config(format!("Invalid backend configuration: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BackendError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }
}

/// Read-only lookup over the configured instances.
#[derive(Debug, Clone)]
pub struct InstanceRegistry {
    instances: Vec<InstanceConfig>,
    allow_guests: Option<bool>,
}

impl InstanceRegistry {
    pub fn new(config: ElasticConfig) -> Self {
        Self {
            instances: config.instances,
            allow_guests: config.allow_guests,
        }
    }

    /// Returns the instance called `name`. There is no fallback: an unknown
    /// name is a configuration problem, not something to paper over.
    pub fn resolve(&self, name: &str) -> Result<&InstanceConfig> {
        self.instances
            .iter()
            .find(|instance| instance.name == name)
            .ok_or_else(|| BackendError::InstanceNotFound(name.to_string()))
    }

    /// Unauthenticated callers are let through unless `allow_guests` is
    /// explicitly set to `false`.
    pub fn is_guest_access_allowed(&self) -> bool {
        self.allow_guests.unwrap_or(true)
    }

    pub fn instances(&self) -> &[InstanceConfig] {
        &self.instances
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Process settings read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub config_path: String,
    pub host: String,
    pub port: u16,
    pub request_timeout_ms: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: DEFAULT_CONFIG_PATH.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::Compact,
            cors_origin: None,
        }
    }
}

impl ServerConfig {
    /// Loads settings from the environment, reading a `.env` file first if
    /// one is present.
    ///
    /// - `ELASTIC_BACKEND_CONFIG`: path of the JSON config file
    /// - `HOST`, `PORT`: listen address
    /// - `REQUEST_TIMEOUT_MS`: timeout for Kibana/Elasticsearch calls
    /// - `LOG_LEVEL`, `LOG_FORMAT` (`compact` or `json`)
    /// - `CORS_ORIGIN`: enables CORS for a single origin
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let log_format = match env::var("LOG_FORMAT") {
            Ok(value) => parse_log_format(&value)?,
            Err(_) => defaults.log_format,
        };

        Ok(Self {
            config_path: env::var("ELASTIC_BACKEND_CONFIG").unwrap_or(defaults.config_path),
            host: env::var("HOST").unwrap_or(defaults.host),
            port: parse_env("PORT", defaults.port)?,
            request_timeout_ms: parse_env("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            cors_origin: env::var("CORS_ORIGIN").ok().filter(|o| !o.is_empty()),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_log_format(value: &str) -> Result<LogFormat> {
    match value.to_ascii_lowercase().as_str() {
        "compact" | "" => Ok(LogFormat::Compact),
        "json" => Ok(LogFormat::Json),
        other => Err(BackendError::Config(format!(
            "LOG_FORMAT must be 'compact' or 'json', got '{}'",
            other
        ))),
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, default: T) -> Result<T> {
    match env::var(var) {
        Ok(value) => value.parse().map_err(|_| {
            BackendError::Config(format!("{} has an invalid value '{}'", var, value))
        }),
        Err(_) => Ok(default),
    }
}
