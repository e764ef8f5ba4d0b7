pub mod validation;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::protocol::canonical::{Dialect, ToolSpec};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Describes one remote backend. Immutable for the duration of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Base URL (`http://host/v1`) or a full route URL
    /// (`http://host/v1/completions`).
    pub endpoint: String,
    #[serde(default)]
    pub dialect: Dialect,
    /// Sent as `Authorization: Bearer <api_key>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Full `Authorization` header value; wins over `api_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_headers: BTreeMap<String, String>,
    /// Fallback model ids, first one wins when no explicit model is set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_ids: Vec<String>,
    /// Ollama `keep_alive` value, e.g. `"5m"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
}

impl BackendDescriptor {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            endpoint: endpoint.into(),
            dialect,
            api_key: None,
            auth_header: None,
            extra_headers: BTreeMap::new(),
            model_ids: Vec::new(),
            keep_alive: None,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.model_ids.push(model.into());
        self
    }
}

/// Per-request sampling and tool options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default = "default_true")]
    pub include_tools: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            stop: Vec::new(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            include_tools: true,
        }
    }
}

/// HTTP and channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default)]
    pub use_env_proxy: bool,
    /// Capacity of the output channel between the stream task and the caller.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Upper bound on the error body kept for non-2xx responses.
    #[serde(default = "default_error_body_limit")]
    pub error_body_limit: usize,
}

fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_channel_capacity() -> usize {
    256
}
fn default_error_body_limit() -> usize {
    4096
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            proxy: None,
            use_env_proxy: false,
            channel_capacity: default_channel_capacity(),
            error_body_limit: default_error_body_limit(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub backend: BackendDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub options: RequestOptions,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl ClientConfig {
    #[must_use]
    pub fn new(backend: BackendDescriptor) -> Self {
        Self {
            backend,
            model: None,
            options: RequestOptions::default(),
            tools: Vec::new(),
            transport: TransportConfig::default(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<ClientConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
