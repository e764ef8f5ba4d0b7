use rustc_hash::FxHashSet;

use super::{ClientConfig, ConfigError};

/// Validate the full client config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    validate_backend(config)?;
    validate_options(config)?;
    validate_tools(config)?;
    validate_transport(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_backend(config: &ClientConfig) -> Result<(), ConfigError> {
    let backend = &config.backend;
    let parsed = url::Url::parse(backend.endpoint.trim())
        .map_err(|e| validation_err(format!("backend.endpoint is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "backend.endpoint must use http or https, got '{}'",
            parsed.scheme()
        )));
    }
    for (name, value) in &backend.extra_headers {
        if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(validation_err(format!(
                "backend.extra_headers contains an invalid header name '{name}'"
            )));
        }
        if http::HeaderValue::from_str(value).is_err() {
            return Err(validation_err(format!(
                "backend.extra_headers['{name}'] is not a valid header value"
            )));
        }
    }
    if backend.model_ids.iter().any(|id| id.trim().is_empty()) {
        return Err(validation_err("backend.model_ids contains an empty id"));
    }
    Ok(())
}

fn validate_options(config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(temperature) = config.options.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(validation_err(format!(
                "options.temperature must be within 0..=2, got {temperature}"
            )));
        }
    }
    if let Some(top_p) = config.options.top_p {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(validation_err(format!(
                "options.top_p must be within 0..=1, got {top_p}"
            )));
        }
    }
    if config.options.max_tokens == Some(0) {
        return Err(validation_err(
            "options.max_tokens must be greater than 0 when set",
        ));
    }
    Ok(())
}

fn validate_tools(config: &ClientConfig) -> Result<(), ConfigError> {
    let mut seen = FxHashSet::default();
    for tool in &config.tools {
        let name = tool.name.trim();
        if name.is_empty() {
            return Err(validation_err("tools contains a tool with an empty name"));
        }
        if !seen.insert(name) {
            return Err(validation_err(format!("duplicate tool name '{name}'")));
        }
        if !tool.parameters.is_object() {
            return Err(validation_err(format!(
                "tool '{name}' parameters must be a JSON object"
            )));
        }
    }
    Ok(())
}

fn validate_transport(config: &ClientConfig) -> Result<(), ConfigError> {
    let transport = &config.transport;
    if transport.channel_capacity == 0 {
        return Err(validation_err(
            "transport.channel_capacity must be greater than 0",
        ));
    }
    if transport.error_body_limit == 0 {
        return Err(validation_err(
            "transport.error_body_limit must be greater than 0",
        ));
    }
    if transport.timeout_secs == 0 {
        return Err(validation_err("transport.timeout_secs must be greater than 0"));
    }
    if let Some(proxy) = transport.proxy.as_deref() {
        if url::Url::parse(proxy.trim()).is_err() {
            return Err(validation_err(format!(
                "transport.proxy is not a valid URL: '{proxy}'"
            )));
        }
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED", "TRACE",
];

fn validate_log_level(config: &ClientConfig) -> Result<(), ConfigError> {
    let level = config.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {VALID_LOG_LEVELS:?}, got '{}'",
            config.log_level
        )));
    }
    Ok(())
}
