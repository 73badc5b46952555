//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! constraints. All errors are collected, not just the first.

use crate::config::schema::GatewayConfig;
use url::Url;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Validate a configuration, returning every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be greater than 0"));
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.request_secs", timeouts.request_secs),
        ("timeouts.keep_alive_secs", timeouts.keep_alive_secs),
        ("timeouts.headers_secs", timeouts.headers_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.heartbeat.threshold_ms == 0 {
        errors.push(ValidationError::new("heartbeat.threshold_ms", "must be greater than 0"));
    } else if config.heartbeat.threshold() >= timeouts.request() {
        // The connection would be dropped for inactivity before the first heartbeat.
        errors.push(ValidationError::new(
            "heartbeat.threshold_ms",
            format!(
                "must be below timeouts.request_secs ({}s)",
                timeouts.request_secs
            ),
        ));
    }

    if config.auth.system_token.trim().is_empty() {
        errors.push(ValidationError::new("auth.system_token", "must not be empty"));
    }

    match Url::parse(&config.engine.endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            "engine.endpoint",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("engine.endpoint", e.to_string())),
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.system_token = "s3cret".into();
        config
    }

    #[test]
    fn defaults_are_valid_once_a_token_is_set() {
        assert_eq!(validate_config(&configured()), Ok(()));
    }

    #[test]
    fn default_config_has_no_usable_token() {
        let config = GatewayConfig::default();
        assert!(config.auth.system_token.is_empty());

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "auth.system_token");
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.listener.max_connections = 0;
        config.timeouts.keep_alive_secs = 0;
        config.auth.system_token = "  ".into();
        config.engine.endpoint = "ftp://engine".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.max_connections",
                "timeouts.keep_alive_secs",
                "auth.system_token",
                "engine.endpoint",
            ]
        );
    }

    #[test]
    fn heartbeat_must_fire_before_request_timeout() {
        let mut config = configured();
        config.timeouts.request_secs = 10;
        config.heartbeat.threshold_ms = 10_000;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "heartbeat.threshold_ms");
    }
}
