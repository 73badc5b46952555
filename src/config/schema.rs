//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the function gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, socket limits).
    pub listener: ListenerConfig,

    /// Per-connection timeouts.
    pub timeouts: TimeoutConfig,

    /// Keep-alive signalling for long invocations.
    pub heartbeat: HeartbeatConfig,

    /// System token check for `/function`.
    pub auth: AuthConfig,

    /// Upstream execution engine.
    pub engine: EngineConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Shutdown and fatal error handling.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Port to bind. `0` picks an ephemeral port.
    pub port: u16,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl ListenerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
            max_connections: 10_000,
            max_body_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Timeout configuration, applied to every connection.
///
/// The defaults sit above typical load balancer idle timeouts so the balancer
/// always closes first.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Socket inactivity allowed while a request is in flight, in seconds.
    pub request_secs: u64,

    /// Idle time allowed between requests on a kept-alive connection, in seconds.
    pub keep_alive_secs: u64,

    /// Time allowed to receive the full request head, in seconds.
    pub headers_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn headers(&self) -> Duration {
        Duration::from_secs(self.headers_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 315,
            keep_alive_secs: 301,
            headers_secs: 305,
        }
    }
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Delay before a still-running invocation emits `102 Processing`, in milliseconds.
    pub threshold_ms: u64,
}

impl HeartbeatConfig {
    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 270_000,
        }
    }
}

/// Authorization configuration.
///
/// There is no default token; a configuration without one fails validation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// System token expected as `Authorization: Bearer <token>`.
    pub system_token: String,
}


/// Upstream execution engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// URL invocations are POSTed to.
    pub endpoint: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9000/invoke".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// What to do after a fatal error has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FatalErrorPolicy {
    /// Log and keep serving.
    #[default]
    KeepRunning,
    /// Log, then stop the server.
    Exit,
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long a stopping server waits for open connections to finish, in seconds.
    pub drain_timeout_secs: u64,

    pub fatal_error_policy: FatalErrorPolicy,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 10,
            fatal_error_policy: FatalErrorPolicy::KeepRunning,
        }
    }
}
