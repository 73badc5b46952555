//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → consumed once by lifecycle::start_server
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; timeouts apply for the life of the server
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuthConfig, EngineConfig, FatalErrorPolicy, GatewayConfig, HeartbeatConfig, ListenerConfig,
    ObservabilityConfig, ShutdownConfig, TimeoutConfig,
};
