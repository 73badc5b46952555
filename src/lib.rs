//! Function gateway library.

pub mod config;
pub mod context;
pub mod engine;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;

pub use config::schema::GatewayConfig;
pub use context::RequestContext;
pub use lifecycle::{start_server, stop_server, Collaborators, LifecycleError, ServerHandle, StopReason};
