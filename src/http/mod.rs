//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::listener)
//!     → server.rs (hyper HTTP/1 connection, watchdog, interim writer)
//!     → access_log.rs (one line per request, probes excluded)
//!     → security::auth (system token, /function only)
//!     → routes.rs (probes, drain, stop, invocation)
//!         → heartbeat.rs (102 Processing for long invocations)
//!     → response.rs (errors as {"errors":[...]})
//!     → Send to client
//! ```

pub mod access_log;
pub mod heartbeat;
pub mod response;
pub mod routes;
pub mod server;

pub use heartbeat::{HeartbeatKeeper, ProcessingSignal};
pub use response::{ApiError, ErrorDescriptor};
pub use server::{build_router, AppState, ConnectionError, HttpServer};
