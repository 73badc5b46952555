//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (open count, activity, interim writer)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection is counted from accept until its socket closes
//! - Idle and stalled connections are detected from socket activity

pub mod connection;
pub mod listener;

pub use connection::{ConnIo, ConnectionGuard, ConnectionId, ConnectionTracker, IdleVerdict, InterimWriter};
pub use listener::{ConnectionPermit, Listener, ListenerError};
