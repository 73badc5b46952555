//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! lifecycle::start_server (listener bound)
//!     → state.rs: live = ready = true
//!
//! lifecycle::drain (drain request with terminate=true)
//!     → state.rs: terminating = true
//!
//! /livez, /readyz
//!     → state.rs probe evaluation → 200 / 400 / 503
//! ```

pub mod state;

pub use state::{HealthPhase, HealthState, ProbeOutcome};
