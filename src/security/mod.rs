//! Request authorization.
//!
//! # Design Decisions
//! - The check is a trait so deployments can swap the policy
//! - Only `/function` is gated; probes and admin routes stay open for
//!   orchestration tooling running next to the process
//! - Tokens are compared in constant time

pub mod auth;

pub use auth::{require_system_token, Authorizer, SystemTokenAuth};
