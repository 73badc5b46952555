//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request handling, connection serving, detached tasks
//!     → logging.rs (key=value lines, enriched with the request context)
//!     → metrics.rs (counters, gauges, histograms)
//!     → fatal.rs   (panics and unobserved task failures)
//! ```
//!
//! # Design Decisions
//! - One log line per event, context fields appended by the formatter
//! - Metrics are cheap (atomic increments) and no-ops until installed
//! - Fatal errors are reported once, then the configured policy decides

pub mod fatal;
pub mod logging;
pub mod metrics;

pub use fatal::{FailureOrigin, FatalErrorReporter, FatalVerdict};
