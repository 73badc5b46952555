//! Process health state machine.
//!
//! # States
//! ```text
//! NotStarted → Listening → Terminating
//! ```
//!
//! `live` and `ready` are raised together once the listener accepts
//! connections. `terminating` is raised by an explicit drain request and is
//! never lowered; while it is set both probes report unavailable regardless of
//! the other two flags, which are kept for diagnostics.
//!
//! # Design Decisions
//! - Owned object injected via `Arc`, not process globals
//! - Every probe re-reads the atomics; no caller caches a verdict

use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;

/// Coarse lifecycle phase derived from the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthPhase {
    NotStarted,
    Listening,
    Terminating,
}

impl HealthPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthPhase::NotStarted => "not_started",
            HealthPhase::Listening => "listening",
            HealthPhase::Terminating => "terminating",
        }
    }
}

/// Result of evaluating a probe against the current flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Flag is raised.
    Pass,
    /// Flag is lowered.
    Fail,
    /// The process is terminating; the flag is ignored.
    Terminating,
}

impl ProbeOutcome {
    pub fn status_code(self) -> StatusCode {
        match self {
            ProbeOutcome::Pass => StatusCode::OK,
            ProbeOutcome::Fail => StatusCode::BAD_REQUEST,
            ProbeOutcome::Terminating => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Live / ready / terminating flags for one server instance.
#[derive(Debug, Default)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
    terminating: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise `live` and `ready`. Called once the listener is bound.
    pub fn mark_listening(&self) {
        self.live.store(true, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        tracing::debug!("Health flags raised: live, ready");
    }

    /// Raise `terminating`. Returns `true` if this call made the transition.
    pub fn mark_terminating(&self) -> bool {
        let first = !self.terminating.swap(true, Ordering::SeqCst);
        if first {
            tracing::info!("Instance entered terminating state");
        }
        first
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> HealthPhase {
        if self.is_terminating() {
            HealthPhase::Terminating
        } else if self.is_live() || self.is_ready() {
            HealthPhase::Listening
        } else {
            HealthPhase::NotStarted
        }
    }

    /// Evaluate the liveness probe.
    pub fn liveness(&self) -> ProbeOutcome {
        self.probe(&self.live)
    }

    /// Evaluate the readiness probe.
    pub fn readiness(&self) -> ProbeOutcome {
        self.probe(&self.ready)
    }

    fn probe(&self, flag: &AtomicBool) -> ProbeOutcome {
        if self.is_terminating() {
            ProbeOutcome::Terminating
        } else if flag.load(Ordering::SeqCst) {
            ProbeOutcome::Pass
        } else {
            ProbeOutcome::Fail
        }
    }
}
