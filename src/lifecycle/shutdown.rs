//! Shutdown coordination for the gateway.
//!
//! A server moves through `Running → Stopping(reason) → Stopped(reason)`
//! exactly once. The first stop request wins; its reason is what the
//! process exits with.

use std::sync::Arc;

use tokio::sync::watch;

/// Why the server stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `/stopServer` succeeded. The process is expected to be restarted.
    StopRequested,
    /// A local caller stopped the server through its handle.
    Requested,
    /// SIGINT or SIGTERM.
    Signal,
    /// A fatal error under the `exit` policy.
    Fatal,
}

impl StopReason {
    /// Process exit status for this reason.
    pub fn exit_code(self) -> u8 {
        match self {
            StopReason::StopRequested => 1,
            StopReason::Requested | StopReason::Signal => 0,
            StopReason::Fatal => 70,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::StopRequested => "stop_requested",
            StopReason::Requested => "requested",
            StopReason::Signal => "signal",
            StopReason::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    Stopping(StopReason),
    Stopped(StopReason),
}

/// Broadcasts the shutdown phase to every task of one server.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    tx: Arc<watch::Sender<ShutdownPhase>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ShutdownPhase::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.tx.borrow()
    }

    /// Move to `Stopping(reason)`. Returns `false` if a stop was already requested.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        let accepted = self.tx.send_if_modified(|phase| match phase {
            ShutdownPhase::Running => {
                *phase = ShutdownPhase::Stopping(reason);
                true
            }
            _ => false,
        });
        if accepted {
            tracing::info!(reason = reason.as_str(), "Shutdown requested");
        }
        accepted
    }

    /// Move to `Stopped`, keeping the reason of the winning stop request.
    pub fn mark_stopped(&self) {
        self.tx.send_if_modified(|phase| match *phase {
            ShutdownPhase::Running => {
                *phase = ShutdownPhase::Stopped(StopReason::Requested);
                true
            }
            ShutdownPhase::Stopping(reason) => {
                *phase = ShutdownPhase::Stopped(reason);
                true
            }
            ShutdownPhase::Stopped(_) => false,
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownPhase> {
        self.tx.subscribe()
    }

    /// Wait until a stop is requested.
    pub async fn stopping(&self) -> StopReason {
        let mut rx = self.subscribe();
        let reason = match rx.wait_for(|phase| *phase != ShutdownPhase::Running).await {
            Ok(phase) => reason_of(*phase),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => StopReason::Requested,
        };
        reason
    }

    /// Wait until the server has fully stopped.
    pub async fn stopped(&self) -> StopReason {
        let mut rx = self.subscribe();
        let reason = match rx
            .wait_for(|phase| matches!(phase, ShutdownPhase::Stopped(_)))
            .await
        {
            Ok(phase) => reason_of(*phase),
            Err(_) => StopReason::Requested,
        };
        reason
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

fn reason_of(phase: ShutdownPhase) -> StopReason {
    match phase {
        ShutdownPhase::Stopping(reason) | ShutdownPhase::Stopped(reason) => reason,
        ShutdownPhase::Running => StopReason::Requested,
    }
}
