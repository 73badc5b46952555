//! Drain and stop decisions for the `/openConnections` and `/stopServer`
//! endpoints.

use std::sync::Arc;

use crate::health::HealthState;
use crate::lifecycle::shutdown::{ShutdownController, StopReason};
use crate::net::ConnectionTracker;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrainError {
    /// Other clients still hold connections open.
    #[error("{0} connection(s) still open.")]
    ConnectionsStillOpen(usize),
}

/// Ties health, open connections and shutdown together.
///
/// Callers of both operations are themselves holding a connection, so
/// counts exclude it.
#[derive(Debug, Clone)]
pub struct DrainController {
    health: Arc<HealthState>,
    connections: ConnectionTracker,
    shutdown: ShutdownController,
}

impl DrainController {
    pub fn new(
        health: Arc<HealthState>,
        connections: ConnectionTracker,
        shutdown: ShutdownController,
    ) -> Self {
        Self {
            health,
            connections,
            shutdown,
        }
    }

    /// Report other clients' open connections, entering the terminating
    /// phase first when `terminate` is set.
    pub fn request_drain(&self, terminate: bool) -> usize {
        if terminate {
            self.health.mark_terminating();
        }
        let open = self.connections.open_excluding_caller();
        tracing::info!(
            open_connections = open,
            health_phase = self.health.phase().as_str(),
            "open connections"
        );
        open
    }

    /// Stop the server if no other client holds a connection.
    ///
    /// On success the stop is scheduled; the caller's response is still
    /// written before the server closes.
    pub fn request_stop(&self) -> Result<(), DrainError> {
        let open = self.connections.open_excluding_caller();
        if open > 0 {
            tracing::error!(open_connections = open, "Refusing to stop server");
            return Err(DrainError::ConnectionsStillOpen(open));
        }
        tracing::info!("preparing to shut down.");
        self.shutdown.request_stop(StopReason::StopRequested);
        Ok(())
    }
}
