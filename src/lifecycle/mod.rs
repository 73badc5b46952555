//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (start_server):
//!     Reserve singleton → Bind listener → Mark live/ready → Spawn accept loop
//!
//! Shutdown (shutdown.rs):
//!     Stop requested → Close listener → Drain connections → Release singleton → Stopped
//!
//! Drain (drain.rs):
//!     /openConnections?terminate=true → probes fail
//!     /stopServer → Stopping(StopRequested) when no other client is connected
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Stopping(Signal)
//! ```
//!
//! # Design Decisions
//! - At most one server per process; a second start fails without side effects
//! - The server never exits the process itself; `main` does once it sees Stopped
//! - Shutdown has a deadline: connections still open after it are aborted

pub mod drain;
pub mod shutdown;
pub mod signals;
pub mod supervisor;

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{const_mutex, Mutex};

use crate::config::GatewayConfig;
use crate::engine::InvocationEngine;
use crate::health::HealthState;
use crate::http::{AppState, HeartbeatKeeper, HttpServer};
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::observability::fatal::{self, FatalErrorReporter};
use crate::security::Authorizer;

pub use drain::{DrainController, DrainError};
pub use shutdown::{ShutdownController, ShutdownPhase, StopReason};
pub use signals::shutdown_signal;

static INSTANCE: Mutex<Slot> = const_mutex(Slot::Empty);

enum Slot {
    Empty,
    Starting,
    Running(ShutdownController),
}

/// Holds the singleton slot while a server starts; frees it if startup fails.
struct Reservation {
    armed: bool,
}

impl Reservation {
    fn acquire() -> Result<Self, LifecycleError> {
        let mut slot = INSTANCE.lock();
        match *slot {
            Slot::Empty => {
                *slot = Slot::Starting;
                Ok(Self { armed: true })
            }
            Slot::Starting | Slot::Running(_) => Err(LifecycleError::AlreadyStarted),
        }
    }

    fn commit(mut self, shutdown: ShutdownController) {
        *INSTANCE.lock() = Slot::Running(shutdown);
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            *INSTANCE.lock() = Slot::Empty;
        }
    }
}

fn release_instance() {
    *INSTANCE.lock() = Slot::Empty;
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("server already started")]
    AlreadyStarted,
    #[error("no server is running")]
    NotFound,
    #[error(transparent)]
    Bind(#[from] ListenerError),
}

/// External collaborators the server hands requests to.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn InvocationEngine>,
    pub authorizer: Arc<dyn Authorizer>,
}

/// A running server.
#[derive(Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    health: Arc<HealthState>,
    connections: ConnectionTracker,
    shutdown: ShutdownController,
    reporter: FatalErrorReporter,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// All open client connections.
    pub fn open_connections(&self) -> usize {
        self.connections.open_count()
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.shutdown.phase()
    }

    /// Reporter for detached work started on behalf of this server.
    pub fn reporter(&self) -> &FatalErrorReporter {
        &self.reporter
    }

    /// Wait until the server has stopped, for whatever reason.
    pub async fn stopped(&self) -> StopReason {
        self.shutdown.stopped().await
    }

    /// Request a stop and wait for it. An earlier stop request keeps its reason.
    pub async fn stop(&self, reason: StopReason) -> StopReason {
        self.shutdown.request_stop(reason);
        self.shutdown.stopped().await
    }
}

/// Start the process's server.
///
/// Fails with [`LifecycleError::AlreadyStarted`] while another server is
/// starting or running; that server is left untouched.
pub async fn start_server(
    config: &GatewayConfig,
    collaborators: Collaborators,
) -> Result<ServerHandle, LifecycleError> {
    let reservation = Reservation::acquire()?;

    let listener = Listener::bind(&config.listener).await?;
    let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

    let health = Arc::new(HealthState::new());
    let connections = ConnectionTracker::new();
    let shutdown = ShutdownController::new();

    let reporter = FatalErrorReporter::new(config.shutdown.fatal_error_policy)
        .with_shutdown(shutdown.clone());
    fatal::install_panic_hook(reporter.clone());

    let state = AppState {
        health: Arc::clone(&health),
        drain: DrainController::new(Arc::clone(&health), connections.clone(), shutdown.clone()),
        engine: collaborators.engine,
        authorizer: collaborators.authorizer,
        heartbeat: HeartbeatKeeper::new(config.heartbeat.threshold()),
    };
    let server = HttpServer::new(config, state, connections.clone(), shutdown.clone());

    health.mark_listening();
    reservation.commit(shutdown.clone());
    tracing::info!(
        address = %local_addr,
        health_phase = health.phase().as_str(),
        request_timeout_secs = config.timeouts.request_secs,
        keep_alive_timeout_secs = config.timeouts.keep_alive_secs,
        headers_timeout_secs = config.timeouts.headers_secs,
        "Server listening"
    );

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let reason = server.run(listener).await;
            fatal::clear_panic_reporter();
            release_instance();
            tracing::info!(reason = reason.as_str(), "Server stopped");
            shutdown.mark_stopped();
        }
    });

    Ok(ServerHandle {
        local_addr,
        health,
        connections,
        shutdown,
        reporter,
    })
}

/// Stop the process's server and wait until it has stopped.
pub async fn stop_server() -> Result<StopReason, LifecycleError> {
    let shutdown = match &*INSTANCE.lock() {
        Slot::Running(shutdown) => shutdown.clone(),
        Slot::Empty | Slot::Starting => return Err(LifecycleError::NotFound),
    };
    shutdown.request_stop(StopReason::Requested);
    Ok(shutdown.stopped().await)
}
