//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers and middleware
//! - Accept connections and serve each one with hyper's HTTP/1 machinery
//! - Enforce headers, keep-alive and request timeouts per connection
//! - Hand each connection an [`InterimWriter`] for `102 Processing`
//! - Close the listener and drain connections once a stop is requested
//!
//! # Design Decisions
//! - Connections are served directly with `hyper::server::conn::http1` so the
//!   socket is ours; interim responses are written alongside hyper
//! - Every connection task lives in one [`TaskSupervisor`]
//! - A per-connection watchdog ticks once a second and compares socket
//!   activity with the configured timeouts

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;

use crate::config::GatewayConfig;
use crate::engine::InvocationEngine;
use crate::health::HealthState;
use crate::http::access_log::access_log;
use crate::http::heartbeat::HeartbeatKeeper;
use crate::http::response::ApiError;
use crate::http::routes;
use crate::lifecycle::drain::DrainController;
use crate::lifecycle::shutdown::{ShutdownController, ShutdownPhase, StopReason};
use crate::lifecycle::supervisor::TaskSupervisor;
use crate::net::{ConnIo, ConnectionGuard, ConnectionPermit, ConnectionTracker, IdleVerdict, Listener};
use crate::security::{require_system_token, Authorizer};

const WATCHDOG_PERIOD: Duration = Duration::from_secs(1);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthState>,
    pub drain: DrainController,
    pub engine: Arc<dyn InvocationEngine>,
    pub authorizer: Arc<dyn Authorizer>,
    pub heartbeat: HeartbeatKeeper,
}

/// Error type for a single connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
    /// A request was in flight but the socket was silent for too long.
    #[error("connection stalled for {0:?}")]
    Stalled(Duration),
}

#[derive(Debug, Clone, Copy)]
struct ConnectionSettings {
    headers: Duration,
    keep_alive: Duration,
    request: Duration,
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    let invocation = Router::new()
        .route("/function", post(routes::invoke_function))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_system_token,
        ));

    Router::new()
        .route("/", get(routes::root))
        .route("/healthCheck", get(routes::root))
        .route("/livez", get(routes::livez))
        .route("/readyz", get(routes::readyz))
        .route("/openConnections", get(routes::open_connections))
        .route("/stopServer", get(routes::stop_server))
        .merge(invocation)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(access_log))
}

/// The panic hook has already reported the panic with its request context.
fn panic_response(_payload: Box<dyn Any + Send + 'static>) -> Response {
    ApiError::Internal.into_response()
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    connections: ConnectionTracker,
    shutdown: ShutdownController,
    settings: ConnectionSettings,
    drain_timeout: Duration,
}

impl HttpServer {
    pub fn new(
        config: &GatewayConfig,
        state: AppState,
        connections: ConnectionTracker,
        shutdown: ShutdownController,
    ) -> Self {
        Self {
            router: build_router(state, config.listener.max_body_bytes),
            connections,
            shutdown,
            settings: ConnectionSettings {
                headers: config.timeouts.headers(),
                keep_alive: config.timeouts.keep_alive(),
                request: config.timeouts.request(),
            },
            drain_timeout: config.shutdown.drain_timeout(),
        }
    }

    /// Accept connections until a stop is requested, then drain them.
    pub async fn run(self, listener: Listener) -> StopReason {
        let mut supervisor = TaskSupervisor::<ConnectionError>::new();

        let reason = loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.connections.track();
                        tracing::debug!(peer_addr = %peer, connection_id = %guard.id(), "Serving connection");
                        supervisor.spawn(serve_connection(
                            stream,
                            peer,
                            self.router.clone(),
                            self.settings,
                            self.shutdown.clone(),
                            guard,
                            permit,
                        ));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(()) = supervisor.reap_next(), if !supervisor.is_empty() => {}
                reason = self.shutdown.stopping() => break reason,
            }
        };

        drop(listener);
        tracing::info!(
            reason = reason.as_str(),
            open_connections = supervisor.len(),
            "Listener closed; draining connections"
        );

        let aborted = supervisor.drain(self.drain_timeout).await;
        tracing::info!(aborted, "HTTP server stopped");
        reason
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    settings: ConnectionSettings,
    shutdown: ShutdownController,
    _guard: ConnectionGuard,
    _permit: ConnectionPermit,
) -> Result<(), ConnectionError> {
    let (io, interim) = ConnIo::new(stream);
    let activity = io.activity();

    let service = {
        let activity = Arc::clone(&activity);
        service_fn(move |mut request: hyper::Request<Incoming>| {
            let router = router.clone();
            let in_flight = activity.begin_request();
            request.extensions_mut().insert(interim.clone());
            async move {
                let response = router.oneshot(request).await;
                drop(in_flight);
                response
            }
        })
    };

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(settings.headers)
        .keep_alive(true)
        .serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let mut stop = shutdown.subscribe();
    let mut closing = false;
    if *stop.borrow_and_update() != ShutdownPhase::Running {
        conn.as_mut().graceful_shutdown();
        closing = true;
    }

    let mut watchdog = tokio::time::interval(WATCHDOG_PERIOD);
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = conn.as_mut() => return result.map_err(ConnectionError::from),
            changed = stop.changed(), if !closing => {
                if changed.is_err() || *stop.borrow_and_update() != ShutdownPhase::Running {
                    conn.as_mut().graceful_shutdown();
                    closing = true;
                }
            }
            _ = watchdog.tick() => match activity.verdict(settings.keep_alive, settings.request) {
                IdleVerdict::Active => {}
                IdleVerdict::KeepAliveExpired => {
                    if !closing {
                        tracing::debug!(peer_addr = %peer, "Keep-alive timeout; closing idle connection");
                        conn.as_mut().graceful_shutdown();
                        closing = true;
                    }
                }
                IdleVerdict::Stalled => {
                    let idle = activity.idle_for();
                    tracing::warn!(
                        peer_addr = %peer,
                        idle_ms = idle.as_millis() as u64,
                        "Request timeout; dropping connection"
                    );
                    return Err(ConnectionError::Stalled(idle));
                }
            },
        }
    }
}
