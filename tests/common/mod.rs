//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::{const_mutex, Mutex, MutexGuard};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use function_gateway::config::GatewayConfig;
use function_gateway::engine::{Invocation, InvocationEngine, InvocationError};
use function_gateway::security::SystemTokenAuth;
use function_gateway::{start_server, Collaborators, RequestContext, ServerHandle};

pub const TOKEN: &str = "test-system-token";

/// Only one server may run per process, so tests that start one take turns.
static SERIAL: Mutex<()> = const_mutex(());

pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

/// Gateway config bound to an ephemeral localhost port.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.auth.system_token = TOKEN.into();
    config.shutdown.drain_timeout_secs = 2;
    config
}

type Respond = dyn Fn(&Invocation) -> Result<Value, InvocationError> + Send + Sync;

/// Engine double that records what it was asked to run and in which context.
#[derive(Clone)]
pub struct MockEngine {
    inner: Arc<MockInner>,
}

struct MockInner {
    delay: Duration,
    respond: Box<Respond>,
    calls: AtomicUsize,
    invocations: Mutex<Vec<Invocation>>,
    contexts: Mutex<Vec<Option<Arc<RequestContext>>>>,
}

impl MockEngine {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&Invocation) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        Self::delayed(Duration::ZERO, respond)
    }

    pub fn delayed<F>(delay: Duration, respond: F) -> Self
    where
        F: Fn(&Invocation) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(MockInner {
                delay,
                respond: Box::new(respond),
                calls: AtomicUsize::new(0),
                invocations: Mutex::new(Vec::new()),
                contexts: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.inner.invocations.lock().clone()
    }

    /// The context observed by each invocation after its delay.
    pub fn contexts(&self) -> Vec<Option<Arc<RequestContext>>> {
        self.inner.contexts.lock().clone()
    }
}

impl InvocationEngine for MockEngine {
    fn invoke(&self, invocation: Invocation) -> BoxFuture<'static, Result<Value, InvocationError>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            inner.calls.fetch_add(1, Ordering::SeqCst);
            inner.invocations.lock().push(invocation.clone());
            tokio::time::sleep(inner.delay).await;
            inner.contexts.lock().push(RequestContext::current());
            (inner.respond)(&invocation)
        })
    }
}

pub async fn start(config: &GatewayConfig, engine: MockEngine) -> ServerHandle {
    start_server(
        config,
        Collaborators {
            engine: Arc::new(engine),
            authorizer: Arc::new(SystemTokenAuth::new(TOKEN)),
        },
    )
    .await
    .unwrap()
}

pub fn url(handle: &ServerHandle, path: &str) -> String {
    format!("http://{}{}", handle.local_addr(), path)
}

/// Send raw bytes on a fresh connection and read until the server closes it.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// `GET path` on its own connection. Returns the status code and body.
pub async fn get(addr: SocketAddr, path: &str) -> (u16, String) {
    let request = format!("GET {path} HTTP/1.1\r\nHost: gateway\r\nConnection: close\r\n\r\n");
    let response = raw_exchange(addr, request.as_bytes()).await;
    let status = response
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

/// Wait until the server counts exactly `expected` open connections.
pub async fn wait_for_connections(handle: &ServerHandle, expected: usize) {
    for _ in 0..500 {
        if handle.open_connections() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} open connections, found {}",
        handle.open_connections()
    );
}
