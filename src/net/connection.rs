//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Count open connections for drain and stop decisions
//! - Generate unique connection IDs for tracing
//! - Record socket activity so idle and stalled connections can be closed
//! - Give handlers a way to write interim (1xx) responses on their connection

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::future::poll_fn;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks open connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    open: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_open_connections(open);
        ConnectionGuard {
            open: Arc::clone(&self.open),
            id: ConnectionId::new(),
        }
    }

    /// Current number of open connections, the caller's included.
    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Open connections other than the one the caller is using.
    ///
    /// The caller is always served over a tracked connection, so a raw count
    /// of zero means the tracker is out of step with the accept loop. That is
    /// logged and reported as zero so the caller still gets an answer.
    pub fn open_excluding_caller(&self) -> usize {
        match self.open_count().checked_sub(1) {
            Some(others) => others,
            None => {
                tracing::error!("Open connection count excludes the caller's own connection");
                0
            }
        }
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements the open count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    open: Arc<AtomicUsize>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let open = self.open.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_open_connections(open);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// What the connection watchdog should do after inspecting [`Activity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    /// Traffic is flowing or timers have not expired.
    Active,
    /// No request in flight and idle past the keep-alive timeout.
    KeepAliveExpired,
    /// A request is in flight but the socket has been silent past the request timeout.
    Stalled,
}

/// Socket activity shared between a connection's IO, its service and its watchdog.
#[derive(Debug)]
pub struct Activity {
    started: Instant,
    /// Milliseconds since `started` at the last read or write.
    last_io_ms: AtomicU64,
    in_flight: AtomicUsize,
}

impl Activity {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            last_io_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        })
    }

    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_io_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the socket last moved bytes.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_io_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Mark a request as in flight until the returned guard is dropped.
    pub fn begin_request(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            activity: Arc::clone(self),
        }
    }

    pub fn verdict(&self, keep_alive: Duration, request_timeout: Duration) -> IdleVerdict {
        let idle = self.idle_for();
        if self.in_flight() == 0 {
            if idle >= keep_alive {
                IdleVerdict::KeepAliveExpired
            } else {
                IdleVerdict::Active
            }
        } else if idle >= request_timeout {
            IdleVerdict::Stalled
        } else {
            IdleVerdict::Active
        }
    }
}

/// An in-flight request on a connection.
#[derive(Debug)]
pub struct InFlight {
    activity: Arc<Activity>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.activity.touch();
        self.activity.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A TCP stream split so interim responses can be written alongside hyper.
///
/// Reads and writes record activity. The write half sits behind a mutex that
/// is only held for the duration of a single poll.
pub struct ConnIo {
    read: OwnedReadHalf,
    write: Arc<Mutex<OwnedWriteHalf>>,
    activity: Arc<Activity>,
}

impl ConnIo {
    /// Wrap an accepted stream, returning the IO for hyper and a writer for interim responses.
    pub fn new(stream: TcpStream) -> (Self, InterimWriter) {
        let (read, write) = stream.into_split();
        let write = Arc::new(Mutex::new(write));
        let activity = Activity::new();
        let interim = InterimWriter {
            write: Arc::clone(&write),
            activity: Arc::clone(&activity),
        };
        (
            Self {
                read,
                write,
                activity,
            },
            interim,
        )
    }

    pub fn activity(&self) -> Arc<Activity> {
        Arc::clone(&self.activity)
    }
}

impl AsyncRead for ConnIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.read).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.activity.touch();
        }
        poll
    }
}

impl AsyncWrite for ConnIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut *self.write.lock()).poll_write(cx, buf);
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
            self.activity.touch();
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.write.lock()).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.write.lock()).poll_shutdown(cx)
    }
}

/// Writes interim responses directly onto a connection.
///
/// Only safe to use while the connection's current request is still being
/// handled: hyper writes nothing for that request until the handler returns.
#[derive(Clone)]
pub struct InterimWriter {
    write: Arc<Mutex<OwnedWriteHalf>>,
    activity: Arc<Activity>,
}

impl InterimWriter {
    pub const PROCESSING: &'static [u8] = b"HTTP/1.1 102 Processing\r\n\r\n";

    /// Write `bytes` fully and flush.
    pub async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            let n = poll_fn(|cx| Pin::new(&mut *self.write.lock()).poll_write(cx, &bytes[written..]))
                .await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            written += n;
        }
        poll_fn(|cx| Pin::new(&mut *self.write.lock()).poll_flush(cx)).await?;
        self.activity.touch();
        Ok(())
    }
}

impl std::fmt::Debug for InterimWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterimWriter").finish_non_exhaustive()
    }
}
