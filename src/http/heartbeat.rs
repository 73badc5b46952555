//! Keep-alive signalling for long invocations.
//!
//! Load balancers in front of the gateway drop connections that stay silent
//! for too long. When an invocation outlives the configured threshold, one
//! `102 Processing` interim response is written on the client connection.

use std::future::Future;
use std::io;
use std::time::Duration;

use crate::net::InterimWriter;
use crate::observability::metrics;

/// Something that can tell the client the request is still being processed.
pub trait ProcessingSignal: Send + Sync {
    fn send_processing(&self) -> impl Future<Output = io::Result<()>> + Send;
}

impl ProcessingSignal for InterimWriter {
    fn send_processing(&self) -> impl Future<Output = io::Result<()>> + Send {
        self.write_all(InterimWriter::PROCESSING)
    }
}

/// `None` for requests that cannot carry interim responses.
impl<T: ProcessingSignal> ProcessingSignal for Option<T> {
    fn send_processing(&self) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            match self {
                Some(signal) => signal.send_processing().await,
                None => Ok(()),
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatKeeper {
    threshold: Duration,
}

impl HeartbeatKeeper {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Drive `work` to completion, signalling once if it runs past the threshold.
    ///
    /// The signal is only started while `work` is pending and is always
    /// finished before this returns, so it can never follow the final response.
    pub async fn keep_alive<F, S>(&self, work: F, signal: &S) -> F::Output
    where
        F: Future,
        S: ProcessingSignal,
    {
        tokio::pin!(work);

        tokio::select! {
            biased;
            output = &mut work => return output,
            _ = tokio::time::sleep(self.threshold) => {}
        }

        let heartbeat = async {
            match signal.send_processing().await {
                Ok(()) => {
                    metrics::record_heartbeat();
                    tracing::debug!(
                        threshold_ms = self.threshold.as_millis() as u64,
                        "Sent 102 Processing"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "Failed to send 102 Processing"),
            }
        };

        let ((), output) = tokio::join!(heartbeat, work);
        output
    }
}
