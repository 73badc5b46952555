//! Ownership of per-connection tasks.
//!
//! Every connection task is spawned into one [`JoinSet`] so the accept loop
//! can reap finished tasks as they complete, and shutdown can wait for the
//! rest with a deadline. Nothing is detached.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};

pub struct TaskSupervisor<E> {
    tasks: JoinSet<Result<(), E>>,
}

impl<E> TaskSupervisor<E>
where
    E: Display + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next task to finish and record its outcome.
    ///
    /// Returns `None` immediately when no task is running.
    pub async fn reap_next(&mut self) -> Option<()> {
        let result = self.tasks.join_next().await?;
        Self::record(result);
        Some(())
    }

    /// Wait for all tasks, aborting whatever is left after `deadline`.
    ///
    /// Returns the number of tasks that had to be aborted.
    pub async fn drain(&mut self, deadline: Duration) -> usize {
        let waited = tokio::time::timeout(deadline, async {
            while self.reap_next().await.is_some() {}
        })
        .await;

        if waited.is_ok() {
            return 0;
        }

        let remaining = self.tasks.len();
        tracing::warn!(
            remaining,
            deadline_secs = deadline.as_secs(),
            "Drain deadline reached; aborting connections"
        );
        self.tasks.abort_all();
        while let Some(result) = self.tasks.join_next().await {
            Self::record(result);
        }
        remaining
    }

    fn record(result: Result<Result<(), E>, JoinError>) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Connection closed with error"),
            // The panic hook has already reported it with context.
            Err(e) if e.is_panic() => tracing::error!("Connection task panicked"),
            Err(_) => {}
        }
    }
}

impl<E> Default for TaskSupervisor<E>
where
    E: Display + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
