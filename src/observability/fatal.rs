//! Fatal error reporting.
//!
//! Two failure classes reach this module: panics (through a process-wide
//! panic hook) and failures of detached tasks nobody awaits (through
//! [`FatalErrorReporter::spawn_observed`]). Both are logged as one record that
//! names the failure and carries every field of the request context that was
//! active when it happened.
//!
//! Whether the process keeps running afterwards is decided by
//! [`FatalErrorPolicy`], not by the reporter's caller.

use std::any::{type_name, Any};
use std::fmt::{self, Display, Write as _};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use parking_lot::{const_rwlock, RwLock};
use tokio::task::JoinHandle;

use crate::config::FatalErrorPolicy;
use crate::context::{self, RequestContext};
use crate::lifecycle::shutdown::{ShutdownController, StopReason};
use crate::observability::logging::FATAL_TARGET;
use crate::observability::metrics;

static PANIC_REPORTER: RwLock<Option<FatalErrorReporter>> = const_rwlock(None);
static PANIC_HOOK: Once = Once::new();

/// Where a fatal error was caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// A panic that escaped all handling.
    Panic,
    /// A detached task returned an error nobody observed.
    UnobservedError,
}

impl FailureOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureOrigin::Panic => "panic",
            FailureOrigin::UnobservedError => "unobserved_error",
        }
    }
}

/// Outcome of applying the fatal error policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalVerdict {
    KeepRunning,
    Exit,
}

#[derive(Debug, Clone)]
pub struct FatalErrorReporter {
    policy: FatalErrorPolicy,
    shutdown: Option<ShutdownController>,
}

impl FatalErrorReporter {
    pub fn new(policy: FatalErrorPolicy) -> Self {
        Self {
            policy,
            shutdown: None,
        }
    }

    /// Stop this server when the policy says to exit.
    pub fn with_shutdown(mut self, shutdown: ShutdownController) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Log a fatal error with the current request context, then apply the policy.
    pub fn report(&self, origin: FailureOrigin, name: &str, message: &str) -> FatalVerdict {
        let context = RequestContext::current();
        match format_record(origin, name, message, context.as_deref()) {
            Ok(record) => tracing::error!(target: FATAL_TARGET, "fatal error, {record}"),
            Err(e) => tracing::error!(
                target: FATAL_TARGET,
                origin = origin.as_str(),
                error = %e,
                "fatal error logging failed"
            ),
        }
        metrics::record_fatal_error(origin.as_str());

        match self.policy {
            FatalErrorPolicy::KeepRunning => FatalVerdict::KeepRunning,
            FatalErrorPolicy::Exit => {
                if let Some(shutdown) = &self.shutdown {
                    shutdown.request_stop(StopReason::Fatal);
                }
                FatalVerdict::Exit
            }
        }
    }

    /// Spawn a detached task in the caller's context, reporting an `Err` result.
    pub fn spawn_observed<F, T, E>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let reporter = self.clone();
        context::spawn(async move {
            if let Err(e) = future.await {
                match panic::catch_unwind(AssertUnwindSafe(|| e.to_string())) {
                    Ok(message) => {
                        reporter.report(FailureOrigin::UnobservedError, type_name::<E>(), &message);
                    }
                    Err(_) => tracing::error!(
                        target: FATAL_TARGET,
                        origin = FailureOrigin::UnobservedError.as_str(),
                        "fatal error logging failed"
                    ),
                }
            }
        })
    }
}

/// Route panics through `reporter`.
///
/// The hook is installed once per process and chains to the previous hook;
/// later calls only replace the reporter it uses.
pub fn install_panic_hook(reporter: FatalErrorReporter) {
    *PANIC_REPORTER.write() = Some(reporter);

    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let reporter = PANIC_REPORTER.read().clone();
            if let Some(reporter) = reporter {
                let mut message = panic_message(info.payload()).to_string();
                if let Some(location) = info.location() {
                    message = format!("{message} at {}:{}", location.file(), location.line());
                }
                reporter.report(FailureOrigin::Panic, "panic", &message);
            }
            previous(info);
        }));
    });
}

/// Stop routing panics to the server's reporter. The chained hook stays.
pub fn clear_panic_reporter() {
    *PANIC_REPORTER.write() = None;
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "Box<dyn Any>"
    }
}

fn format_record(
    origin: FailureOrigin,
    name: &str,
    message: &str,
    context: Option<&RequestContext>,
) -> Result<String, fmt::Error> {
    let mut record = String::new();
    write!(
        record,
        "origin={}, name={name}, message={message}",
        origin.as_str()
    )?;
    if let Some(context) = context {
        for (field, value) in context.fields() {
            write!(record, ", {field}={value}")?;
        }
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::shutdown::ShutdownPhase;
    use std::sync::Arc;

    #[test]
    fn record_includes_present_context_fields() {
        let context = RequestContext {
            integration_id: Some("i1".into()),
            function: Some("preSave".into()),
            request_id: Some("r1".into()),
            ..Default::default()
        };
        let record = format_record(FailureOrigin::Panic, "panic", "boom", Some(&context)).unwrap();
        assert_eq!(
            record,
            "origin=panic, name=panic, message=boom, _integrationId=i1, function=preSave, _reqId=r1"
        );
    }

    #[test]
    fn record_without_context() {
        let record = format_record(FailureOrigin::UnobservedError, "io::Error", "reset", None).unwrap();
        assert_eq!(record, "origin=unobserved_error, name=io::Error, message=reset");
    }

    #[test]
    fn panic_payloads_are_described() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "Box<dyn Any>");
    }

    #[test]
    fn keep_running_policy_leaves_server_alone() {
        let shutdown = ShutdownController::new();
        let reporter =
            FatalErrorReporter::new(FatalErrorPolicy::KeepRunning).with_shutdown(shutdown.clone());
        let verdict = reporter.report(FailureOrigin::Panic, "panic", "boom");
        assert_eq!(verdict, FatalVerdict::KeepRunning);
        assert_eq!(shutdown.phase(), ShutdownPhase::Running);
    }

    #[test]
    fn exit_policy_stops_the_server() {
        let shutdown = ShutdownController::new();
        let reporter = FatalErrorReporter::new(FatalErrorPolicy::Exit).with_shutdown(shutdown.clone());
        let verdict = reporter.report(FailureOrigin::UnobservedError, "E", "boom");
        assert_eq!(verdict, FatalVerdict::Exit);
        assert_eq!(shutdown.phase(), ShutdownPhase::Stopping(StopReason::Fatal));
    }

    #[test]
    fn panics_reach_the_installed_reporter_until_cleared() {
        let shutdown = ShutdownController::new();
        install_panic_hook(
            FatalErrorReporter::new(FatalErrorPolicy::Exit).with_shutdown(shutdown.clone()),
        );
        assert!(PANIC_REPORTER.read().is_some());

        let caught = panic::catch_unwind(|| panic!("handler bug"));
        assert!(caught.is_err());
        assert_eq!(shutdown.phase(), ShutdownPhase::Stopping(StopReason::Fatal));

        clear_panic_reporter();
        assert!(PANIC_REPORTER.read().is_none());
    }

    #[tokio::test]
    async fn unobserved_errors_are_reported_in_context() {
        let shutdown = ShutdownController::new();
        let reporter = FatalErrorReporter::new(FatalErrorPolicy::Exit).with_shutdown(shutdown.clone());
        let context = Arc::new(RequestContext {
            integration_id: Some("i1".into()),
            ..Default::default()
        });

        let handle = RequestContext::scope(context, async {
            reporter.spawn_observed(async { Err::<(), _>("engine callback rejected") })
        })
        .await;
        handle.await.unwrap();

        assert_eq!(shutdown.phase(), ShutdownPhase::Stopping(StopReason::Fatal));
    }

    #[tokio::test]
    async fn successful_detached_work_is_not_reported() {
        let shutdown = ShutdownController::new();
        let reporter = FatalErrorReporter::new(FatalErrorPolicy::Exit).with_shutdown(shutdown.clone());
        reporter
            .spawn_observed(async { Ok::<_, String>(()) })
            .await
            .unwrap();
        assert_eq!(shutdown.phase(), ShutdownPhase::Running);
    }
}
