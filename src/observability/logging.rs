//! Structured logging.
//!
//! Events are rendered as single lines:
//!
//! ```text
//! 2026-10-17T09:12:03.123456Z: level=info, request finished, method=POST, url=/function, _integrationId=i1, _reqId=1760692323123ab3x
//! ```
//!
//! When an event is emitted inside a [`RequestContext`] scope, every present
//! context field is appended, so engine-side log lines are attributable to the
//! invocation that produced them.

use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::context::RequestContext;

/// Target of fatal error records. They carry their own context fields.
pub const FATAL_TARGET: &str = "function_gateway::fatal";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", config.log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().event_format(KeyValueFormat::default()))
        .init();
}

/// `timestamp: level=..., message, key=value, ...` event format.
#[derive(Debug, Clone, Default)]
pub struct KeyValueFormat {
    timer: SystemTime,
}

impl<S, N> FormatEvent<S, N> for KeyValueFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        self.timer.format_time(&mut writer)?;
        write!(writer, ": level={}", level_name(metadata.level()))?;

        let mut visitor = KeyValueVisitor::default();
        event.record(&mut visitor);
        if let Some(message) = &visitor.message {
            write!(writer, ", {message}")?;
        }
        writer.write_str(&visitor.fields)?;

        if metadata.target() != FATAL_TARGET {
            if let Some(context) = RequestContext::current() {
                for (name, value) in context.fields() {
                    write!(writer, ", {name}={value}")?;
                }
            }
        }

        writeln!(writer)
    }
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

#[derive(Default)]
struct KeyValueVisitor {
    message: Option<String>,
    fields: String,
}

impl KeyValueVisitor {
    fn push(&mut self, field: &Field, value: fmt::Arguments<'_>) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            // Writing to a String cannot fail.
            let _ = write!(self.fields, ", {}={}", field.name(), value);
        }
    }
}

impl Visit for KeyValueVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, format_args!("{value}"));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format_args!("{value:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let sink = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .event_format(KeyValueFormat::default())
            .with_writer(sink.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = sink.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn renders_message_then_fields() {
        let out = capture(|| {
            tracing::info!(open_connections = 3, url = %"/stopServer", "open connections");
        });
        assert!(
            out.contains(": level=info, open connections, open_connections=3, url=/stopServer\n"),
            "{out}"
        );
    }

    #[test]
    fn appends_active_context_fields() {
        let context = Arc::new(RequestContext {
            integration_id: Some("i1".into()),
            request_id: Some("r1".into()),
            trace_id: Some("t1".into()),
            ..Default::default()
        });

        let out = capture(|| {
            RequestContext::sync_scope(context, || tracing::error!("engine callback failed"));
        });
        assert!(
            out.contains("level=error, engine callback failed, _integrationId=i1, _reqId=r1, traceId=t1"),
            "{out}"
        );
    }

    #[test]
    fn no_context_fields_outside_a_scope() {
        let out = capture(|| tracing::info!("server listening"));
        assert!(out.trim_end().ends_with("level=info, server listening"), "{out}");
    }

    #[test]
    fn fatal_records_are_not_enriched_twice() {
        let context = Arc::new(RequestContext {
            integration_id: Some("i1".into()),
            ..Default::default()
        });

        let out = capture(|| {
            RequestContext::sync_scope(context, || {
                tracing::error!(target: FATAL_TARGET, "fatal error, _integrationId=i1");
            });
        });
        assert_eq!(out.matches("_integrationId=i1").count(), 1, "{out}");
    }
}
