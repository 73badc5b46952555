//! Per-request context propagation.
//!
//! A [`RequestContext`] carries the identity and trace fields of one inbound
//! invocation. It is installed in task-local storage for the lifetime of the
//! request's future, so log formatting and fatal error reporting can
//! attribute anything that happens inside the engine call back to the request
//! that caused it, without threading the value through every signature.
//!
//! # Design Decisions
//! - `tokio::task_local!` rather than `thread_local!`: the multi-threaded
//!   scheduler moves tasks between threads at await points
//! - Scopes nest; leaving an inner scope restores the outer one
//! - Task locals do not cross `tokio::spawn`, so [`spawn`] captures the
//!   current context and re-installs it in the new task

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

tokio::task_local! {
    static CURRENT_CONTEXT: Arc<RequestContext>;
}

/// Identity and trace fields of one invocation. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub integration_id: Option<String>,
    pub flow_id: Option<String>,
    pub export_id: Option<String>,
    pub import_id: Option<String>,
    pub connection_id: Option<String>,
    pub connector_id: Option<String>,
    pub invocation_type: Option<String>,
    pub function: Option<String>,
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
}

impl RequestContext {
    /// Derive the context for a `/function` body.
    ///
    /// Identity fields come from `body.options`; the connection id falls back
    /// from `options.connection._id` to `options._connectionId` to
    /// `body.connectionId`.
    pub fn from_invocation(body: &Value, request_id: String, trace_id: Option<String>) -> Self {
        let options = body.get("options");
        let option = |key: &str| options.and_then(|o| o.get(key)).and_then(scalar);

        let connection_id = options
            .and_then(|o| o.get("connection"))
            .and_then(|c| c.get("_id"))
            .and_then(scalar)
            .or_else(|| option("_connectionId"))
            .or_else(|| body.get("connectionId").and_then(scalar));

        Self {
            integration_id: option("_integrationId"),
            flow_id: option("_flowId"),
            export_id: option("_exportId"),
            import_id: option("_importId"),
            connection_id,
            connector_id: body.get("_connectorId").and_then(scalar),
            invocation_type: body.get("type").and_then(scalar),
            function: body.get("function").and_then(scalar),
            request_id: Some(request_id),
            trace_id,
        }
    }

    /// Present fields as `(wire name, value)` pairs, in a stable order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("_integrationId", &self.integration_id),
            ("_flowId", &self.flow_id),
            ("_exportId", &self.export_id),
            ("_importId", &self.import_id),
            ("_connectionId", &self.connection_id),
            ("_connectorId", &self.connector_id),
            ("type", &self.invocation_type),
            ("function", &self.function),
            ("_reqId", &self.request_id),
            ("traceId", &self.trace_id),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
    }

    /// The context of the request currently being served, if any.
    pub fn current() -> Option<Arc<RequestContext>> {
        CURRENT_CONTEXT.try_with(Arc::clone).ok()
    }

    /// Run `work` with `context` installed as the current context.
    pub async fn scope<F>(context: Arc<RequestContext>, work: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_CONTEXT.scope(context, work).await
    }

    /// Synchronous counterpart of [`RequestContext::scope`].
    pub fn sync_scope<F, R>(context: Arc<RequestContext>, work: F) -> R
    where
        F: FnOnce() -> R,
    {
        CURRENT_CONTEXT.sync_scope(context, work)
    }
}

/// Spawn `future` on the runtime, carrying over the caller's context.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match RequestContext::current() {
        Some(context) => tokio::spawn(CURRENT_CONTEXT.scope(context, future)),
        None => tokio::spawn(future),
    }
}

/// Strings pass through; numbers and booleans are rendered; anything else is dropped.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn context(integration: &str) -> Arc<RequestContext> {
        Arc::new(RequestContext {
            integration_id: Some(integration.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn derives_fields_from_body() {
        let body = json!({
            "options": {
                "_integrationId": "i1",
                "_flowId": "f1",
                "_exportId": "e1",
                "_importId": 7,
                "connection": { "_id": "c-from-connection" },
                "_connectionId": "c-from-options"
            },
            "connectionId": "c-from-body",
            "_connectorId": "k1",
            "type": "hook",
            "function": "preSavePage"
        });

        let ctx = RequestContext::from_invocation(&body, "123abcd".into(), Some("t1".into()));
        assert_eq!(ctx.integration_id.as_deref(), Some("i1"));
        assert_eq!(ctx.import_id.as_deref(), Some("7"));
        assert_eq!(ctx.connection_id.as_deref(), Some("c-from-connection"));
        assert_eq!(ctx.connector_id.as_deref(), Some("k1"));
        assert_eq!(ctx.invocation_type.as_deref(), Some("hook"));
        assert_eq!(ctx.function.as_deref(), Some("preSavePage"));
        assert_eq!(ctx.request_id.as_deref(), Some("123abcd"));
        assert_eq!(ctx.trace_id.as_deref(), Some("t1"));
    }

    #[test]
    fn connection_id_falls_back() {
        let body = json!({ "options": { "_connectionId": "c2" }, "connectionId": "c3" });
        let ctx = RequestContext::from_invocation(&body, "r".into(), None);
        assert_eq!(ctx.connection_id.as_deref(), Some("c2"));

        let body = json!({ "connectionId": "c3" });
        let ctx = RequestContext::from_invocation(&body, "r".into(), None);
        assert_eq!(ctx.connection_id.as_deref(), Some("c3"));
        assert_eq!(ctx.integration_id, None);
    }

    #[test]
    fn fields_skip_absent_values() {
        let ctx = RequestContext {
            integration_id: Some("i1".into()),
            trace_id: Some("t1".into()),
            ..Default::default()
        };
        let fields: Vec<_> = ctx.fields().collect();
        assert_eq!(fields, vec![("_integrationId", "i1"), ("traceId", "t1")]);
    }

    #[tokio::test]
    async fn no_context_outside_scope() {
        assert!(RequestContext::current().is_none());
        RequestContext::scope(context("i1"), async {}).await;
        assert!(RequestContext::current().is_none());
    }

    #[tokio::test]
    async fn visible_across_await_points() {
        let seen = RequestContext::scope(context("i1"), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            tokio::task::yield_now().await;
            RequestContext::current()
        })
        .await;
        assert_eq!(seen.unwrap().integration_id.as_deref(), Some("i1"));
    }

    #[tokio::test]
    async fn concurrent_scopes_do_not_leak() {
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let id = format!("i{i}");
                tokio::spawn(RequestContext::scope(context(&id), async move {
                    for step in 0..4u64 {
                        tokio::time::sleep(Duration::from_millis((i * 7 + step * 3) % 11)).await;
                        let seen = RequestContext::current().unwrap();
                        assert_eq!(seen.integration_id.as_deref(), Some(id.as_str()));
                    }
                }))
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn nested_scope_restores_outer() {
        RequestContext::scope(context("outer"), async {
            RequestContext::scope(context("inner"), async {
                let seen = RequestContext::current().unwrap();
                assert_eq!(seen.integration_id.as_deref(), Some("inner"));
            })
            .await;
            let seen = RequestContext::current().unwrap();
            assert_eq!(seen.integration_id.as_deref(), Some("outer"));
        })
        .await;
    }

    #[tokio::test]
    async fn spawned_work_inherits_context() {
        let handle = RequestContext::scope(context("i9"), async {
            spawn(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                RequestContext::current()
            })
        })
        .await;

        let seen = handle.await.unwrap();
        assert_eq!(seen.unwrap().integration_id.as_deref(), Some("i9"));
    }

    #[test]
    fn sync_scope_is_visible() {
        let seen = RequestContext::sync_scope(context("s1"), RequestContext::current);
        assert_eq!(seen.unwrap().integration_id.as_deref(), Some("s1"));
        assert!(RequestContext::current().is_none());
    }
}
