//! Route handlers.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, FromRequestParts, Query, State},
    http::{request::Parts, HeaderMap, StatusCode, Version},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};

use crate::context::RequestContext;
use crate::engine::Invocation;
use crate::health::ProbeOutcome;
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::net::InterimWriter;
use crate::observability::metrics;

const TRACE_ID_HEADER: &str = "traceid";
const REQUEST_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Request and trace ids of a `/function` call, attached to its response
/// for the access log.
#[derive(Debug, Clone)]
pub struct InvocationTrace {
    pub request_id: String,
    pub trace_id: Option<String>,
}

/// The connection's interim response writer, present only for HTTP/1.1.
pub struct Interim(pub Option<InterimWriter>);

impl<S: Send + Sync> FromRequestParts<S> for Interim {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let writer = if parts.version == Version::HTTP_11 {
            parts.extensions.get::<InterimWriter>().cloned()
        } else {
            None
        };
        Ok(Interim(writer))
    }
}

pub async fn root() -> Json<Value> {
    Json(json!({ "success": true }))
}

pub async fn livez(State(state): State<AppState>) -> StatusCode {
    probe("livez", state.health.liveness())
}

pub async fn readyz(State(state): State<AppState>) -> StatusCode {
    probe("readyz", state.health.readiness())
}

fn probe(name: &'static str, outcome: ProbeOutcome) -> StatusCode {
    if outcome == ProbeOutcome::Terminating {
        tracing::error!(probe = name, "health check failed: server is terminating");
        metrics::record_probe_failure(name);
    }
    outcome.status_code()
}

/// Only the exact value `true` enters the terminating phase. A raw map never
/// rejects, so odd query strings still get a count back.
pub async fn open_connections(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> String {
    let terminate = query.get("terminate").map(String::as_str) == Some("true");
    state.drain.request_drain(terminate).to_string()
}

pub async fn stop_server(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.drain.request_stop()?;
    Ok("preparing to shut down.")
}

/// Hand one invocation to the engine inside its request context.
pub async fn invoke_function(
    State(state): State<AppState>,
    Interim(interim): Interim,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let mut body = match body.map_err(ApiError::from).and_then(|b| parse_body(&b)) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected invocation body");
            return e.into_response();
        }
    };

    let request_id = generate_request_id();
    let trace_id = headers
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    stamp_ids(&mut body, &request_id, trace_id.as_deref());
    let body = Value::Object(body);

    let context = Arc::new(RequestContext::from_invocation(
        &body,
        request_id.clone(),
        trace_id.clone(),
    ));
    let invocation = Invocation::from_body(body);
    let engine = Arc::clone(&state.engine);
    let heartbeat = state.heartbeat;

    let mut response = RequestContext::scope(context, async move {
        tracing::debug!("Invoking function");
        match heartbeat.keep_alive(engine.invoke(invocation), &interim).await {
            Ok(result) => (StatusCode::OK, Json(result)).into_response(),
            Err(e) => {
                tracing::info!(status_code = e.status_code, "Function invocation failed");
                ApiError::Invocation(e).into_response()
            }
        }
    })
    .await;

    response.extensions_mut().insert(InvocationTrace {
        request_id,
        trace_id,
    });
    response
}

/// Overwrite the ids the engine sees. `traceId` only ever comes from the
/// header; a client-supplied one is dropped.
fn stamp_ids(body: &mut Map<String, Value>, request_id: &str, trace_id: Option<&str>) {
    body.insert("_reqId".into(), Value::String(request_id.to_owned()));
    match trace_id {
        Some(trace_id) => body.insert("traceId".into(), Value::String(trace_id.to_owned())),
        None => body.remove("traceId"),
    };
}

/// An empty body is an empty object.
fn parse_body(bytes: &[u8]) -> Result<Map<String, Value>, ApiError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::InvalidBody("expected a JSON object".into())),
        Err(e) => Err(ApiError::InvalidBody(e.to_string())),
    }
}

/// Epoch milliseconds followed by four characters of `[0-9a-z]`.
fn generate_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: String = (0..4)
        .map(|_| REQUEST_ID_ALPHABET[fastrand::usize(..REQUEST_ID_ALPHABET.len())] as char)
        .collect();
    format!("{millis}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_have_expected_shape() {
        let id = generate_request_id();
        let (millis, suffix) = id.split_at(id.len() - 4);
        assert!(millis.parse::<u128>().unwrap() > 1_600_000_000_000);
        assert!(suffix
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
    }

    #[test]
    fn body_parsing() {
        assert_eq!(parse_body(b"").unwrap(), Map::new());
        assert_eq!(parse_body(b"  \n").unwrap(), Map::new());
        assert_eq!(parse_body(br#"{"a":1}"#).unwrap()["a"], 1);
        assert!(matches!(parse_body(b"[1]"), Err(ApiError::InvalidBody(_))));
        assert!(matches!(parse_body(b"{nope"), Err(ApiError::InvalidBody(_))));
    }

    #[test]
    fn ids_come_from_the_gateway_only() {
        let mut body = parse_body(br#"{"traceId":"client","_reqId":"client","a":1}"#).unwrap();
        stamp_ids(&mut body, "r1", None);
        assert_eq!(body.get("traceId"), None);
        assert_eq!(body["_reqId"], "r1");
        assert_eq!(body["a"], 1);

        stamp_ids(&mut body, "r2", Some("t1"));
        assert_eq!(body["traceId"], "t1");
        assert_eq!(body["_reqId"], "r2");
    }

    #[test]
    fn only_terminating_probes_count_as_failures() {
        assert_eq!(probe("livez", ProbeOutcome::Pass), StatusCode::OK);
        assert_eq!(probe("livez", ProbeOutcome::Fail), StatusCode::BAD_REQUEST);
        assert_eq!(
            probe("readyz", ProbeOutcome::Terminating),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
