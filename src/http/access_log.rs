//! One `request finished` line per request.
//!
//! Probe traffic is frequent and uninteresting, so `/livez` and `/readyz`
//! are not logged.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};

use crate::http::routes::InvocationTrace;
use crate::observability::metrics;

const QUIET_PATHS: [&str; 2] = ["/livez", "/readyz"];

pub async fn access_log(request: Request, next: Next) -> Response {
    if QUIET_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();
    let url = request.uri().clone();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let response_time_ms = start.elapsed().as_millis() as u64;
    match response.extensions().get::<InvocationTrace>() {
        Some(trace) => tracing::info!(
            method = %method,
            url = %url,
            status_code = status,
            response_time_ms,
            "_reqId" = %trace.request_id,
            "traceId" = trace.trace_id.as_deref().unwrap_or("-"),
            "request finished"
        ),
        None => tracing::info!(
            method = %method,
            url = %url,
            status_code = status,
            response_time_ms,
            "request finished"
        ),
    }
    metrics::record_request(method.as_str(), status, start);

    response
}
