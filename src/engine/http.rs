//! Engine client that forwards invocations over HTTP.

use futures_util::future::BoxFuture;
use serde_json::Value;
use url::Url;

use crate::config::EngineConfig;
use crate::engine::{Invocation, InvocationEngine, InvocationError};

/// Error type for building an [`HttpEngine`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid engine endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("failed to build engine client: {0}")]
    Client(#[from] reqwest::Error),
}

/// POSTs each invocation body to a remote execution engine.
///
/// A 2xx response body is the result. Any other status becomes an
/// [`InvocationError`] carrying the upstream status and its `errors` array.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let endpoint = Url::parse(&config.endpoint)?;
        // No client-side timeout: invocations may legitimately run for minutes.
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl InvocationEngine for HttpEngine {
    fn invoke(&self, invocation: Invocation) -> BoxFuture<'static, Result<Value, InvocationError>> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();

        Box::pin(async move {
            let response = client
                .post(endpoint)
                .json(&invocation.body)
                .send()
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Engine unreachable");
                    InvocationError::single(502, "engine_unreachable", e.to_string())
                })?;

            let status = response.status();
            let bytes = response.bytes().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to read engine response");
                InvocationError::single(502, "engine_invalid_response", e.to_string())
            })?;

            let payload = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).map_err(|e| {
                    tracing::error!(error = %e, status = %status, "Engine returned invalid JSON");
                    InvocationError::single(502, "engine_invalid_response", e.to_string())
                })?
            };

            if status.is_success() {
                Ok(payload)
            } else {
                Err(error_from_payload(status.as_u16(), payload))
            }
        })
    }
}

fn error_from_payload(status_code: u16, payload: Value) -> InvocationError {
    match payload {
        Value::Object(mut body) => match body.remove("errors") {
            Some(Value::Array(errors)) => InvocationError::new(status_code, errors),
            _ => InvocationError::single(status_code, "engine_error", Value::Object(body).to_string()),
        },
        Value::String(message) => InvocationError::single(status_code, "engine_error", message),
        other => InvocationError::single(status_code, "engine_error", other.to_string()),
    }
}
