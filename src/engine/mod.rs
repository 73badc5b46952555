//! Invocation engine boundary.
//!
//! The gateway never executes functions itself. It hands each
//! [`Invocation`] to an [`InvocationEngine`] and relays the outcome verbatim:
//! a result value becomes a 200 JSON body, an [`InvocationError`] becomes its
//! own status code and `errors` array. Nothing here retries.

pub mod http;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};

pub use self::http::HttpEngine;

/// One unit of work for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Addressing for the integration/flow/export/import/connection to run.
    pub options: Option<Value>,
    /// The request body, including `_reqId` and `traceId`.
    pub body: Value,
}

impl Invocation {
    pub fn from_body(body: Value) -> Self {
        Self {
            options: body.get("options").cloned(),
            body,
        }
    }
}

/// A structured failure reported by the engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invocation failed with status {status_code}")]
pub struct InvocationError {
    pub status_code: u16,
    /// Error descriptors, passed through to the caller untouched.
    pub errors: Vec<Value>,
}

impl InvocationError {
    pub fn new(status_code: u16, errors: Vec<Value>) -> Self {
        Self {
            status_code,
            errors,
        }
    }

    /// An error with a single `{code, message}` descriptor.
    pub fn single(status_code: u16, code: &str, message: impl Into<String>) -> Self {
        Self::new(
            status_code,
            vec![json!({ "code": code, "message": message.into() })],
        )
    }
}

/// Executes invocations. Implementations own any retry policy.
pub trait InvocationEngine: Send + Sync + 'static {
    fn invoke(&self, invocation: Invocation) -> BoxFuture<'static, Result<Value, InvocationError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_are_taken_from_the_body() {
        let invocation = Invocation::from_body(json!({
            "options": { "_integrationId": "i1" },
            "function": "f"
        }));
        assert_eq!(invocation.options, Some(json!({ "_integrationId": "i1" })));
        assert_eq!(invocation.body["function"], "f");

        let invocation = Invocation::from_body(json!({ "function": "f" }));
        assert_eq!(invocation.options, None);
    }

    #[test]
    fn single_descriptor_error() {
        let err = InvocationError::single(422, "bad_input", "nope");
        assert_eq!(err.errors, vec![json!({ "code": "bad_input", "message": "nope" })]);
        assert_eq!(err.to_string(), "invocation failed with status 422");
    }
}
