//! Error responses.
//!
//! Every error the gateway produces itself is rendered as
//! `{"errors":[{"code":"...","message":"..."}]}`. Engine errors keep their
//! own status code and `errors` array.

use axum::{
    extract::rejection::BytesRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::engine::InvocationError;
use crate::lifecycle::drain::DrainError;

const INVALID_SYSTEM_TOKEN: &str = "invalid system token";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDescriptor {
    pub code: &'static str,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid system token")]
    Unauthorized,
    #[error("invalid JSON body: {0}")]
    InvalidBody(String),
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
    #[error(transparent)]
    Drain(#[from] DrainError),
    #[error(transparent)]
    Invocation(#[from] InvocationError),
    #[error("internal server error")]
    Internal,
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl ApiError {
    fn descriptor(&self) -> (StatusCode, ErrorDescriptor) {
        let message = self.to_string();
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorDescriptor::new("invalid_system_token", message),
            ),
            ApiError::InvalidBody(_) => (
                StatusCode::BAD_REQUEST,
                ErrorDescriptor::new("invalid_json", message),
            ),
            ApiError::Rejected { status, .. } if *status == StatusCode::PAYLOAD_TOO_LARGE => {
                (*status, ErrorDescriptor::new("payload_too_large", message))
            }
            ApiError::Rejected { status, .. } => {
                (*status, ErrorDescriptor::new("invalid_body", message))
            }
            ApiError::Drain(DrainError::ConnectionsStillOpen(_)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDescriptor::new("connections_still_open", message),
            ),
            ApiError::Invocation(_) | ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDescriptor::new("internal_error", "Internal server error."),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Invocation(error) = self {
            let status = StatusCode::from_u16(error.status_code).unwrap_or_else(|_| {
                tracing::error!(status_code = error.status_code, "Engine returned an invalid status code");
                StatusCode::INTERNAL_SERVER_ERROR
            });
            return (status, Json(json!({ "errors": error.errors }))).into_response();
        }

        let (status, descriptor) = self.descriptor();
        let mut response = (status, Json(json!({ "errors": [descriptor] }))).into_response();
        if let ApiError::Unauthorized = self {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(INVALID_SYSTEM_TOKEN),
            );
        }
        response
    }
}
