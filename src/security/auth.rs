//! System token authorization for invocation requests.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::response::ApiError;
use crate::http::server::AppState;

/// Decides whether an inbound request may reach the invocation path.
pub trait Authorizer: Send + Sync + 'static {
    fn is_authorized(&self, headers: &HeaderMap) -> bool;
}

/// Accepts `Authorization: Bearer <system token>`.
#[derive(Debug, Clone)]
pub struct SystemTokenAuth {
    expected: String,
}

impl SystemTokenAuth {
    pub fn new(system_token: impl AsRef<str>) -> Self {
        Self {
            expected: format!("Bearer {}", system_token.as_ref()),
        }
    }
}

impl Authorizer for SystemTokenAuth {
    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .is_some_and(|provided| constant_time_eq(&self.expected, provided))
    }
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

/// Rejects unauthorized requests before any invocation state is created.
pub async fn require_system_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.authorizer.is_authorized(request.headers()) {
        return next.run(request).await;
    }

    tracing::warn!(
        method = %request.method(),
        url = %request.uri(),
        "Rejected request with invalid system token"
    );
    ApiError::Unauthorized.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn accepts_matching_bearer_token() {
        let auth = SystemTokenAuth::new("s3cret");
        assert!(auth.is_authorized(&headers("Bearer s3cret")));
    }

    #[test]
    fn rejects_missing_or_wrong_token() {
        let auth = SystemTokenAuth::new("s3cret");
        assert!(!auth.is_authorized(&HeaderMap::new()));
        assert!(!auth.is_authorized(&headers("Bearer s3creT")));
        assert!(!auth.is_authorized(&headers("s3cret")));
        assert!(!auth.is_authorized(&headers("Bearer s3cret ")));
    }

    #[test]
    fn constant_time_eq_matches_plain_equality() {
        assert!(constant_time_eq("", ""));
        assert!(constant_time_eq("same-key-123", "same-key-123"));
        assert!(!constant_time_eq("key-a", "key-b"));
        assert!(!constant_time_eq("short", "longer"));
    }
}
