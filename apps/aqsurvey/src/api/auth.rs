//! # Authentication Module
//!
//! Optional bearer-key check in front of the participant API.
//!
//! When `server.api_key` (or `AQSURVEY_API_KEY`) is set, every route except
//! `/health` needs:
//!
//! ```text
//! Authorization: Bearer <key>
//! ```

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// The configured key, shared by every request.
pub type ApiKey = Arc<str>;

/// Compare a provided key against the configured one in constant time.
///
/// Both sides are padded to the longer length first so the comparison
/// touches the same number of bytes whatever the provided length is.
pub fn keys_match(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    let len = provided.len().max(expected.len());
    let mut left = vec![0u8; len];
    let mut right = vec![0u8; len];
    left[..provided.len()].copy_from_slice(provided);
    right[..expected.len()].copy_from_slice(expected);

    let same_bytes: bool = left.ct_eq(&right).into();
    same_bytes && provided.len() == expected.len()
}

/// Reject requests without the configured key.
pub async fn api_key_auth_middleware(
    State(expected): State<ApiKey>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let Some(value) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        tracing::warn!(
            event = "auth_failure",
            reason = "missing_authorization_header",
            path = request.uri().path(),
            "Missing Authorization header"
        );
        return Err((StatusCode::UNAUTHORIZED, "Unauthorized"));
    };

    let provided = value.strip_prefix("Bearer ").unwrap_or(value);
    if keys_match(provided, &expected) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(
            event = "auth_failure",
            reason = "invalid_api_key",
            path = request.uri().path(),
            "Authentication failed: invalid API key"
        );
        Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_match() {
        assert!(keys_match("s3cret", "s3cret"));
    }

    #[test]
    fn prefix_does_not_match() {
        assert!(!keys_match("s3c", "s3cret"));
        assert!(!keys_match("s3cret-and-more", "s3cret"));
    }

    #[test]
    fn zero_padding_is_not_a_match() {
        assert!(!keys_match("abc\0", "abc"));
    }
}
