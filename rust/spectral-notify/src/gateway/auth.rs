//! API key authentication for write endpoints.
//!
//! Reads only require routing; every write must carry a matching
//! `X-API-Key`. When no key is configured the broker runs in development
//! mode and accepts unauthenticated writes (a startup warning is logged).

use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::AppState;

/// Header carrying the write API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Optional header identifying the authenticated caller; used as the
/// registry `createdBy` value.
pub const CALLER_ID_HEADER: &str = "X-Caller-Id";

/// Caller identity recorded on create, provided by the authenticating
/// collaborator in front of the broker.
#[must_use]
pub fn caller_identity(headers: &HeaderMap) -> String {
    headers
        .get(CALLER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("api")
        .to_string()
}

/// Middleware enforcing `X-API-Key` on the write router.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.config.auth.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    match req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(provided) if provided == expected => Ok(next.run(req).await),
        Some(_) => Err(ApiError::Unauthorized("invalid API key".to_string())),
        None => Err(ApiError::Unauthorized(format!(
            "missing {API_KEY_HEADER} header"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_identity_default() {
        let headers = HeaderMap::new();
        assert_eq!(caller_identity(&headers), "api");
    }

    #[test]
    fn test_caller_identity_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CALLER_ID_HEADER, "deploy-bot".parse().unwrap());
        assert_eq!(caller_identity(&headers), "deploy-bot");
    }
}
