//! Broker front-end: routing, write authentication, idempotency, and
//! the WebSocket subscribe path.
//!
//! Reads are served concurrently against the committed store; writes go
//! through the auth and rate-limit layers, then the idempotency wrapper,
//! then the owning instance.

pub mod auth;
pub mod idempotency;
pub mod rate_limit;
pub mod routes;
pub mod streaming;
pub mod tasks;
pub mod workflows;

use axum::Router;
use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::AppState;

/// Maximum rows returned by a history read.
pub const MAX_HISTORY_LIMIT: usize = 200;

/// Default rows returned when the caller omits `limit`.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Routes that require no authentication.
pub fn read_router() -> Router<AppState> {
    routes::router()
        .merge(tasks::read_router())
        .merge(workflows::read_router())
        .merge(streaming::router())
}

/// Routes that mutate state; the server wraps these in the auth,
/// rate-limit, and write-timeout layers.
pub fn write_router() -> Router<AppState> {
    tasks::write_router().merge(workflows::write_router())
}

/// Parse a typed request out of the raw JSON body.
///
/// Handlers keep the raw body for idempotency key derivation, so typed
/// parsing goes through the already-read `Value`.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(body.clone())
        .map_err(|e| ApiError::InvalidInput(format!("invalid request body: {e}")))
}

/// Clamp a history limit into `1..=200`, defaulting to 50.
pub(crate) fn clamp_history_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_history_limit() {
        assert_eq!(clamp_history_limit(None), DEFAULT_HISTORY_LIMIT);
        assert_eq!(clamp_history_limit(Some(0)), 1);
        assert_eq!(clamp_history_limit(Some(10)), 10);
        assert_eq!(clamp_history_limit(Some(10_000)), MAX_HISTORY_LIMIT);
    }
}
