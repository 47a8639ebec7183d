//! Error taxonomy for the broker surface.
//!
//! Every expected failure maps to a stable error code carried on the wire
//! as `{ code, message }` with the HTTP status listed in the table below.
//! Storage and runtime faults collapse into `INTERNAL` and are never
//! cached by the idempotency layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Errors returned by broker operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unknown entity or phase.
    #[error("{0}")]
    NotFound(String),
    /// Schema violation, out-of-range progress, bad weight, unknown event type.
    #[error("{0}")]
    InvalidInput(String),
    /// Mutation attempted on a terminal entity or phase.
    #[error("{0}")]
    TerminalState(String),
    /// Create collided with an existing entity ID.
    #[error("{0}")]
    DuplicateEntity(String),
    /// Create collided with an existing phase key.
    #[error("{0}")]
    DuplicatePhase(String),
    /// Write without a valid API key.
    #[error("{0}")]
    Unauthorized(String),
    /// Same idempotency key used with a different endpoint or request body.
    #[error("{0}")]
    IdempotencyConflict(String),
    /// WebSocket subscription to a kind that is not `task` or `workflow`.
    #[error("{0}")]
    ForbiddenKind(String),
    /// Write path rate limit exceeded.
    #[error("{0}")]
    RateLimited(String),
    /// Unexpected storage or runtime fault.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Stable wire code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::TerminalState(_) => "TERMINAL_STATE",
            Self::DuplicateEntity(_) => "DUPLICATE_ENTITY",
            Self::DuplicatePhase(_) => "DUPLICATE_PHASE",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            Self::ForbiddenKind(_) => "FORBIDDEN_KIND",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status this error is carried with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ForbiddenKind(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::TerminalState(_)
            | Self::DuplicateEntity(_)
            | Self::DuplicatePhase(_)
            | Self::IdempotencyConflict(_) => StatusCode::CONFLICT,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the serialized error may be cached under an idempotency key.
    ///
    /// Only deterministic validation failures are cached; transient
    /// `INTERNAL` errors must stay retryable.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::NotFound(_))
    }

    /// Wire body for this error.
    #[must_use]
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Internal(anyhow::Error::new(e))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(anyhow::Error::new(e))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(anyhow::Error::new(e))
    }
}

/// Serialized error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_)) {
            tracing::error!(error = %self, "Internal error on request path");
        }

        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            data: None,
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::TerminalState("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::IdempotencyConflict("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::InvalidInput("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_only_validation_errors_cacheable() {
        assert!(ApiError::InvalidInput("x".into()).is_cacheable());
        assert!(ApiError::NotFound("x".into()).is_cacheable());
        assert!(!ApiError::TerminalState("x".into()).is_cacheable());
        assert!(!ApiError::Internal(anyhow::anyhow!("boom")).is_cacheable());
    }

    #[test]
    fn test_body_shape() {
        let body = ApiError::DuplicateEntity("task TASK-A already exists".into()).body();
        assert_eq!(body["code"], "DUPLICATE_ENTITY");
        assert_eq!(body["message"], "task TASK-A already exists");
    }
}
