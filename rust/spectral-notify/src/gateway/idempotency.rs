//! Idempotency key handling for write endpoints.
//!
//! Clients may supply an `Idempotency-Key` header; when absent (or
//! over-long) a deterministic key is derived by hashing the canonical
//! JSON of `{ path, body }`, so a blind double-POST is still deduplicated.
//! Successful responses are persisted atomically with the state mutation
//! (inside the store transaction); deterministic validation errors are
//! cached after the fact.

use std::future::Future;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sha2::{Digest, Sha256};

use crate::database::IdemWrite;
use crate::error::ApiError;
use crate::AppState;

/// Header name for the client-supplied idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Longest accepted client key; longer values fall back to derivation.
pub const MAX_CLIENT_KEY_LEN: usize = 128;

/// Canonical JSON: object keys sorted lexicographically at every depth,
/// array order preserved, no insignificant whitespace.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Lowercase hex SHA-256 of the input.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Derived key for a request without a usable client key.
#[must_use]
pub fn derive_key(path: &str, body: &serde_json::Value) -> String {
    let envelope = serde_json::json!({ "path": path, "body": body });
    sha256_hex(&canonical_json(&envelope))
}

/// Client key if present and well-formed, else the derived key.
#[must_use]
pub fn resolve_key(headers: &HeaderMap, path: &str, body: &serde_json::Value) -> String {
    match headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(key) if !key.is_empty() && key.len() <= MAX_CLIENT_KEY_LEN => key.to_string(),
        _ => derive_key(path, body),
    }
}

/// Check for a cached response; returns the replay or the context needed
/// to record a fresh one.
async fn check_cached(
    state: &AppState,
    endpoint: &'static str,
    headers: &HeaderMap,
    body: &serde_json::Value,
) -> Result<Result<Response, (String, String)>, ApiError> {
    let key = resolve_key(headers, endpoint, body);
    let request_hash = sha256_hex(&canonical_json(body));

    if let Some(row) = state.idempotency.lookup(&key).await? {
        if row.endpoint != endpoint {
            return Err(ApiError::IdempotencyConflict(format!(
                "idempotency key already used for {}",
                row.endpoint
            )));
        }
        if let Some(stored_hash) = &row.request_hash {
            if *stored_hash != request_hash {
                return Err(ApiError::IdempotencyConflict(
                    "idempotency key reused with a different request body".to_string(),
                ));
            }
        }
        tracing::debug!(endpoint, "Replaying cached idempotent response");
        let status = StatusCode::from_u16(row.response.status).unwrap_or(StatusCode::OK);
        return Ok(Ok((status, Json(row.response.body)).into_response()));
    }

    Ok(Err((key, request_hash)))
}

/// Cache a deterministic validation error so retries replay it.
async fn cache_error(
    state: &AppState,
    endpoint: &'static str,
    key: String,
    request_hash: String,
    error: &ApiError,
) {
    if let Err(cache_err) = state
        .idempotency
        .cache_response(
            key,
            endpoint,
            Some(request_hash),
            error.status().as_u16(),
            error.body(),
        )
        .await
    {
        tracing::warn!(endpoint, error = %cache_err, "Failed to cache error response");
    }
}

/// Run a write whose store transaction persists the cached response
/// atomically with the state mutation.
pub async fn run_idempotent<F, Fut>(
    state: &AppState,
    endpoint: &'static str,
    headers: &HeaderMap,
    body: &serde_json::Value,
    op: F,
) -> Result<Response, ApiError>
where
    F: FnOnce(IdemWrite) -> Fut,
    Fut: Future<Output = Result<serde_json::Value, ApiError>>,
{
    let (key, request_hash) = match check_cached(state, endpoint, headers, body).await? {
        Ok(replay) => return Ok(replay),
        Err(fresh) => fresh,
    };

    let idem = state
        .idempotency
        .make_write(key.clone(), endpoint, Some(request_hash.clone()));

    match op(idem).await {
        Ok(value) => Ok((StatusCode::OK, Json(value)).into_response()),
        Err(e) => {
            if e.is_cacheable() {
                cache_error(state, endpoint, key, request_hash, &e).await;
            }
            Err(e)
        }
    }
}

/// Run a compound write (spanning several instances) that cannot commit
/// its response inside a single store transaction; the response is
/// cached after the operation succeeds.
pub async fn run_idempotent_compound<F, Fut>(
    state: &AppState,
    endpoint: &'static str,
    headers: &HeaderMap,
    body: &serde_json::Value,
    op: F,
) -> Result<Response, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<serde_json::Value, ApiError>>,
{
    let (key, request_hash) = match check_cached(state, endpoint, headers, body).await? {
        Ok(replay) => return Ok(replay),
        Err(fresh) => fresh,
    };

    match op().await {
        Ok(value) => {
            if let Err(e) = state
                .idempotency
                .cache_response(key, endpoint, Some(request_hash), 200, value.clone())
                .await
            {
                tracing::warn!(endpoint, error = %e, "Failed to cache response");
            }
            Ok((StatusCode::OK, Json(value)).into_response())
        }
        Err(e) => {
            if e.is_cacheable() {
                cache_error(state, endpoint, key, request_hash, &e).await;
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_json_sorts_keys_recursively() {
        let value = serde_json::json!({
            "b": {"z": 1, "a": [3, 1, 2]},
            "a": "x",
        });
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"x","b":{"a":[3,1,2],"z":1}}"#
        );
    }

    #[test]
    fn test_canonical_json_preserves_array_order() {
        let value = serde_json::json!([{"b": 1, "a": 2}, "tail"]);
        assert_eq!(canonical_json(&value), r#"[{"a":2,"b":1},"tail"]"#);
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_derive_key_stable_under_key_order() {
        let a = serde_json::json!({"taskId": "TASK-A", "progress": 50});
        let b = serde_json::json!({"progress": 50, "taskId": "TASK-A"});
        assert_eq!(
            derive_key("/tasks/updateProgress", &a),
            derive_key("/tasks/updateProgress", &b)
        );
    }

    #[test]
    fn test_derive_key_differs_per_path() {
        let body = serde_json::json!({"taskId": "TASK-A"});
        assert_ne!(
            derive_key("/tasks/complete", &body),
            derive_key("/tasks/cancel", &body)
        );
    }

    #[test]
    fn test_resolve_key_prefers_client_header() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, "client-key-1".parse().unwrap());
        let body = serde_json::json!({});
        assert_eq!(resolve_key(&headers, "/tasks/create", &body), "client-key-1");
    }

    #[test]
    fn test_resolve_key_rejects_overlong_header() {
        let mut headers = HeaderMap::new();
        let long = "k".repeat(MAX_CLIENT_KEY_LEN + 1);
        headers.insert(IDEMPOTENCY_KEY_HEADER, long.parse().unwrap());
        let body = serde_json::json!({});
        assert_eq!(
            resolve_key(&headers, "/tasks/create", &body),
            derive_key("/tasks/create", &body)
        );
    }
}
