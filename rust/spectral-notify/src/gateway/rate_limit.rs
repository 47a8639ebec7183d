//! Rate limiting middleware using governor.
//!
//! A single global limiter guards the write path; reads and WebSocket
//! upgrades are not limited. Disabled when the configured rate is 0.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

use crate::config::GatewayConfig;
use crate::error::ApiError;
use crate::AppState;

/// Rate limiter type alias.
pub type WriteRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Build the write-path limiter from configuration; `None` disables it.
#[must_use]
pub fn build_write_limiter(config: &GatewayConfig) -> Option<Arc<WriteRateLimiter>> {
    let per_second = NonZeroU32::new(config.rate_limit_per_second)?;
    let burst = NonZeroU32::new(config.rate_limit_burst).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_second(per_second).allow_burst(burst);
    Some(Arc::new(RateLimiter::direct(quota)))
}

/// Global write rate limiting middleware.
pub async fn write_rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(limiter) = &state.write_limiter {
        if let Err(not_until) = limiter.check() {
            let wait = not_until
                .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
            return Err(ApiError::RateLimited(format!(
                "write rate limit exceeded, retry in {}s",
                wait.as_secs().max(1)
            )));
        }
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_disables_limiter() {
        let config = GatewayConfig {
            rate_limit_per_second: 0,
            rate_limit_burst: 100,
        };
        assert!(build_write_limiter(&config).is_none());
    }

    #[test]
    fn test_limiter_allows_burst() {
        let config = GatewayConfig {
            rate_limit_per_second: 10,
            rate_limit_burst: 5,
        };
        let limiter = build_write_limiter(&config).unwrap();
        for _ in 0..5 {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }
}
