//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking so a misbehaving client
//! cannot hammer the login callback or the refresh endpoint.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};

use crate::auth::extract_client_ip;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Bucket shared by requests whose client IP cannot be determined.
const UNKNOWN_CLIENT: &str = "unknown";

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter for login callback and refresh (10 per second, burst 20)
    pub auth: Arc<IpLimiter>,
}

impl RateLimitConfig {
    /// Create rate limiters with default configuration.
    /// In test mode, limits are much higher to allow rapid test execution.
    pub fn new() -> Self {
        #[cfg(feature = "test-mode")]
        const AUTH_PER_SEC: u32 = 1000;
        #[cfg(not(feature = "test-mode"))]
        const AUTH_PER_SEC: u32 = 10;

        #[cfg(feature = "test-mode")]
        const AUTH_BURST: u32 = 1000;
        #[cfg(not(feature = "test-mode"))]
        const AUTH_BURST: u32 = 20;

        Self::with_quota(AUTH_PER_SEC, AUTH_BURST)
    }

    /// Create a limiter allowing `per_second` requests with the given burst.
    /// Zero values are clamped to one.
    pub fn with_quota(per_second: u32, burst: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        Self {
            auth: Arc::new(RateLimiter::keyed(
                Quota::per_second(per_second).allow_burst(burst),
            )),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware for rate limiting authentication endpoints.
pub async fn rate_limit_auth(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request).unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    match config.auth.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(%ip, "Auth rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests. Please try again later.",
            )
                .into_response()
        }
    }
}
