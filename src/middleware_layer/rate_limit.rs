use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;

use crate::error::AppError;

/// Sessions an instructor IP may open per window.
const SESSION_CREATE_LIMIT: u32 = 20;

/// Per-IP fixed-window counters kept in Redis.
#[derive(Clone)]
pub struct RateLimiter {
    redis: ConnectionManager,
    submit_limit: u32,
    window_secs: u64,
}

impl RateLimiter {
    /// Creates a new `RateLimiter`.
    ///
    /// # Arguments
    ///
    /// * `redis` - The Redis connection manager.
    /// * `submit_limit` - Attendance submissions allowed per IP per window.
    /// * `window_secs` - The window length in seconds.
    pub fn new(redis: ConnectionManager, submit_limit: u32, window_secs: u64) -> Self {
        Self {
            redis,
            submit_limit,
            window_secs,
        }
    }

    /// Counts one hit against `key`. Returns the seconds left in the window
    /// when the limit is already used up.
    ///
    /// Redis failures let the request through.
    async fn hit(&self, key: &str, limit: u32) -> Option<i64> {
        let mut redis = self.redis.clone();

        let count: u32 = match redis::cmd("INCR").arg(key).query_async(&mut redis).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("❌ Rate limit counter unavailable: {}", e);
                return None;
            }
        };

        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(self.window_secs)
                .query_async(&mut redis)
                .await
                .unwrap_or(());
        }

        if count <= limit {
            return None;
        }

        let ttl: Option<i64> = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut redis)
            .await
            .unwrap_or(None);
        Some(ttl.unwrap_or(0).max(0))
    }
}

/// Extracts the real IP address from the request extensions.
///
/// # Arguments
///
/// * `req` - The incoming request.
///
/// # Returns
///
/// The IP address as a string, or "unknown" if not found.
fn extract_real_ip(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// A middleware that rate limits attendance submissions per client IP.
pub async fn rate_limit_submissions(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_real_ip(&req);
    let key = format!("rate_limit:submit:{}", ip);

    if let Some(retry_in) = limiter.hit(&key, limiter.submit_limit).await {
        return AppError::RateLimitExceeded(format!(
            "Too many attendance submissions. Try again in {} seconds",
            retry_in
        ))
        .into_response();
    }

    next.run(req).await
}

/// A middleware that rate limits session creation per client IP.
pub async fn rate_limit_session_creation(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_real_ip(&req);
    let key = format!("rate_limit:create_session:{}", ip);

    if let Some(retry_in) = limiter.hit(&key, SESSION_CREATE_LIMIT).await {
        return AppError::RateLimitExceeded(format!(
            "Session creation limit exceeded. Try again in {} seconds",
            retry_in
        ))
        .into_response();
    }

    next.run(req).await
}
