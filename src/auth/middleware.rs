//! Request admission for routes outside [`crate::auth::service::AuthService`]'s
//! own router (the MCP-over-HTTP transport, the admin surface): an axum
//! extractor around `AuthService::verify_token`, plus a sliding-window rate
//! limiter.

use crate::auth::service::AuthService;
use crate::error::GatewayError;
use crate::model::UserContext;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The caller identity resolved from a bearer token, injected as a handler
/// argument via `FromRequestParts`.
#[derive(Debug, Clone)]
pub struct AuthExtractor(pub UserContext);

impl std::ops::Deref for AuthExtractor {
    type Target = UserContext;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct AuthRejection(GatewayError);

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn extract_bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(crate::constants::HEADER_AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
    Arc<AuthService>: FromRef<S>,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<AuthService>::from_ref(state);
        let bearer = extract_bearer_token(parts)
            .ok_or_else(|| AuthRejection(GatewayError::unauthorized("missing bearer token")))?
            .to_string();
        let user = auth.verify_token(&bearer).await.map_err(AuthRejection)?;
        Ok(AuthExtractor(user))
    }
}

/// Sliding-window rate limiter keyed by bearer token (falling back to
/// "anonymous" when none is present). Disabled entirely when `max_requests`
/// is zero.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    pub fn check(&self, key: &str) -> bool {
        if self.max_requests == 0 {
            return true;
        }
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let entry = windows.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() >= self.max_requests {
            return false;
        }
        entry.push(now);
        true
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<RateLimiter>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let key = request
        .headers()
        .get(crate::constants::HEADER_AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.check(&key) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "rate limit exceeded" })),
        )
            .into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_after_limit_reached() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }

    #[test]
    fn zero_max_requests_disables_limiting() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        for _ in 0..100 {
            assert!(limiter.check("a"));
        }
    }
}
