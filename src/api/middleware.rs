//! HTTP middleware: client identity, rate limiting and shared-secret auth.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, Response, header},
    middleware::Next,
    response::IntoResponse,
};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::app::{Admission, AppState};
use crate::domain::AppError;

const UNKNOWN_CLIENT: &str = "unknown";

/// Constant-time comparison of two byte slices to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Client identity used as the rate-limit key: first `X-Forwarded-For`
/// entry, then `X-Real-IP`, then the peer address.
pub fn client_identity<B>(request: &Request<B>) -> String {
    let header_value = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    if let Some(forwarded) = header_value("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(real_ip) = header_value("x-real-ip") {
        let trimmed = real_ip.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    UNKNOWN_CLIENT.to_string()
}

/// Token from `X-Service-Token` or `Authorization: Bearer <token>`.
fn presented_token<B>(request: &Request<B>) -> Option<&str> {
    let headers = request.headers();
    if let Some(token) = headers.get("x-service-token").and_then(|v| v.to_str().ok()) {
        return Some(token.trim());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Shared-secret authentication.
/// Compares SHA-256 digests in constant time.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let Some(provided) = presented_token(&request) else {
        warn!("Auth failed: no service token presented");
        return AppError::Authentication("missing service token".to_string()).into_response();
    };

    let expected_hash = Sha256::digest(state.secret_key.expose_secret().as_bytes());
    let provided_hash = Sha256::digest(provided.as_bytes());

    if !constant_time_eq(expected_hash.as_slice(), provided_hash.as_slice()) {
        warn!("Auth failed: invalid service token");
        return AppError::Authentication("invalid service token".to_string()).into_response();
    }

    next.run(request).await
}

fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Sliding-window rate limit for the transaction routes.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let client = client_identity(&request);
    let limit = HeaderValue::from(state.rate_limiter.capacity());

    match state.rate_limiter.admit(&client) {
        Admission::Admitted { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", limit);
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        Admission::Rejected { retry_after } => {
            let retry_after_secs = retry_after_secs(retry_after);
            warn!(client = %client, retry_after = retry_after_secs, "Rate limit exceeded");
            metrics::counter!("gateway_rate_limited_total").increment(1);

            let mut response = AppError::RateLimited {
                limit: state.rate_limiter.capacity(),
                window_secs: state.rate_limiter.window().as_secs(),
                retry_after_secs,
            }
            .into_response();
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", limit);
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
            response
        }
    }
}

/// Token-bucket limit for the health routes.
pub async fn health_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let client = client_identity(&request);
    match state.health_limiter.check_key(&client) {
        Ok(()) => next.run(request).await,
        Err(not_until) => {
            let wait = not_until.wait_time_from(governor::clock::Clock::now(
                &governor::clock::DefaultClock::default(),
            ));
            debug!(client = %client, "Health rate limit exceeded");

            AppError::RateLimited {
                limit: state.health_rps,
                window_secs: 1,
                retry_after_secs: retry_after_secs(wait),
            }
            .into_response()
        }
    }
}
