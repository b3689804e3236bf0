//! Application state management.
//!
//! Shared state handed to every request handler via Axum's State extractor.
//! The breaker and limiter maps live here, per gateway instance, rather than
//! in process-wide globals.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::SecretString;

use super::config::RateLimitConfig;
use super::rate_limiter::SlidingWindowLimiter;
use super::service::GatewayService;

/// Token bucket keyed by client identity, used for the health routes.
pub type HealthLimiter = DefaultKeyedRateLimiter<String>;

/// Shared application state for the Axum web server.
///
/// # Example
///
/// ```ignore
/// let service = Arc::new(GatewayService::from_config(&config, transport, audit)?);
/// let state = AppState::new(service, &config.rate_limit, config.secret_key.clone());
/// let router = create_router(Arc::new(state));
/// ```
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GatewayService>,

    /// Sliding-window limiter in front of the transaction routes.
    pub rate_limiter: Arc<SlidingWindowLimiter>,

    pub health_limiter: Arc<HealthLimiter>,

    /// Sustained requests per second admitted by `health_limiter`.
    pub health_rps: u32,

    /// Shared secret expected from callers.
    pub secret_key: SecretString,

    /// Renders `GET /metrics`; absent when no recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn new(
        service: Arc<GatewayService>,
        rate_limit: &RateLimitConfig,
        secret_key: SecretString,
    ) -> Self {
        let health_quota =
            Quota::per_second(NonZeroU32::new(rate_limit.health_rps).unwrap_or(NonZeroU32::MIN))
                .allow_burst(
                    NonZeroU32::new(rate_limit.health_burst).unwrap_or(NonZeroU32::MIN),
                );

        Self {
            service,
            rate_limiter: Arc::new(SlidingWindowLimiter::from_config(rate_limit)),
            health_limiter: Arc::new(RateLimiter::keyed(health_quota)),
            health_rps: rate_limit.health_rps,
            secret_key,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
