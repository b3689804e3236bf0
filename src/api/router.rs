//! HTTP routing configuration.

use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::app::AppState;

use super::handlers::{
    circuit_breaker_handler, execute_transaction_handler, external_execute_handler,
    health_check_handler, liveness_handler, metrics_handler, readiness_handler,
    reset_circuit_breaker_handler, root_handler, stats_handler,
};
use super::middleware::{auth_middleware, health_rate_limit_middleware, rate_limit_middleware};

/// Builds the gateway router.
///
/// Transaction routes are rate limited first and authenticated second.
/// Admin routes are authenticated only; health routes carry their own
/// token-bucket limiter. The whole-request timeout is derived from the
/// longest configured downstream deadline plus the audit timeout.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let request_timeout = app_state.service.request_deadline();
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ));

    // Later layers run first: rate limit, then auth.
    let transaction_routes = Router::new()
        .route("/execute", post(execute_transaction_handler))
        .route("/external/execute", post(external_execute_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&app_state),
            auth_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&app_state),
            rate_limit_middleware,
        ));

    let admin_routes = Router::new()
        .route("/stats", get(stats_handler))
        .route("/circuit-breaker/{key}", get(circuit_breaker_handler))
        .route(
            "/circuit-breaker/reset/{key}",
            post(reset_circuit_breaker_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&app_state),
            auth_middleware,
        ));

    let api_routes = Router::new()
        .nest("/transactions", transaction_routes)
        .merge(admin_routes);

    let health_routes = Router::new()
        .route("/", get(health_check_handler))
        .route("/live", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&app_state),
            health_rate_limit_middleware,
        ));

    Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(middleware)
        .with_state(app_state)
}
