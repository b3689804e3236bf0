//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use serde_json::{Value, json};
use tracing::{Instrument, error, info, warn};
use validator::Validate;

use crate::app::AppState;
use crate::domain::{
    AppError, AuditError, CircuitSnapshot, CreateTransactionRequest, DispatchError,
    DispatchErrorResponse, DispatchResponse, ErrorDetail, ErrorResponse, HealthResponse,
    HealthStatus, RateLimitResponse,
};

const STATS_WINDOW_HOURS: i64 = 24;

/// Service banner.
pub async fn root_handler() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "execute": "/api/v1/transactions/execute",
            "health": "/health",
            "stats": "/api/v1/stats",
            "metrics": "/metrics"
        }
    }))
}

/// Routes a transfer to the core ledger or a partner bank.
pub async fn execute_transaction_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> Result<Json<DispatchResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::Deserialization(e.body_text()))?;
    request.validate()?;

    let transaction = request.into_transaction();
    info!(
        transaction_id = %transaction.transaction_id,
        amount = %transaction.amount,
        currency = %transaction.currency,
        "Transaction request received"
    );

    // Runs detached so a dropped connection or an outer timeout cannot
    // cancel the attempt between the downstream call and its audit record.
    let service = Arc::clone(&state.service);
    let dispatch = async move { service.dispatch(transaction).await }.in_current_span();
    let response = tokio::spawn(dispatch)
        .await
        .map_err(|e| AppError::Internal(format!("dispatch task failed: {e}")))??;
    Ok(Json(response))
}

/// Kept for clients of the former external-only endpoint.
pub async fn external_execute_handler(
    state: State<Arc<AppState>>,
    payload: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> Result<Json<DispatchResponse>, AppError> {
    warn!("Deprecated endpoint /transactions/external/execute called; use /transactions/execute");
    execute_transaction_handler(state, payload).await
}

pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let stats = state.service.stats(STATS_WINDOW_HOURS).await?;
    Ok(Json(json!({
        "period": format!("last {STATS_WINDOW_HOURS} hours"),
        "statistics": stats,
    })))
}

pub async fn circuit_breaker_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Json<CircuitSnapshot> {
    Json(state.service.circuit_snapshot(&key))
}

pub async fn reset_circuit_breaker_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Json<Value> {
    let snapshot = state.service.reset_circuit(&key);
    info!(destination = %key, "Circuit breaker reset via API");
    Json(json!({
        "status": "success",
        "message": format!("Circuit breaker {key} reset"),
        "circuit": snapshot,
    }))
}

pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.service.health_check().await)
}

pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus text exposition.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

fn dispatch_error_response(err: &DispatchError) -> axum::response::Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error_type = %err.kind(), message = %err, "Dispatch failed");
    }
    let body = Json(DispatchErrorResponse {
        status: "failed".to_string(),
        error: ErrorDetail {
            r#type: err.kind().to_string(),
            message: err.to_string(),
        },
    });
    (status, body).into_response()
}

fn rate_limited_response(retry_after: u64, message: String) -> axum::response::Response {
    let body = Json(RateLimitResponse {
        error: ErrorDetail {
            r#type: "rate_limited".to_string(),
            message,
        },
        retry_after,
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Dispatch(err) => return dispatch_error_response(err),
            AppError::Audit(audit_err) => match audit_err {
                AuditError::NotSupported(_) => (
                    StatusCode::NOT_IMPLEMENTED,
                    "not_supported",
                    self.to_string(),
                ),
                AuditError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                _ => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "audit_error",
                    self.to_string(),
                ),
            },
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                self.to_string(),
            ),
            AppError::Deserialization(_) => (
                StatusCode::BAD_REQUEST,
                "deserialization_error",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
            AppError::RateLimited {
                retry_after_secs, ..
            } => return rate_limited_response(*retry_after_secs, self.to_string()),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
