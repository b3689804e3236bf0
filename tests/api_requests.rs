use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use bank_transaction_gateway::api::create_router;
use bank_transaction_gateway::app::{AppState, GatewayConfig, GatewayService};
use bank_transaction_gateway::domain::{CallError, TransactionStats};
use bank_transaction_gateway::test_utils::{MockAuditSink, MockBankTransport};

const TOKEN: &str = "api-secret";

fn create_test_state(
    rate_limit: &'static str,
    transport: Arc<MockBankTransport>,
    sink: Arc<MockAuditSink>,
) -> Arc<AppState> {
    create_test_state_with(&[("RATE_LIMIT", rate_limit)], transport, sink)
}

fn create_test_state_with(
    overrides: &[(&'static str, &'static str)],
    transport: Arc<MockBankTransport>,
    sink: Arc<MockAuditSink>,
) -> Arc<AppState> {
    let mut env: HashMap<&str, &str> = HashMap::from([
        ("SECRET_KEY", TOKEN),
        ("CORE_URL", "http://core.local"),
        ("MINIBANK_A_API_KEY", "key-a"),
        ("MINIBANK_B_API_KEY", "key-b"),
        ("CIRCUIT_BREAKER_THRESHOLD", "1"),
    ]);
    env.extend(overrides.iter().copied());
    let config = GatewayConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
    let service = GatewayService::from_config(&config, transport, sink).unwrap();
    Arc::new(AppState::new(
        Arc::new(service),
        &config.rate_limit,
        config.secret_key.clone(),
    ))
}

fn router(rate_limit: &'static str) -> (Router, Arc<MockBankTransport>, Arc<MockAuditSink>) {
    let transport = Arc::new(MockBankTransport::new());
    let sink = Arc::new(MockAuditSink::new());
    let state = create_test_state(rate_limit, transport.clone(), sink.clone());
    (create_router(state), transport, sink)
}

fn execute_from(client: &str, uri: &str) -> Request<Body> {
    let body = json!({
        "source_account": "1010000001",
        "target_account": "1010000002",
        "amount": 25000
    });
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .header("X-Service-Token", TOKEN)
        .header("X-Forwarded-For", client)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_rate_limit_rejects_after_capacity() {
    let (app, transport, _) = router("3");

    for expected_remaining in ["2", "1", "0"] {
        let response = app
            .clone()
            .oneshot(execute_from("10.0.0.1", "/api/v1/transactions/execute"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(
            response.headers()["x-ratelimit-remaining"],
            expected_remaining
        );
    }

    let response = app
        .clone()
        .oneshot(execute_from("10.0.0.1", "/api/v1/transactions/execute"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "rate_limited");
    assert!(body["retry_after"].as_u64().unwrap() >= 1);
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn test_rate_limit_is_per_client() {
    let (app, _, _) = router("1");

    let first = app
        .clone()
        .oneshot(execute_from("10.0.0.1", "/api/v1/transactions/execute"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let other_client = app
        .clone()
        .oneshot(execute_from("10.0.0.2", "/api/v1/transactions/execute"))
        .await
        .unwrap();
    assert_eq!(other_client.status(), StatusCode::OK);

    let repeat = app
        .clone()
        .oneshot(execute_from("10.0.0.1", "/api/v1/transactions/execute"))
        .await
        .unwrap();
    assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rate_limit_runs_before_authentication() {
    let (app, _, _) = router("1");

    let ok = app
        .clone()
        .oneshot(execute_from("10.0.0.9", "/api/v1/transactions/execute"))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let unauthenticated = Request::builder()
        .method("POST")
        .uri("/api/v1/transactions/execute")
        .header("Content-Type", "application/json")
        .header("X-Forwarded-For", "10.0.0.9")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.clone().oneshot(unauthenticated).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_deprecated_external_alias_dispatches() {
    let (app, transport, sink) = router("100");

    let response = app
        .clone()
        .oneshot(execute_from("10.0.0.1", "/api/v1/transactions/external/execute"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["transaction_type"], "internal");
    assert_eq!(transport.call_count(), 1);
    assert_eq!(sink.events().len(), 1);
}

fn slow_ledger(latency: Duration) -> Arc<MockBankTransport> {
    Arc::new(MockBankTransport::responding(json!({"status": "completed"})).with_latency(latency))
}

#[tokio::test(start_paused = true)]
async fn test_slow_downstream_within_long_deadline_completes_and_is_audited() {
    let transport = slow_ledger(Duration::from_secs(100));
    let sink = Arc::new(MockAuditSink::new());
    let app = create_router(create_test_state_with(
        &[("TIMEOUT", "120")],
        transport.clone(),
        sink.clone(),
    ));

    let response = app
        .oneshot(execute_from("10.0.0.1", "/api/v1/transactions/execute"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.call_count(), 1);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status_code, 200);
}

#[tokio::test(start_paused = true)]
async fn test_downstream_past_its_deadline_is_audited_as_timeout() {
    let transport = slow_ledger(Duration::from_secs(100));
    let sink = Arc::new(MockAuditSink::new());
    let state = create_test_state_with(&[("TIMEOUT", "2")], transport.clone(), sink.clone());
    let app = create_router(Arc::clone(&state));

    let response = app
        .oneshot(execute_from("10.0.0.1", "/api/v1/transactions/execute"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body_json(response).await["error"]["type"], "timeout");
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status_code, 504);
    assert_eq!(state.service.breaker().snapshot("core_bank").failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_request_still_completes_audit() {
    let transport = slow_ledger(Duration::from_secs(10));
    let sink = Arc::new(MockAuditSink::new());
    let app = create_router(create_test_state_with(
        &[("TIMEOUT", "30")],
        transport.clone(),
        sink.clone(),
    ));

    let abandoned = tokio::time::timeout(
        Duration::from_secs(1),
        app.oneshot(execute_from("10.0.0.1", "/api/v1/transactions/execute")),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(sink.events().is_empty());

    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(transport.call_count(), 1);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status_code, 200);
}

#[tokio::test]
async fn test_circuit_breaker_inspect_and_reset() {
    let transport = Arc::new(MockBankTransport::failing(CallError::Downstream {
        status: 500,
        message: "ledger down".to_string(),
    }));
    let sink = Arc::new(MockAuditSink::new());
    let app = create_router(create_test_state("100", transport.clone(), sink));

    let response = app
        .clone()
        .oneshot(execute_from("10.0.0.1", "/api/v1/transactions/execute"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let response = app
        .clone()
        .oneshot(admin("GET", "/api/v1/circuit-breaker/core_bank"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["destination"], "core_bank");
    assert_eq!(snapshot["state"], "open");
    assert_eq!(snapshot["failure_count"], 1);
    assert!(!snapshot["last_failure_at"].is_null());

    let health = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(health).await["status"], "degraded");

    let response = app
        .clone()
        .oneshot(admin("POST", "/api/v1/circuit-breaker/reset/core_bank"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["circuit"]["state"], "closed");
    assert_eq!(body["circuit"]["failure_count"], 0);

    transport.push_outcome(Ok(json!({"status": "completed"})));
    let response = app
        .clone()
        .oneshot(execute_from("10.0.0.1", "/api/v1/transactions/execute"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["status"], "completed");
}

#[tokio::test]
async fn test_unknown_circuit_key_reads_as_closed_without_creating_it() {
    let state = create_test_state(
        "100",
        Arc::new(MockBankTransport::new()),
        Arc::new(MockAuditSink::new()),
    );
    let app = create_router(Arc::clone(&state));

    for (method, uri) in [
        ("GET", "/api/v1/circuit-breaker/external_bank_NOPE"),
        ("POST", "/api/v1/circuit-breaker/reset/external_bank_NOPE"),
    ] {
        let response = app.clone().oneshot(admin(method, uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }

    let response = app
        .clone()
        .oneshot(admin("GET", "/api/v1/circuit-breaker/external_bank_NOPE"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["state"], "closed");
    assert_eq!(body["failure_count"], 0);
    assert!(state.service.breaker().snapshots().is_empty());
}

#[tokio::test]
async fn test_stats_from_audit_sink() {
    let (app, _, sink) = router("100");
    sink.set_stats(TransactionStats {
        total_transactions: 10,
        internal_count: 6,
        external_count: 4,
        success_rate: 90.0,
        avg_duration_ms: 12.5,
    });

    let response = app
        .clone()
        .oneshot(admin("GET", "/api/v1/stats"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["period"], "last 24 hours");
    assert_eq!(body["statistics"]["total_transactions"], 10);
    assert_eq!(body["statistics"]["success_rate"], 90.0);
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let (app, _, _) = router("100");

    for (method, uri) in [
        ("GET", "/api/v1/stats"),
        ("GET", "/api/v1/circuit-breaker/core_bank"),
        ("POST", "/api/v1/circuit-breaker/reset/core_bank"),
    ] {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn test_health_is_not_authenticated_or_window_limited() {
    let (app, _, _) = router("1");

    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (app, _, _) = router("100");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
