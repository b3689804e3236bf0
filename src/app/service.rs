//! Transaction dispatcher.
//!
//! Orchestrates one transfer end to end: validation, routing, the guarded
//! downstream call and exactly one audit event per routed attempt.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    AuditError, AuditEvent, AuditSink, BankSummary, BankTransport, CORE_BANK_DESTINATION,
    CircuitSnapshot, CircuitState, ConfigError, DispatchError, DispatchResponse, HealthResponse,
    HealthStatus, OutboundRequest, RouteKind, TransactionRequest, TransactionStats,
    ValidationError, external_destination,
};

use super::circuit_breaker::CircuitBreaker;
use super::config::GatewayConfig;
use super::resilient::ResilientCaller;
use super::routing::RoutingEngine;

/// Per-instance dispatch settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub source_system: String,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub audit_timeout: Duration,
    /// Reported by the health endpoint only.
    pub rate_limit: u32,
}

impl GatewaySettings {
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            source_system: config.source_system.clone(),
            min_amount: config.min_amount,
            max_amount: config.max_amount,
            audit_timeout: config.audit_timeout,
            rate_limit: config.rate_limit.requests_per_window,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            source_system: "service".to_string(),
            min_amount: Decimal::from(10_000),
            max_amount: Decimal::from(100_000_000),
            audit_timeout: Duration::from_secs(5),
            rate_limit: 100,
        }
    }
}

/// Headroom above the longest downstream deadline and the audit write.
const REQUEST_DEADLINE_SLACK: Duration = Duration::from_secs(5);

pub struct GatewayService {
    routing: RoutingEngine,
    caller: ResilientCaller,
    audit: Arc<dyn AuditSink>,
    settings: GatewaySettings,
}

impl GatewayService {
    #[must_use]
    pub fn new(
        routing: RoutingEngine,
        caller: ResilientCaller,
        audit: Arc<dyn AuditSink>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            routing,
            caller,
            audit,
            settings,
        }
    }

    /// Wires the service from a validated configuration.
    pub fn from_config(
        config: &GatewayConfig,
        transport: Arc<dyn BankTransport>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ConfigError> {
        let routing = RoutingEngine::new(Arc::new(config.registry()?));
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        Ok(Self::new(
            routing,
            ResilientCaller::new(breaker, transport),
            audit,
            GatewaySettings::from_config(config),
        ))
    }

    #[must_use]
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        self.caller.breaker()
    }

    #[must_use]
    pub fn routing(&self) -> &RoutingEngine {
        &self.routing
    }

    /// Upper bound on one `dispatch`: the longest downstream deadline plus
    /// the audit timeout and some slack. Outer request timeouts must not be
    /// shorter, or the attempt would be cut before it is audited.
    #[must_use]
    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.routing.registry().max_timeout_ms())
            + self.settings.audit_timeout
            + REQUEST_DEADLINE_SLACK
    }

    /// Dispatches one transfer.
    ///
    /// # Errors
    ///
    /// Validation failures return before any I/O and are not audited. Every
    /// other outcome, success included, emits exactly one audit event.
    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    pub async fn dispatch(
        &self,
        request: TransactionRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        request
            .validate_bounds(self.settings.min_amount, self.settings.max_amount)
            .inspect_err(|e| {
                warn!(error = %e, "Transaction rejected by validation");
                record_outcome("validation_error", "none", None);
            })?;

        let started = Instant::now();
        let decision = self.routing.route(&request.target_account);

        let Some(destination) = decision.destination_key() else {
            let err = DispatchError::UnknownDestination {
                account: request.target_account.clone(),
            };
            warn!("No route for target account");
            let event = AuditEvent::new(
                RouteKind::Unknown.as_str(),
                &self.settings.source_system,
                decision.target_system(),
                "",
                request.internal_payload().unwrap_or_default(),
            )
            .failed(err.status_code(), err.to_string())
            .with_duration_ms(elapsed_ms(started));
            self.emit(event).await;
            record_outcome(err.kind(), RouteKind::Unknown.as_str(), Some(started));
            return Err(err);
        };

        let payload = match decision.kind {
            RouteKind::External => {
                request.external_payload(&self.routing.registry().internal().bank_code)
            }
            _ => request.internal_payload(),
        }
        .map_err(|e| ValidationError::InvalidField {
            field: "request".to_string(),
            message: e.to_string(),
        })?;

        let endpoint = decision.target_url.clone().unwrap_or_default();
        let timeout = Duration::from_millis(decision.timeout_ms.unwrap_or_default());
        let outbound = OutboundRequest::new(endpoint.clone(), payload.clone())
            .with_credential(decision.credential.clone());

        info!(
            route = %decision.kind,
            destination = %destination,
            "Dispatching transaction"
        );
        let result = self.caller.call(&destination, &outbound, timeout).await;

        let event = AuditEvent::new(
            decision.kind.as_str(),
            &self.settings.source_system,
            decision.target_system(),
            endpoint,
            payload,
        );

        let outcome = match result {
            Ok(body) => {
                let event = event
                    .succeeded(body.clone())
                    .with_duration_ms(elapsed_ms(started));
                self.emit(event).await;
                record_outcome("success", decision.kind.as_str(), Some(started));
                Ok(DispatchResponse::success(&decision, body))
            }
            Err(call_err) => {
                let err = DispatchError::from_call(&destination, call_err);
                let event = event
                    .failed(err.status_code(), err.to_string())
                    .with_duration_ms(elapsed_ms(started));
                self.emit(event).await;
                record_outcome(err.kind(), decision.kind.as_str(), Some(started));
                Err(err)
            }
        };

        if let Err(err) = &outcome {
            warn!(error = %err, destination = %destination, "Transaction failed");
        }
        outcome
    }

    /// Best-effort audit write bounded by the sink timeout.
    async fn emit(&self, event: AuditEvent) {
        let written =
            tokio::time::timeout(self.settings.audit_timeout, self.audit.record(&event)).await;
        let failure = match written {
            Ok(Ok(())) => {
                debug!(audit_id = %event.id, "Audit event recorded");
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => AuditError::Timeout(
                u64::try_from(self.settings.audit_timeout.as_millis()).unwrap_or(u64::MAX),
            ),
        };
        warn!(audit_id = %event.id, error = %failure, "Failed to record audit event");
        metrics::counter!("gateway_audit_failures_total").increment(1);
    }

    /// Health of the audit sink plus every destination circuit.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let audit_sink = match self.audit.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "Audit sink health check failed");
                HealthStatus::Unhealthy
            }
        };

        let registry = self.routing.registry();
        let breaker = self.breaker();

        let mut circuits = BTreeMap::new();
        circuits.insert(
            CORE_BANK_DESTINATION.to_string(),
            breaker.state(CORE_BANK_DESTINATION),
        );
        let mut banks = BTreeMap::new();
        for bank in registry.banks() {
            let key = external_destination(&bank.code);
            let state = breaker.state(&key);
            circuits.insert(key, state);
            banks.insert(
                bank.code.clone(),
                BankSummary {
                    enabled: bank.enabled,
                    url: bank.base_url.clone(),
                },
            );
        }

        HealthResponse::new(
            audit_sink,
            registry.internal().base_url.clone(),
            self.settings.rate_limit,
            circuits,
            banks,
        )
    }

    pub async fn stats(&self, hours: i64) -> Result<TransactionStats, AuditError> {
        self.audit.stats(hours).await
    }

    #[must_use]
    pub fn circuit_state(&self, destination: &str) -> CircuitState {
        self.breaker().state(destination)
    }

    #[must_use]
    pub fn circuit_snapshot(&self, destination: &str) -> CircuitSnapshot {
        self.breaker().snapshot(destination)
    }

    pub fn reset_circuit(&self, destination: &str) -> CircuitSnapshot {
        self.breaker().reset(destination);
        self.breaker().snapshot(destination)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn record_outcome(outcome: &'static str, route: &'static str, started: Option<Instant>) {
    metrics::counter!("gateway_dispatch_total", "outcome" => outcome, "route" => route)
        .increment(1);
    if let Some(started) = started {
        metrics::histogram!("gateway_dispatch_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::CircuitBreakerConfig;
    use crate::app::routing::BankRegistry;
    use crate::domain::{BankProfile, CallError, InternalLedger, PrefixRoute};
    use crate::test_utils::{MockAuditSink, MockBankTransport};
    use rust_decimal_macros::dec;
    use secrecy::ExposeSecret;
    use serde_json::json;

    struct Harness {
        service: GatewayService,
        transport: Arc<MockBankTransport>,
        sink: Arc<MockAuditSink>,
    }

    fn registry() -> BankRegistry {
        let ledger = InternalLedger {
            bank_code: "MINIBANK".to_string(),
            base_url: "http://core.local".to_string(),
            account_prefix: "101".to_string(),
            timeout_ms: 1_000,
        };
        let banks = vec![
            BankProfile::new("MINIBANK_A", "http://a.local", "key-a").with_timeout_ms(500),
            BankProfile::new("MINIBANK_B", "http://b.local", "key-b").with_enabled(false),
        ];
        let routes = vec![
            PrefixRoute::new("5678", "MINIBANK_A"),
            PrefixRoute::new("9012", "MINIBANK_B"),
        ];
        BankRegistry::new(ledger, banks, routes).unwrap()
    }

    fn harness_with(transport: MockBankTransport, sink: MockAuditSink) -> Harness {
        let transport = Arc::new(transport);
        let sink = Arc::new(sink);
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..CircuitBreakerConfig::default()
        }));
        let service = GatewayService::new(
            RoutingEngine::new(Arc::new(registry())),
            ResilientCaller::new(breaker, transport.clone()),
            sink.clone(),
            GatewaySettings {
                audit_timeout: Duration::from_millis(100),
                ..GatewaySettings::default()
            },
        );
        Harness {
            service,
            transport,
            sink,
        }
    }

    fn harness() -> Harness {
        harness_with(MockBankTransport::new(), MockAuditSink::new())
    }

    fn tx(target: &str) -> TransactionRequest {
        TransactionRequest::new("1010000001", target, dec!(50000)).with_description("rent")
    }

    #[tokio::test]
    async fn test_internal_dispatch_success() {
        let h = harness();

        let response = h.service.dispatch(tx("1010009999")).await.unwrap();

        assert_eq!(response.status, "success");
        assert_eq!(response.transaction_type, RouteKind::Internal);
        assert_eq!(response.bank_code.as_deref(), Some("MINIBANK"));
        assert_eq!(response.data, json!({"status": "success"}));

        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transaction_type, "internal");
        assert_eq!(events[0].status_code, 200);
        assert_eq!(events[0].target_system, "core_bank");
        assert_eq!(
            events[0].endpoint,
            "http://core.local/api/v1/transactions/internal"
        );

        let sent = h.transport.requests();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].credential.is_none());
        assert_eq!(sent[0].payload["target_account"], "1010009999");
    }

    #[tokio::test]
    async fn test_external_dispatch_sends_envelope_and_credential() {
        let h = harness();

        let response = h.service.dispatch(tx("5678001234")).await.unwrap();
        assert_eq!(response.transaction_type, RouteKind::External);
        assert_eq!(response.bank_code.as_deref(), Some("MINIBANK_A"));

        let sent = h.transport.requests();
        assert_eq!(
            sent[0].endpoint,
            "http://a.local/api/v1/transactions/receive"
        );
        assert_eq!(
            sent[0].credential.as_ref().map(|c| c.expose_secret().to_string()),
            Some("key-a".to_string())
        );
        assert_eq!(sent[0].payload["sender_bank"], "MINIBANK");
        assert_eq!(sent[0].payload["receiver_account"], "5678001234");
        assert!(sent[0].payload["reference_id"]
            .as_str()
            .unwrap()
            .starts_with("TRX"));

        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transaction_type, "external");
        assert_eq!(events[0].target_system, "MINIBANK_A");
    }

    #[tokio::test]
    async fn test_external_with_open_breaker_skips_call_and_audits() {
        let h = harness_with(
            MockBankTransport::failing(CallError::Connect("refused".to_string())),
            MockAuditSink::new(),
        );
        for _ in 0..2 {
            let _ = h.service.dispatch(tx("5678001234")).await;
        }
        let calls_before = h.transport.call_count();
        let events_before = h.sink.events().len();

        let err = h.service.dispatch(tx("5678001234")).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::CircuitOpen { ref destination } if destination == "external_bank_MINIBANK_A"
        ));
        assert_eq!(h.transport.call_count(), calls_before);
        let events = h.sink.events();
        assert_eq!(events.len(), events_before + 1);
        let last = events.last().unwrap();
        assert_eq!(last.status_code, 503);
        assert!(last.error_message.as_ref().unwrap().contains("OPEN"));
    }

    #[tokio::test]
    async fn test_unknown_destination_is_audited_without_call() {
        let h = harness();

        let err = h.service.dispatch(tx("4444001234")).await.unwrap_err();

        assert!(matches!(err, DispatchError::UnknownDestination { .. }));
        assert_eq!(h.transport.call_count(), 0);
        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transaction_type, "unknown");
        assert_eq!(events[0].status_code, 422);
    }

    #[tokio::test]
    async fn test_disabled_bank_is_unknown() {
        let h = harness();
        let err = h.service.dispatch(tx("9012001234")).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownDestination { .. }));
        assert_eq!(h.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_is_not_audited() {
        let h = harness();
        let request = TransactionRequest::new("1010000001", "1010009999", dec!(5));

        let err = h.service.dispatch(request).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Validation(ValidationError::AmountTooSmall { .. })
        ));
        assert_eq!(h.transport.call_count(), 0);
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_downstream_error_is_audited_with_status() {
        let h = harness_with(
            MockBankTransport::failing(CallError::Downstream {
                status: 500,
                message: "ledger offline".to_string(),
            }),
            MockAuditSink::new(),
        );

        let err = h.service.dispatch(tx("1010009999")).await.unwrap_err();

        assert!(matches!(err, DispatchError::Downstream { status: 500, .. }));
        assert_eq!(err.status_code(), 502);
        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status_code, 502);
        assert!(events[0].response_payload.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_timeout_error() {
        let h = harness_with(
            MockBankTransport::new().with_latency(Duration::from_secs(10)),
            MockAuditSink::new(),
        );

        let err = h.service.dispatch(tx("5678001234")).await.unwrap_err();

        assert!(matches!(err, DispatchError::Timeout { timeout_ms: 500, .. }));
        assert_eq!(h.sink.events()[0].status_code, 504);
    }

    #[tokio::test]
    async fn test_failing_audit_sink_does_not_change_outcome() {
        let h = harness_with(MockBankTransport::new(), MockAuditSink::failing());
        assert!(h.service.dispatch(tx("1010009999")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_audit_sink_is_bounded() {
        let h = harness_with(MockBankTransport::new(), MockAuditSink::hanging());
        assert!(h.service.dispatch(tx("1010009999")).await.is_ok());
    }

    #[test]
    fn test_request_deadline_exceeds_every_call_and_audit() {
        let h = harness();
        // Longest bank deadline is MINIBANK_B's default 15 s; audit timeout 100 ms.
        assert_eq!(
            h.service.request_deadline(),
            Duration::from_millis(15_000 + 100) + REQUEST_DEADLINE_SLACK
        );
    }

    #[tokio::test]
    async fn test_health_lists_every_circuit() {
        let h = harness();
        let health = h.service.health_check().await;

        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.core_url, "http://core.local");
        let keys: Vec<&String> = health.circuit_breakers.keys().collect();
        assert_eq!(
            keys,
            vec![
                "core_bank",
                "external_bank_MINIBANK_A",
                "external_bank_MINIBANK_B"
            ]
        );
        assert!(!health.external_banks["MINIBANK_B"].enabled);
    }

    #[tokio::test]
    async fn test_health_degraded_when_circuit_open() {
        let h = harness_with(
            MockBankTransport::failing(CallError::Connect("refused".to_string())),
            MockAuditSink::new(),
        );
        for _ in 0..2 {
            let _ = h.service.dispatch(tx("1010009999")).await;
        }

        let health = h.service.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.circuit_breakers["core_bank"], CircuitState::Open);
    }

    #[tokio::test]
    async fn test_health_unhealthy_when_sink_down() {
        let h = harness();
        h.sink.set_healthy(false);
        let health = h.service.health_check().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_reset_circuit() {
        let h = harness_with(
            MockBankTransport::failing(CallError::Connect("refused".to_string())),
            MockAuditSink::new(),
        );
        for _ in 0..2 {
            let _ = h.service.dispatch(tx("1010009999")).await;
        }
        assert_eq!(h.service.circuit_state("core_bank"), CircuitState::Open);

        let snapshot = h.service.reset_circuit("core_bank");
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
    }
}
