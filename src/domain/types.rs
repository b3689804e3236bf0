use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use super::error::ValidationError;

/// Circuit-breaker key of the internal core ledger.
pub const CORE_BANK_DESTINATION: &str = "core_bank";

/// Default currency when a request omits one.
pub const DEFAULT_CURRENCY: &str = "IDR";

/// Circuit-breaker key of an external partner bank.
#[must_use]
pub fn external_destination(bank_code: &str) -> String {
    format!("external_bank_{}", bank_code)
}

/// Static registry entry for an external partner bank.
///
/// The API key is wrapped in [`SecretString`] so neither `Debug` output nor
/// structured logs ever carry it in plaintext.
#[derive(Debug, Clone)]
pub struct BankProfile {
    pub code: String,
    pub base_url: String,
    pub api_key: SecretString,
    pub enabled: bool,
    pub timeout_ms: u64,
}

impl BankProfile {
    pub fn new(code: impl Into<String>, base_url: impl Into<String>, api_key: &str) -> Self {
        Self {
            code: code.into(),
            base_url: base_url.into(),
            api_key: SecretString::from(api_key),
            enabled: true,
            timeout_ms: 15_000,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Endpoint that accepts transfers from other banks.
    #[must_use]
    pub fn receive_endpoint(&self) -> String {
        format!(
            "{}/api/v1/transactions/receive",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// The gateway's own core ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalLedger {
    pub bank_code: String,
    pub base_url: String,
    pub account_prefix: String,
    pub timeout_ms: u64,
}

impl InternalLedger {
    #[must_use]
    pub fn transfer_endpoint(&self) -> String {
        format!(
            "{}/api/v1/transactions/internal",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// Maps an account-number prefix onto an external bank code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixRoute {
    pub prefix: String,
    pub bank_code: String,
}

impl PrefixRoute {
    pub fn new(prefix: impl Into<String>, bank_code: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            bank_code: bank_code.into(),
        }
    }
}

/// A transfer request after it has been stamped by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRequest {
    pub source_account: String,
    pub target_account: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRequest {
    pub fn new(
        source_account: impl Into<String>,
        target_account: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        let timestamp = Utc::now();
        Self {
            source_account: source_account.into(),
            target_account: target_account.into(),
            amount,
            currency: DEFAULT_CURRENCY.to_string(),
            description: None,
            transaction_id: format!("TRX{}", timestamp.timestamp_millis()),
            timestamp,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Checks the amount against the configured bounds and the currency shape.
    pub fn validate_bounds(&self, min: Decimal, max: Decimal) -> Result<(), ValidationError> {
        if self.amount <= Decimal::ZERO {
            return Err(ValidationError::InvalidField {
                field: "amount".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.amount < min {
            return Err(ValidationError::AmountTooSmall {
                min: min.to_string(),
            });
        }
        if self.amount > max {
            return Err(ValidationError::AmountTooLarge {
                max: max.to_string(),
            });
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidField {
                field: "currency".to_string(),
                message: "must be a 3-letter code".to_string(),
            });
        }
        Ok(())
    }

    /// Body forwarded to the core ledger, which speaks the gateway's own format.
    pub fn internal_payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Body forwarded to a partner bank.
    pub fn external_payload(&self, sender_bank: &str) -> Result<Value, serde_json::Error> {
        serde_json::to_value(ExternalTransferPayload {
            sender_bank,
            sender_account: &self.source_account,
            receiver_account: &self.target_account,
            amount: self.amount,
            currency: &self.currency,
            description: self.description.as_deref(),
            reference_id: &self.transaction_id,
            timestamp: self.timestamp,
        })
    }
}

#[derive(Serialize)]
struct ExternalTransferPayload<'a> {
    sender_bank: &'a str,
    sender_account: &'a str,
    receiver_account: &'a str,
    amount: Decimal,
    currency: &'a str,
    description: Option<&'a str>,
    reference_id: &'a str,
    timestamp: DateTime<Utc>,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

/// Request body accepted by the transaction endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTransactionRequest {
    #[validate(length(min = 10, max = 30, message = "must be 10-30 characters"))]
    pub source_account: String,

    #[validate(length(min = 10, max = 30, message = "must be 10-30 characters"))]
    pub target_account: String,

    pub amount: Decimal,

    #[validate(length(max = 255, message = "must be at most 255 characters"))]
    pub description: Option<String>,

    #[serde(default = "default_currency")]
    #[validate(length(equal = 3, message = "must be a 3-letter code"))]
    pub currency: String,
}

impl CreateTransactionRequest {
    pub fn new(
        source_account: impl Into<String>,
        target_account: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            source_account: source_account.into(),
            target_account: target_account.into(),
            amount,
            description: None,
            currency: default_currency(),
        }
    }

    /// Stamps the request with a transaction id and timestamp.
    #[must_use]
    pub fn into_transaction(self) -> TransactionRequest {
        let mut tx = TransactionRequest::new(self.source_account, self.target_account, self.amount)
            .with_currency(self.currency);
        tx.description = self.description;
        tx
    }
}

/// Classification produced by the routing engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    Internal,
    External,
    Unknown,
}

impl RouteKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::Internal => "internal",
            RouteKind::External => "external",
            RouteKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RouteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a transaction should go. Derived per request, never persisted.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub kind: RouteKind,
    pub bank_code: Option<String>,
    pub target_url: Option<String>,
    pub requires_external_call: bool,
    pub timeout_ms: Option<u64>,
    pub credential: Option<SecretString>,
}

impl RoutingDecision {
    pub fn internal(ledger: &InternalLedger) -> Self {
        Self {
            kind: RouteKind::Internal,
            bank_code: Some(ledger.bank_code.clone()),
            target_url: Some(ledger.transfer_endpoint()),
            requires_external_call: false,
            timeout_ms: Some(ledger.timeout_ms),
            credential: None,
        }
    }

    pub fn external(profile: &BankProfile) -> Self {
        Self {
            kind: RouteKind::External,
            bank_code: Some(profile.code.clone()),
            target_url: Some(profile.receive_endpoint()),
            requires_external_call: true,
            timeout_ms: Some(profile.timeout_ms),
            credential: Some(profile.api_key.clone()),
        }
    }

    pub fn unknown() -> Self {
        Self {
            kind: RouteKind::Unknown,
            bank_code: None,
            target_url: None,
            requires_external_call: false,
            timeout_ms: None,
            credential: None,
        }
    }

    /// Circuit-breaker key for this decision; `None` when unroutable.
    #[must_use]
    pub fn destination_key(&self) -> Option<String> {
        match (self.kind, self.bank_code.as_deref()) {
            (RouteKind::Internal, _) => Some(CORE_BANK_DESTINATION.to_string()),
            (RouteKind::External, Some(code)) => Some(external_destination(code)),
            _ => None,
        }
    }

    /// Name of the downstream system recorded in the audit trail.
    #[must_use]
    pub fn target_system(&self) -> String {
        match self.kind {
            RouteKind::Internal => CORE_BANK_DESTINATION.to_string(),
            RouteKind::External => self
                .bank_code
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            RouteKind::Unknown => "unknown".to_string(),
        }
    }
}

/// Circuit-breaker state of one destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a circuit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub destination: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// One audit-trail entry per transaction attempt. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub id: uuid::Uuid,
    pub transaction_type: String,
    pub source_system: String,
    pub target_system: String,
    pub endpoint: String,
    pub request_payload: Value,
    pub response_payload: Option<Value>,
    pub status_code: u16,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        transaction_type: impl Into<String>,
        source_system: impl Into<String>,
        target_system: impl Into<String>,
        endpoint: impl Into<String>,
        request_payload: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            transaction_type: transaction_type.into(),
            source_system: source_system.into(),
            target_system: target_system.into(),
            endpoint: endpoint.into(),
            request_payload,
            response_payload: None,
            status_code: 0,
            duration_ms: 0,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn succeeded(mut self, response: Value) -> Self {
        self.response_payload = Some(response);
        self.status_code = 200;
        self
    }

    pub fn failed(mut self, status_code: u16, error_message: impl Into<String>) -> Self {
        self.status_code = status_code;
        self.error_message = Some(error_message.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Successful dispatch result returned to request handlers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchResponse {
    pub status: String,
    pub transaction_type: RouteKind,
    pub bank_code: Option<String>,
    pub data: Value,
}

impl DispatchResponse {
    pub fn success(decision: &RoutingDecision, data: Value) -> Self {
        Self {
            status: "success".to_string(),
            transaction_type: decision.kind,
            bank_code: decision.bank_code.clone(),
            data,
        }
    }
}

/// Aggregated audit statistics over a trailing period.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransactionStats {
    pub total_transactions: i64,
    pub internal_count: i64,
    pub external_count: i64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

/// Health check status for services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Public view of a configured partner bank.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BankSummary {
    pub enabled: bool,
    pub url: String,
}

/// Health check response for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub audit_sink: HealthStatus,
    pub core_url: String,
    pub rate_limit: u32,
    pub circuit_breakers: BTreeMap<String, CircuitState>,
    pub external_banks: BTreeMap<String, BankSummary>,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    /// Overall status: unhealthy when the audit sink is down, degraded when any
    /// destination circuit is not closed.
    pub fn new(
        audit_sink: HealthStatus,
        core_url: String,
        rate_limit: u32,
        circuit_breakers: BTreeMap<String, CircuitState>,
        external_banks: BTreeMap<String, BankSummary>,
    ) -> Self {
        let any_tripped = circuit_breakers
            .values()
            .any(|state| *state != CircuitState::Closed);
        let status = match (&audit_sink, any_tripped) {
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            (HealthStatus::Healthy, false) => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        };

        Self {
            status,
            audit_sink,
            core_url,
            rate_limit,
            circuit_breakers,
            external_banks,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub r#type: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Body returned when a dispatch fails after validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchErrorResponse {
    pub status: String,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResponse {
    pub error: ErrorDetail,
    pub retry_after: u64,
}
