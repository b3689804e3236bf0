//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;

use super::error::{AuditError, CallError};
use super::types::{AuditEvent, TransactionStats};

/// A single JSON POST to a bank backend.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub endpoint: String,
    pub payload: Value,
    /// Sent as `X-API-Key` when present.
    pub credential: Option<SecretString>,
}

impl OutboundRequest {
    pub fn new(endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            payload,
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Option<SecretString>) -> Self {
        self.credential = credential;
        self
    }
}

/// Network transport to bank backends.
///
/// Implementations report failures through [`CallError`] so that timeouts,
/// refused connections and non-2xx answers stay distinguishable.
#[async_trait]
pub trait BankTransport: Send + Sync {
    /// POST the payload and return the decoded JSON body of a 2xx response.
    async fn post_json(&self, request: &OutboundRequest) -> Result<Value, CallError>;
}

/// Sink for the audit trail.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one event. Best-effort; callers bound it with a timeout.
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;

    /// Check sink connectivity
    async fn health_check(&self) -> Result<(), AuditError> {
        Ok(())
    }

    /// Aggregate statistics over the trailing `hours`.
    async fn stats(&self, hours: i64) -> Result<TransactionStats, AuditError> {
        let _ = hours;
        Err(AuditError::NotSupported(
            "stats not available for this audit sink".to_string(),
        ))
    }
}
