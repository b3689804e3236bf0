//! Audit sink that writes events to the structured log.
//!
//! Used when no database is configured.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{AuditError, AuditEvent, AuditSink};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let payload = serde_json::to_string(&event.request_payload)?;
        if event.error_message.is_some() {
            warn!(
                target: "audit",
                audit_id = %event.id,
                transaction_type = %event.transaction_type,
                source_system = %event.source_system,
                target_system = %event.target_system,
                endpoint = %event.endpoint,
                status_code = event.status_code,
                duration_ms = event.duration_ms,
                error = event.error_message.as_deref().unwrap_or_default(),
                request = %payload,
                "Transaction failed"
            );
        } else {
            info!(
                target: "audit",
                audit_id = %event.id,
                transaction_type = %event.transaction_type,
                source_system = %event.source_system,
                target_system = %event.target_system,
                endpoint = %event.endpoint,
                status_code = event.status_code,
                duration_ms = event.duration_ms,
                request = %payload,
                "Transaction completed"
            );
        }
        Ok(())
    }
}
