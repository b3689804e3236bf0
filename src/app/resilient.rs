//! Outbound calls guarded by a per-call timeout and the destination's
//! circuit breaker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::domain::{BankTransport, CallError, CircuitError, OutboundRequest};

use super::circuit_breaker::CircuitBreaker;

pub struct ResilientCaller {
    breaker: Arc<CircuitBreaker>,
    transport: Arc<dyn BankTransport>,
}

impl ResilientCaller {
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker>, transport: Arc<dyn BankTransport>) -> Self {
        Self { breaker, transport }
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// POSTs `request` to `destination` with a hard deadline.
    ///
    /// Timeouts, connection failures and non-2xx answers all count as one
    /// failure toward the breaker. A rejected call never reaches the
    /// transport.
    #[instrument(skip(self, request), fields(endpoint = %request.endpoint))]
    pub async fn call(
        &self,
        destination: &str,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> Result<Value, CircuitError<CallError>> {
        let result = self
            .breaker
            .execute(destination, || async {
                match tokio::time::timeout(timeout, self.transport.post_json(request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(CallError::Timeout {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }),
                }
            })
            .await;

        match &result {
            Ok(_) => debug!("Downstream call succeeded"),
            Err(CircuitError::Open(_)) => warn!("Downstream call short-circuited"),
            Err(CircuitError::Operation(e)) => warn!(error = %e, "Downstream call failed"),
        }
        result
    }
}
