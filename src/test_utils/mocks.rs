//! Mock implementations for testing.
//!
//! In-memory implementations of the domain traits that can be scripted to
//! simulate healthy backends, failing backends and slow backends.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::{
    AuditError, AuditEvent, AuditSink, BankTransport, CallError, DatabaseError, OutboundRequest,
    TransactionStats,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scriptable bank transport.
///
/// Queued outcomes are consumed first, one per call; afterwards every call
/// returns the default outcome.
///
/// # Example
///
/// ```
/// use bank_transaction_gateway::domain::CallError;
/// use bank_transaction_gateway::test_utils::MockBankTransport;
/// use serde_json::json;
///
/// let transport = MockBankTransport::responding(json!({"status": "ok"}));
/// transport.push_outcome(Err(CallError::Connect("refused".to_string())));
/// assert_eq!(transport.call_count(), 0);
/// ```
pub struct MockBankTransport {
    default: Result<Value, CallError>,
    queue: Mutex<VecDeque<Result<Value, CallError>>>,
    requests: Mutex<Vec<OutboundRequest>>,
    latency: Option<Duration>,
    call_count: AtomicU64,
}

impl MockBankTransport {
    /// Answers every call with `{"status": "success"}`.
    #[must_use]
    pub fn new() -> Self {
        Self::responding(json!({"status": "success"}))
    }

    #[must_use]
    pub fn responding(body: Value) -> Self {
        Self::with_default(Ok(body))
    }

    #[must_use]
    pub fn failing(error: CallError) -> Self {
        Self::with_default(Err(error))
    }

    fn with_default(default: Result<Value, CallError>) -> Self {
        Self {
            default,
            queue: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            latency: None,
            call_count: AtomicU64::new(0),
        }
    }

    /// Delays every answer.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_outcome(&self, outcome: Result<Value, CallError>) {
        lock(&self.queue).push_back(outcome);
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<OutboundRequest> {
        lock(&self.requests).clone()
    }
}

impl Default for MockBankTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BankTransport for MockBankTransport {
    async fn post_json(&self, request: &OutboundRequest) -> Result<Value, CallError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let queued = lock(&self.queue).pop_front();
        queued.unwrap_or_else(|| self.default.clone())
    }
}

/// How [`MockAuditSink::record`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkMode {
    #[default]
    Recording,
    /// Every write fails immediately.
    Failing,
    /// Every write blocks until cancelled.
    Hanging,
}

/// Audit sink that keeps every event in memory.
pub struct MockAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    mode: SinkMode,
    is_healthy: AtomicBool,
    stats: Mutex<Option<TransactionStats>>,
}

impl MockAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(SinkMode::Recording)
    }

    #[must_use]
    pub fn failing() -> Self {
        Self::with_mode(SinkMode::Failing)
    }

    #[must_use]
    pub fn hanging() -> Self {
        Self::with_mode(SinkMode::Hanging)
    }

    #[must_use]
    pub fn with_mode(mode: SinkMode) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            mode,
            is_healthy: AtomicBool::new(true),
            stats: Mutex::new(None),
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        lock(&self.events).clone()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Makes [`AuditSink::stats`] return `stats` instead of the default error.
    pub fn set_stats(&self, stats: TransactionStats) {
        *lock(&self.stats) = Some(stats);
    }
}

impl Default for MockAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MockAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        match self.mode {
            SinkMode::Recording => {
                lock(&self.events).push(event.clone());
                Ok(())
            }
            SinkMode::Failing => Err(AuditError::Database(DatabaseError::Connection(
                "Mock audit sink unavailable".to_string(),
            ))),
            SinkMode::Hanging => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn health_check(&self) -> Result<(), AuditError> {
        if self.is_healthy.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(AuditError::Database(DatabaseError::Connection(
                "Mock audit sink unhealthy".to_string(),
            )))
        }
    }

    async fn stats(&self, _hours: i64) -> Result<TransactionStats, AuditError> {
        lock(&self.stats).clone().ok_or_else(|| {
            AuditError::NotSupported("stats not configured on mock".to_string())
        })
    }
}
