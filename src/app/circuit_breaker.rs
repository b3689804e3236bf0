//! Per-destination circuit breaker.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: destination assumed down, calls fail fast
//! - HalfOpen: probing whether the destination recovered
//!
//! # State Transitions
//! ```text
//! Closed   → Open:     failure_count >= failure_threshold
//! Open     → HalfOpen: first call after the cooldown elapsed
//! HalfOpen → Closed:   success_count >= close_threshold
//! HalfOpen → Open:     any probe failure
//! ```
//!
//! Records live in a `DashMap`, so each transition is atomic per destination
//! key and no lock is held while the guarded operation runs. Concurrent
//! HalfOpen probes are allowed to race.

use std::future::Future;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{CircuitError, CircuitSnapshot, CircuitState};

use super::config::CircuitBreakerConfig;

#[derive(Debug, Clone)]
struct CircuitRecord {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
}

impl Default for CircuitRecord {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_failure_time: None,
        }
    }
}

impl CircuitRecord {
    fn snapshot(&self, destination: &str) -> CircuitSnapshot {
        CircuitSnapshot {
            destination: destination.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_at: self.last_failure_time,
        }
    }

    fn mark_failure(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);
        self.last_failure_time = Some(Utc::now());
    }
}

/// Failure-isolation state machine keyed by destination.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: DashMap<String, CircuitRecord>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Runs `operation` under the breaker of `destination`.
    ///
    /// # Errors
    ///
    /// - [`CircuitError::Open`] when the circuit rejects the call. The
    ///   operation is not invoked and nothing is counted.
    /// - [`CircuitError::Operation`] with the operation's own error, after it
    ///   has been counted as a failure.
    pub async fn execute<T, E, F, Fut>(
        &self,
        destination: &str,
        operation: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire(destination, Instant::now()) {
            debug!(destination = %destination, "Call rejected by open circuit");
            return Err(CircuitError::Open(destination.to_string()));
        }

        match operation().await {
            Ok(value) => {
                self.record_success(destination);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(destination, Instant::now());
                Err(CircuitError::Operation(err))
            }
        }
    }

    /// Decides whether a call may proceed, moving Open → HalfOpen once the
    /// cooldown has elapsed.
    fn try_acquire(&self, destination: &str, now: Instant) -> bool {
        let mut record = self.circuits.entry(destination.to_string()).or_default();
        match record.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = record
                    .last_failure_at
                    .is_none_or(|at| now.duration_since(at) > self.config.cooldown);
                if cooled_down {
                    record.state = CircuitState::HalfOpen;
                    record.success_count = 0;
                    drop(record);
                    self.on_transition(destination, CircuitState::HalfOpen);
                }
                cooled_down
            }
        }
    }

    fn record_success(&self, destination: &str) {
        let mut record = self.circuits.entry(destination.to_string()).or_default();
        match record.state {
            CircuitState::Closed => record.failure_count = 0,
            CircuitState::HalfOpen => {
                record.success_count = record.success_count.saturating_add(1);
                if record.success_count >= self.config.close_threshold {
                    record.state = CircuitState::Closed;
                    record.failure_count = 0;
                    record.success_count = 0;
                    drop(record);
                    self.on_transition(destination, CircuitState::Closed);
                }
            }
            // A racing probe already reopened the circuit.
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, destination: &str, now: Instant) {
        let mut record = self.circuits.entry(destination.to_string()).or_default();
        record.mark_failure(now);
        let reopen = match record.state {
            CircuitState::Closed => record.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if reopen {
            record.state = CircuitState::Open;
            record.success_count = 0;
            let failures = record.failure_count;
            drop(record);
            warn!(
                destination = %destination,
                failures = failures,
                "Circuit breaker opened"
            );
            self.on_transition(destination, CircuitState::Open);
        }
    }

    fn on_transition(&self, destination: &str, to: CircuitState) {
        if to != CircuitState::Open {
            info!(destination = %destination, state = %to, "Circuit breaker transition");
        }
        metrics::counter!(
            "gateway_circuit_transitions_total",
            "destination" => destination.to_string(),
            "to" => to.as_str()
        )
        .increment(1);
    }

    /// Current state of `destination`; unseen destinations read as Closed.
    pub fn state(&self, destination: &str) -> CircuitState {
        self.circuits
            .get(destination)
            .map_or(CircuitState::Closed, |record| record.state)
    }

    /// Full record of `destination`. Reading never creates a record.
    pub fn snapshot(&self, destination: &str) -> CircuitSnapshot {
        match self.circuits.get(destination) {
            Some(record) => record.snapshot(destination),
            None => CircuitRecord::default().snapshot(destination),
        }
    }

    /// Records of every destination seen so far, sorted by key.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<CircuitSnapshot> = self
            .circuits
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        all.sort_by(|a, b| a.destination.cmp(&b.destination));
        all
    }

    /// Forces `destination` back to a pristine Closed record.
    pub fn reset(&self, destination: &str) {
        // Unseen destinations are already pristine.
        if let Some(mut record) = self.circuits.get_mut(destination) {
            *record = CircuitRecord::default();
        }
        info!(destination = %destination, "Circuit breaker reset");
    }
}
