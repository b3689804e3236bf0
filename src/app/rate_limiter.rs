//! Per-client sliding-window rate limiter for the transaction endpoints.
//!
//! Each client keeps the instants of its admitted requests. A request is
//! admitted when fewer than `capacity` of them fall inside the trailing
//! window; rejected requests are not recorded.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::config::RateLimitConfig;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { remaining: u32 },
    Rejected { retry_after: Duration },
}

impl Admission {
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

pub struct SlidingWindowLimiter {
    capacity: u32,
    window: Duration,
    // Idle clients are never evicted.
    clients: DashMap<String, VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            clients: DashMap::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_window, config.window)
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn admit(&self, client: &str) -> Admission {
        self.admit_at(client, Instant::now())
    }

    /// Check-and-record is atomic per client.
    pub fn admit_at(&self, client: &str, now: Instant) -> Admission {
        let mut history = self.clients.entry(client.to_string()).or_default();
        self.prune(&mut history, now);

        let used = u32::try_from(history.len()).unwrap_or(u32::MAX);
        if used >= self.capacity {
            return Admission::Rejected {
                retry_after: self.retry_after(&history, now),
            };
        }

        history.push_back(now);
        Admission::Admitted {
            remaining: self.capacity - used - 1,
        }
    }

    /// Admitted requests of `client` still inside the window.
    pub fn in_window(&self, client: &str) -> usize {
        let now = Instant::now();
        self.clients
            .get(client)
            .map(|history| {
                history
                    .iter()
                    .filter(|&&at| now.duration_since(at) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }

    fn prune(&self, history: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = history.front() {
            if now.duration_since(oldest) < self.window {
                break;
            }
            history.pop_front();
        }
    }

    /// Time until the oldest recorded request leaves the window.
    fn retry_after(&self, history: &VecDeque<Instant>, now: Instant) -> Duration {
        history
            .front()
            .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
            .unwrap_or(self.window)
    }
}
