//! Application layer: configuration, resilience primitives, routing and the
//! transaction dispatcher.

pub mod circuit_breaker;
pub mod config;
pub mod rate_limiter;
pub mod resilient;
pub mod routing;
pub mod service;
pub mod state;

pub use circuit_breaker::CircuitBreaker;
pub use config::{CircuitBreakerConfig, GatewayConfig, RateLimitConfig};
pub use rate_limiter::{Admission, SlidingWindowLimiter};
pub use resilient::ResilientCaller;
pub use routing::{BankRegistry, RoutingEngine};
pub use service::{GatewayService, GatewaySettings};
pub use state::{AppState, HealthLimiter};
