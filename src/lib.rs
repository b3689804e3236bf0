//! Bank Transaction Gateway
//!
//! Routes money transfers to the institution's core ledger or to partner
//! banks, isolating each destination behind a circuit breaker and leaving
//! an audit trail of every attempt.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   API Layer                  │
//! │   HTTP handlers, rate limiting, auth         │
//! ├─────────────────────────────────────────────┤
//! │               Application Layer              │
//! │  Routing, circuit breaker, dispatcher, config│
//! ├─────────────────────────────────────────────┤
//! │                 Domain Layer                 │
//! │          Traits, types, errors               │
//! ├─────────────────────────────────────────────┤
//! │             Infrastructure Layer             │
//! │  HTTP bank transport, audit sinks, telemetry │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Request flow: rate limiter → authentication → routing engine →
//! resilient caller (timeout + circuit breaker) → audit sink → response.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bank_transaction_gateway::api::create_router;
//! use bank_transaction_gateway::app::{AppState, GatewayConfig, GatewayService};
//! use bank_transaction_gateway::infra::{HttpBankTransport, TracingAuditSink};
//!
//! let config = GatewayConfig::from_env()?;
//! let service = GatewayService::from_config(
//!     &config,
//!     Arc::new(HttpBankTransport::with_defaults()?),
//!     Arc::new(TracingAuditSink::new()),
//! )?;
//! let state = AppState::new(Arc::new(service), &config.rate_limit, config.secret_key.clone());
//! let router = create_router(Arc::new(state));
//! ```

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

pub mod test_utils;
