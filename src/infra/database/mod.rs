//! Persistent audit sinks.

pub mod postgres;

pub use postgres::{PostgresAuditSink, PostgresConfig};
