//! Infrastructure layer implementations.

pub mod audit;
pub mod bank;
pub mod database;
pub mod observability;

pub use audit::TracingAuditSink;
pub use bank::{HttpBankTransport, HttpTransportConfig};
pub use database::{PostgresAuditSink, PostgresConfig};
pub use observability::{LogFormat, init_metrics, init_tracing};
