//! Test utilities and mock implementations.
//!
//! Reusable mocks of the domain traits for unit and integration tests.

pub mod mocks;

pub use mocks::{MockAuditSink, MockBankTransport, SinkMode};
