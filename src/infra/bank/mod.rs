//! Outbound transport to the core ledger and partner banks.

pub mod http;

pub use http::{HttpBankTransport, HttpTransportConfig};
