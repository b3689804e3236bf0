//! Domain layer containing core gateway types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, AuditError, CallError, CircuitError, ConfigError, DatabaseError, DispatchError,
    ValidationError,
};
pub use traits::{AuditSink, BankTransport, OutboundRequest};
pub use types::{
    AuditEvent, BankProfile, BankSummary, CORE_BANK_DESTINATION, CircuitSnapshot, CircuitState,
    CreateTransactionRequest, DEFAULT_CURRENCY, DispatchErrorResponse, DispatchResponse,
    ErrorDetail, ErrorResponse, HealthResponse, HealthStatus, InternalLedger, PrefixRoute,
    RateLimitResponse, RouteKind, RoutingDecision, TransactionRequest, TransactionStats,
    external_destination,
};
