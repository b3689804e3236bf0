//! Gateway error types with proper error chaining.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Query execution failed: {0}")]
    Query(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),
    #[error("Migration failed: {0}")]
    Migration(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
    #[error("Amount must be at least {min}")]
    AmountTooSmall { min: String },
    #[error("Amount cannot exceed {max}")]
    AmountTooLarge { max: String },
    #[error("Validation failed: {0}")]
    Multiple(String),
}

/// Failure of a single outbound call to a bank backend.
///
/// All variants count identically toward the destination's circuit breaker;
/// the distinction only survives for logging and response mapping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Downstream returned {status}: {message}")]
    Downstream { status: u16, message: String },
}

/// Outcome of an operation executed behind a circuit breaker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitError<E> {
    /// The breaker rejected the call without invoking the operation.
    #[error("Circuit breaker OPEN for {0}. Service unavailable.")]
    Open(String),
    /// The operation ran and failed; the failure has already been counted.
    #[error("{0}")]
    Operation(E),
}

/// Structured dispatch failure returned to request handlers.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Unknown bank for account: {account}")]
    UnknownDestination { account: String },
    #[error("Circuit breaker OPEN for {destination}. Service unavailable.")]
    CircuitOpen { destination: String },
    #[error("Request to {destination} timed out after {timeout_ms}ms")]
    Timeout { destination: String, timeout_ms: u64 },
    #[error("Connection error to {destination}: {message}")]
    Connect { destination: String, message: String },
    #[error("{destination} responded with {status}: {message}")]
    Downstream {
        destination: String,
        status: u16,
        message: String,
    },
}

impl DispatchError {
    /// Lifts a guarded-call failure into a dispatch failure for `destination`.
    pub fn from_call(destination: &str, err: CircuitError<CallError>) -> Self {
        let destination = destination.to_string();
        match err {
            CircuitError::Open(_) => DispatchError::CircuitOpen { destination },
            CircuitError::Operation(CallError::Timeout { timeout_ms }) => DispatchError::Timeout {
                destination,
                timeout_ms,
            },
            CircuitError::Operation(CallError::Connect(message)) => DispatchError::Connect {
                destination,
                message,
            },
            CircuitError::Operation(CallError::Downstream { status, message }) => {
                DispatchError::Downstream {
                    destination,
                    status,
                    message,
                }
            }
        }
    }

    /// HTTP-style status recorded in the audit trail and returned to clients.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::Validation(_) => 400,
            DispatchError::UnknownDestination { .. } => 422,
            DispatchError::CircuitOpen { .. } => 503,
            DispatchError::Timeout { .. } => 504,
            DispatchError::Connect { .. } | DispatchError::Downstream { .. } => 502,
        }
    }

    /// Short machine-readable error type.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "validation_error",
            DispatchError::UnknownDestination { .. } => "unknown_destination",
            DispatchError::CircuitOpen { .. } => "circuit_open",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::Connect { .. } => "connection_error",
            DispatchError::Downstream { .. } => "downstream_error",
        }
    }
}

/// Audit sink failures. Logged locally and discarded by the dispatcher.
#[derive(Error, Debug, Clone)]
pub enum AuditError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("Audit sink timed out after {0}ms")]
    Timeout(u64),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Rate limit exceeded. Max {limit} requests per {window_secs} seconds.")]
    RateLimited {
        limit: u32,
        window_secs: u64,
        retry_after_secs: u64,
    },
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(ValidationError::Multiple(err.to_string()))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted("Pool timed out".to_string()),
            sqlx::Error::Database(db_err) => DatabaseError::Query(db_err.message().to_string()),
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::Migration(err.to_string())
    }
}
