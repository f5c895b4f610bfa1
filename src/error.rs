use std::fmt;

use thiserror::Error;

/// Failure classes a driver adapter reports back to the handle.
///
/// The handle never inspects driver messages; it branches on the kind and, after a failed
/// statement, on the connection's transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverErrorKind {
    /// Credentials were rejected.
    Auth,
    /// The server could not be reached.
    Unreachable,
    /// The connection parameters could not be parsed by the driver.
    BadSyntax,
    /// The client interface itself is closed or broken (no round trip was attempted).
    InterfaceBroken,
    /// The server rejected the statement (syntax, constraint, type errors).
    Statement,
    /// Anything else.
    Other,
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => write!(f, "auth"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::BadSyntax => write!(f, "bad_syntax"),
            Self::InterfaceBroken => write!(f, "interface_broken"),
            Self::Statement => write!(f, "statement"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Typed error returned by every driver capability call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn interface_broken(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::InterfaceBroken, message)
    }

    #[must_use]
    pub fn statement(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Statement, message)
    }

    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Other, message)
    }

    #[must_use]
    pub fn is_interface_broken(&self) -> bool {
        self.kind == DriverErrorKind::InterfaceBroken
    }

    #[must_use]
    pub fn is_bad_syntax(&self) -> bool {
        self.kind == DriverErrorKind::BadSyntax
    }
}

#[derive(Debug, Error)]
pub enum ResilientDbError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Fatal: the physical connection could not be (re)established.
    #[error("Connection error: {0}")]
    ConnectionError(#[source] DriverError),

    #[error("Connection error: no physical connection is open")]
    NotConnected,

    /// The driver's statement failure, passed through unchanged.
    #[error("SQL execution error: {0}")]
    StatementError(#[source] DriverError),

    #[error("Retry budget exhausted after {attempts} attempts (max retries {max_retries}): {last}")]
    RetryExhausted {
        attempts: u32,
        max_retries: u32,
        #[source]
        last: DriverError,
    },

    #[error("Usage error: query returned {count} rows where one was expected")]
    MultipleRows { count: usize },

    #[error("Usage error: connection handle is closed")]
    Closed,

    #[error("Field not found: {0}")]
    FieldNotFound(String),
}

impl ResilientDbError {
    /// True for errors caused by how the handle was called rather than by the database.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::MultipleRows { .. } | Self::Closed)
    }

    #[must_use]
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// The underlying driver error, when there is one.
    #[must_use]
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::ConnectionError(e) | Self::StatementError(e) => Some(e),
            Self::RetryExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}
