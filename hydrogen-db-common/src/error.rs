//! Error taxonomy shared by the queue, pool, and engine adapter crates.
//!
//! Mirrors the split used throughout the teacher crates: a public opaque
//! `DbError` wrapping a private `DbErrorKind`, with an HTTP-ish `status` and a
//! captured backtrace, plus a `DbErrorIntrospect` trait for kind queries.

use std::fmt;

use backtrace::Backtrace;
use thiserror::Error;

/// Coarse classification used by callers deciding how to react to a failure.
/// Not an HTTP status in the literal sense (the core has no HTTP surface),
/// but kept as a familiar severity axis for an eventual outer API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Caller-supplied arguments were invalid; never recoverable.
    InvalidInput,
    /// Allocation or capacity exhaustion.
    Exhausted,
    /// The backend returned a non-OK status or a timeout expired.
    Backend,
    /// The connection was lost or its guard was found corrupted.
    ConnectionLost,
    /// Required configuration was missing.
    ConfigMissing,
    /// Bootstrap data was malformed.
    BootstrapInvariant,
}

#[derive(Debug)]
pub struct DbError {
    kind: DbErrorKind,
    pub severity: Severity,
    pub backtrace: Backtrace,
}

#[derive(Debug, Error)]
enum DbErrorKind {
    #[error("parameter invalid: {0}")]
    ParameterInvalid(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("backend protocol error: {0}")]
    BackendProtocol(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    #[error("bootstrap invariant broken: {0}")]
    BootstrapInvariant(String),

    #[error("unexpected error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn parameter_invalid(msg: impl Into<String>) -> Self {
        DbErrorKind::ParameterInvalid(msg.into()).into()
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        DbErrorKind::ResourceExhausted(msg.into()).into()
    }

    pub fn backend_protocol(msg: impl Into<String>) -> Self {
        DbErrorKind::BackendProtocol(msg.into()).into()
    }

    pub fn connection_lost(msg: impl Into<String>) -> Self {
        DbErrorKind::ConnectionLost(msg.into()).into()
    }

    pub fn config_missing(msg: impl Into<String>) -> Self {
        DbErrorKind::ConfigMissing(msg.into()).into()
    }

    pub fn bootstrap_invariant(msg: impl Into<String>) -> Self {
        DbErrorKind::BootstrapInvariant(msg.into()).into()
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        DbErrorKind::Internal(msg.into()).into()
    }
}

pub trait DbErrorIntrospect {
    fn is_sentry_event(&self) -> bool;
    fn metric_label(&self) -> Option<String>;
    fn is_connection_lost(&self) -> bool;
    fn is_config_missing(&self) -> bool;
}

impl DbErrorIntrospect for DbError {
    fn is_sentry_event(&self) -> bool {
        // Config errors are routine (validated up front); everything else is
        // worth forwarding to an outer error tracker.
        !matches!(self.kind, DbErrorKind::ConfigMissing(_))
    }

    fn metric_label(&self) -> Option<String> {
        match &self.kind {
            DbErrorKind::ConnectionLost(_) => Some("db.connection_lost".to_owned()),
            DbErrorKind::BackendProtocol(_) => Some("db.backend_protocol".to_owned()),
            _ => None,
        }
    }

    fn is_connection_lost(&self) -> bool {
        matches!(self.kind, DbErrorKind::ConnectionLost(_))
    }

    fn is_config_missing(&self) -> bool {
        matches!(self.kind, DbErrorKind::ConfigMissing(_))
    }
}

impl From<DbErrorKind> for DbError {
    fn from(kind: DbErrorKind) -> Self {
        let severity = match kind {
            DbErrorKind::ParameterInvalid(_) => Severity::InvalidInput,
            DbErrorKind::ResourceExhausted(_) => Severity::Exhausted,
            DbErrorKind::BackendProtocol(_) => Severity::Backend,
            DbErrorKind::ConnectionLost(_) => Severity::ConnectionLost,
            DbErrorKind::ConfigMissing(_) => Severity::ConfigMissing,
            DbErrorKind::BootstrapInvariant(_) => Severity::BootstrapInvariant,
            DbErrorKind::Internal(_) => Severity::Backend,
        };
        Self {
            kind,
            severity,
            backtrace: Backtrace::new(),
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, formatter)
    }
}

impl std::error::Error for DbError {}

pub type DbResult<T> = Result<T, DbError>;
