//! Error types for the replication core
//! Mirrors the constructor-function style used across the crate: each error
//! kind has a `ReplicationError::xxx(..)` helper instead of struct literals.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplicationError>;

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("invalid option `{field}`: {reason}")]
    InvalidOption { field: String, reason: String },

    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("sql error [{sql_state}]: {message}")]
    SqlError { sql_state: String, message: String },

    #[error("message truncated: {0}")]
    Truncated(String),

    #[error("unknown message type: {0}")]
    UnknownMessage(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown relation: {0}")]
    UnknownRelation(u32),

    #[error("tuple arity mismatch: expected {expected} columns, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("handler error: {0}")]
    HandlerError(String),

    #[error("io error: {0}")]
    IoError(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("buffer error: {0}")]
    Buffer(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    NulError(#[from] std::ffi::NulError),
}

impl ReplicationError {
    pub fn invalid_option(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn connect_failed(reason: impl Into<String>) -> Self {
        Self::ConnectFailed(reason.into())
    }

    pub fn sql(sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SqlError {
            sql_state: sql_state.into(),
            message: message.into(),
        }
    }

    pub fn truncated(context: impl Into<String>) -> Self {
        Self::Truncated(context.into())
    }

    pub fn unknown_message(kind: impl Into<String>) -> Self {
        Self::UnknownMessage(kind.into())
    }

    pub fn parse(context: impl Into<String>) -> Self {
        Self::Malformed(context.into())
    }

    pub fn parse_with_context(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Malformed(format!("{}: {}", message.into(), context.into()))
    }

    pub fn unknown_relation(id: u32) -> Self {
        Self::UnknownRelation(id)
    }

    pub fn arity_mismatch(expected: usize, actual: usize) -> Self {
        Self::ArityMismatch { expected, actual }
    }

    pub fn handler(reason: impl Into<String>) -> Self {
        Self::HandlerError(reason.into())
    }

    pub fn io(reason: impl Into<String>) -> Self {
        Self::IoError(reason.into())
    }

    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection(reason.into())
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    pub fn buffer(reason: impl Into<String>) -> Self {
        Self::Buffer(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// SQL-state for "duplicate object" (42710) — the one error the session
    /// setup sequence tolerates when slots/publications already exist.
    pub fn is_duplicate_object(&self) -> bool {
        matches!(self, Self::SqlError { sql_state, .. } if sql_state == "42710")
    }
}

impl From<std::io::Error> for ReplicationError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
