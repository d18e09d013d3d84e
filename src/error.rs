//! Error types for `rvstore`.
//!
//! Every storage failure maps to one [`ErrorCode`], which is what callers
//! translate into their own response protocol.

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Stable, protocol-independent classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    Conflict,
    InvalidIdentifier,
    InvalidArgument,
    Gone,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Conflict => "CONFLICT",
            Self::InvalidIdentifier => "INVALID_IDENTIFIER",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Gone => "GONE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{table} {namespace}/{name} not found")]
    NotFound {
        table: String,
        namespace: String,
        name: String,
    },

    #[error("{table} {namespace}/{name} already exists")]
    AlreadyExists {
        table: String,
        namespace: String,
        name: String,
    },

    #[error(
        "conflict on {table} {namespace}/{name}: expected resource version {expected}, found {actual}"
    )]
    Conflict {
        table: String,
        namespace: String,
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid identifier {input:?}: {reason}")]
    InvalidIdentifier { input: String, reason: String },

    #[error("resource version {requested} is older than the compaction watermark {watermark}")]
    Compacted { requested: u64, watermark: u64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid continue token {0:?}")]
    InvalidContinueToken(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("payload serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::InvalidIdentifier { .. } => ErrorCode::InvalidIdentifier,
            Self::Compacted { .. } => ErrorCode::Gone,
            Self::InvalidArgument(_) | Self::InvalidContinueToken(_) => {
                ErrorCode::InvalidArgument
            }
            Self::Config(_)
            | Self::Database(_)
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::Io(_) => ErrorCode::Internal,
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub(crate) fn invalid_identifier(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Returns true when a rusqlite error is a UNIQUE / PRIMARY KEY violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
