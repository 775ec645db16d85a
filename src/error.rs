//! Error types for the persistence engine.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, etc.)
//! - Retryability flags for callers that want to reload and retry
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use crate::schema::TypeName;
use thiserror::Error;

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    DatabaseError,
    BatchMismatch,

    // Not Found (exit 3)
    EntityNotFound,
    TypeNotRegistered,

    // Validation (exit 4)
    ValidationFailed,
    InvalidIdentity,
    UnsavedReference,

    // Concurrency (exit 5)
    ConcurrencyConflict,
    UnsupportedCycle,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::DatabaseError => "DATABASE_ERROR",
            Self::BatchMismatch => "BATCH_MISMATCH",
            Self::EntityNotFound => "ENTITY_NOT_FOUND",
            Self::TypeNotRegistered => "TYPE_NOT_REGISTERED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidIdentity => "INVALID_IDENTITY",
            Self::UnsavedReference => "UNSAVED_REFERENCE",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::UnsupportedCycle => "UNSUPPORTED_CYCLE",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::DatabaseError | Self::BatchMismatch => 2,
            Self::EntityNotFound | Self::TypeNotRegistered => 3,
            Self::ValidationFailed | Self::InvalidIdentity | Self::UnsavedReference => 4,
            Self::ConcurrencyConflict | Self::UnsupportedCycle => 5,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether the caller may retry after reloading the affected entities.
    ///
    /// True for optimistic concurrency conflicts and validation failures
    /// the caller can correct. The engine itself never retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict | Self::ValidationFailed)
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur while saving an entity graph.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Integrity check failed:\n{0}")]
    Validation(String),

    #[error("Concurrency conflict on {type_name}: ids {ids:?} were modified by another writer")]
    ConcurrencyConflict { type_name: TypeName, ids: Vec<i64> },

    #[error("{type_name} not found: ids {ids:?}")]
    EntityNotFound { type_name: TypeName, ids: Vec<i64> },

    #[error("Type {0} is not registered in the schema")]
    TypeNotRegistered(TypeName),

    #[error("Reference cycle between {} has no nullable column to defer", types.join(", "))]
    UnsupportedCycle { types: Vec<String> },

    #[error("{from} references {to}, which has not been saved yet")]
    UnsavedReference { from: String, to: String },

    #[error("Invalid identity for {type_name}: {message}")]
    InvalidIdentity { type_name: TypeName, message: String },

    #[error("Driver reported {actual} rows for a batch of {expected}")]
    BatchMismatch { expected: usize, actual: usize },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::ConcurrencyConflict { .. } => ErrorCode::ConcurrencyConflict,
            Self::EntityNotFound { .. } => ErrorCode::EntityNotFound,
            Self::TypeNotRegistered(_) => ErrorCode::TypeNotRegistered,
            Self::UnsupportedCycle { .. } => ErrorCode::UnsupportedCycle,
            Self::UnsavedReference { .. } => ErrorCode::UnsavedReference,
            Self::InvalidIdentity { .. } => ErrorCode::InvalidIdentity,
            Self::BatchMismatch { .. } => ErrorCode::BatchMismatch,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::ConcurrencyConflict { type_name, .. } => Some(format!(
                "Reload the {type_name} entities, reapply your changes and save again."
            )),
            Self::EntityNotFound { type_name, .. } => Some(format!(
                "The {type_name} rows were deleted after they were loaded."
            )),
            Self::TypeNotRegistered(type_name) => Some(format!(
                "Register a table definition for {type_name} with `Schema::register` before saving."
            )),
            Self::UnsupportedCycle { .. } => Some(
                "Make at least one reference column in the cycle nullable so it can be written in a second pass."
                    .to_string(),
            ),
            Self::InvalidIdentity { .. } => Some(
                "Tables with server-generated ids must not receive an id on new entities; \
                 caller-assigned tables need one."
                    .to_string(),
            ),
            Self::Validation(_)
            | Self::UnsavedReference { .. }
            | Self::BatchMismatch { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
