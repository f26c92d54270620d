//! Error types for the asof engine.

use crate::EntityId;
use thiserror::Error;

/// How a store failure should be treated by a caller's retry policy.
///
/// The engine never retries on its own; it only carries the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Network or I/O hiccup; the same request may succeed later.
    Transient,
    /// Anything else. Retrying will not help.
    Fatal,
}

/// A failure reported by a [`DocumentStore`](crate::DocumentStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} store failure: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }
}

/// All possible errors from the asof engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Version ordering
    #[error("cannot add version {incoming}: current latest is {current}")]
    OldVersionInsertion { current: String, incoming: String },

    #[error("version type mismatch for '{field}': expected {expected}, got {got}")]
    VersionTypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Entity lookup
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("entity already exists: {0}")]
    EntityAlreadyExists(EntityId),

    #[error("entity type not found: {0}")]
    EntityTypeNotFound(String),

    // Validation
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    // Boundary
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Build an [`Error::OldVersionInsertion`] from the two conflicting versions.
    pub fn old_version(current: &impl std::fmt::Display, incoming: &impl std::fmt::Display) -> Self {
        Error::OldVersionInsertion {
            current: current.to_string(),
            incoming: incoming.to_string(),
        }
    }

    /// Whether a retry policy may reasonably try the operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Store(e) if e.is_transient())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
