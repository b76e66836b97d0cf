//! Domain errors for the reconciliation engine.

use thiserror::Error;

/// Domain-level errors that can occur while reconciling LIS events.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Input that can never succeed; the event is dropped.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: String,
        /// Its identifier.
        id: String,
    },

    /// A status change the state machine forbids.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Optimistic version check failed; safe to retry.
    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict {
        /// Kind of record.
        entity: String,
        /// Its identifier.
        id: String,
    },

    /// Storage failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Stored or wire data could not be (de)serialized.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Failure expected to clear on retry.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A collaborator answered with an error.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result alias used across the domain.
pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Shorthand for [`DomainError::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Whether the delivery layer should redeliver the event that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::ConcurrencyConflict { .. } | Self::DatabaseError(_)
        )
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
