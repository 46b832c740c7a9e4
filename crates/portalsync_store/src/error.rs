//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
///
/// Backend-specific failures are always wrapped into [`StoreError::Transient`]
/// so nothing driver-shaped crosses the cache boundary.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No record exists for the given unique name.
    #[error("entity not found: {name}")]
    NotFound {
        /// The unique name that was looked up.
        name: String,
    },

    /// A record with the given unique name already exists.
    #[error("duplicate key: {name}")]
    DuplicateKey {
        /// The unique name that collided.
        name: String,
    },

    /// A row-scoped persistence failure (constraint violation, stale row).
    ///
    /// Scoped to one entity; the rest of a batch stays applicable.
    #[error("constraint violation on {name}: {message}")]
    Constraint {
        /// The unique name of the affected row.
        name: String,
        /// Description of the violation.
        message: String,
    },

    /// The named connection is not registered with the executor.
    #[error("unknown connection: {name}")]
    UnknownConnection {
        /// The connection reference that failed to resolve.
        name: String,
    },

    /// A backend failure that is expected to clear on retry.
    #[error("transient store failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a not-found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates a duplicate-key error.
    pub fn duplicate_key(name: impl Into<String>) -> Self {
        Self::DuplicateKey { name: name.into() }
    }

    /// Creates a row-scoped constraint error.
    pub fn constraint(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Constraint {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a transient failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Returns true if the failure is scoped to a single row.
    ///
    /// Entity-scoped failures leave the surrounding transaction healthy;
    /// everything else poisons the whole batch.
    pub fn is_entity_scoped(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. }
                | StoreError::DuplicateKey { .. }
                | StoreError::Constraint { .. }
        )
    }

    /// Returns true if retrying the whole operation next round may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_scoped_classification() {
        assert!(StoreError::not_found("a").is_entity_scoped());
        assert!(StoreError::duplicate_key("a").is_entity_scoped());
        assert!(StoreError::constraint("a", "stale").is_entity_scoped());
        assert!(!StoreError::transient("connection lost").is_entity_scoped());
        assert!(!StoreError::UnknownConnection { name: "c".into() }.is_entity_scoped());
    }

    #[test]
    fn retryable_classification() {
        assert!(StoreError::transient("timeout").is_retryable());
        assert!(!StoreError::not_found("a").is_retryable());
    }

    #[test]
    fn error_display() {
        let err = StoreError::duplicate_key("app-1");
        assert_eq!(err.to_string(), "duplicate key: app-1");
    }
}
