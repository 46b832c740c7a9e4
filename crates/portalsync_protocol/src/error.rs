//! Error types for envelope handling.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating envelopes.
///
/// Both variants are fatal for the round and happen before any mutation.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// The envelope names an entity type this node does not recognize.
    #[error("unsupported entity type: {0}")]
    UnsupportedEntityType(String),

    /// The envelope is structurally invalid.
    #[error("envelope validation failed: {0}")]
    Validation(String),
}

impl ProtocolError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
