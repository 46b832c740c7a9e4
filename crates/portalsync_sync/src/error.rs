//! Error types for sync rounds.

use portalsync_protocol::ProtocolError;
use portalsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that fail a whole sync round.
///
/// Per-entity failures are not errors at this level: they travel inside
/// the postback as `entityErrors` and are retried next round.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Store or query failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Envelope rejected before any mutation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Node bookkeeping matched no row for the reporting node.
    #[error("no bookkeeping row for node {node_id}")]
    UnknownNode {
        /// The node that reported the postback.
        node_id: String,
    },
}

impl SyncError {
    /// Returns true if retrying the round may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Store(e) if e.is_retryable())
    }
}
