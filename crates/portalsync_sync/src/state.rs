//! Per-(node, entity) sync state machine.

/// Status code written for a synced row.
pub(crate) const STATUS_SYNCED: &str = "SYNCED";
/// Status code written for a row pending retry after a change.
pub(crate) const STATUS_PENDING: &str = "PENDING";
/// Status code written for a failed row.
pub(crate) const STATUS_ERROR: &str = "ERROR";

/// Sync state of one entity on one node.
///
/// `NeverSynced` has no status row; the other states map to the
/// SYNC_STATUS column of the per-node status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitySyncState {
    /// No sync round has touched the entity on this node.
    NeverSynced,
    /// The entity matches the central store as of its last window.
    Synced,
    /// The entity changed after its last successful sync.
    PendingRetry,
    /// The last apply failed; sticky until a later round succeeds.
    Errored,
}

/// Events driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// A round reported the entity applied.
    SyncSucceeded,
    /// A round reported the entity failed.
    SyncFailed,
    /// The central store detected a change to the entity.
    ChangeDetected,
}

impl EntitySyncState {
    /// Applies one event and returns the next state.
    pub fn apply(self, event: SyncEvent) -> Self {
        match (self, event) {
            (_, SyncEvent::SyncSucceeded) => EntitySyncState::Synced,
            (_, SyncEvent::SyncFailed) => EntitySyncState::Errored,
            (EntitySyncState::Synced, SyncEvent::ChangeDetected) => EntitySyncState::PendingRetry,
            // Errored stays errored on further changes; NeverSynced and
            // PendingRetry already select for the next round.
            (state, SyncEvent::ChangeDetected) => state,
        }
    }

    /// Returns the SYNC_STATUS column value, if the state has a row.
    pub fn status_code(&self) -> Option<&'static str> {
        match self {
            EntitySyncState::NeverSynced => None,
            EntitySyncState::Synced => Some(STATUS_SYNCED),
            EntitySyncState::PendingRetry => Some(STATUS_PENDING),
            EntitySyncState::Errored => Some(STATUS_ERROR),
        }
    }

    /// Parses a SYNC_STATUS column value; an absent row is `NeverSynced`.
    pub fn from_status_code(code: Option<&str>) -> Self {
        match code {
            Some(STATUS_SYNCED) => EntitySyncState::Synced,
            Some(STATUS_PENDING) => EntitySyncState::PendingRetry,
            Some(STATUS_ERROR) => EntitySyncState::Errored,
            _ => EntitySyncState::NeverSynced,
        }
    }

    /// Returns true if the next round must re-select the entity.
    pub fn needs_sync(&self) -> bool {
        !matches!(self, EntitySyncState::Synced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EntitySyncState::*;
    use SyncEvent::*;

    #[test]
    fn happy_path() {
        let state = NeverSynced.apply(SyncSucceeded);
        assert_eq!(state, Synced);
        let state = state.apply(ChangeDetected);
        assert_eq!(state, PendingRetry);
        assert_eq!(state.apply(SyncSucceeded), Synced);
    }

    #[test]
    fn errored_is_sticky_until_success() {
        let state = Synced.apply(SyncFailed);
        assert_eq!(state, Errored);
        assert_eq!(state.apply(ChangeDetected), Errored);
        assert_eq!(state.apply(SyncFailed), Errored);
        assert_eq!(state.apply(SyncSucceeded), Synced);
    }

    #[test]
    fn change_before_first_sync_stays_unsynced() {
        assert_eq!(NeverSynced.apply(ChangeDetected), NeverSynced);
        assert_eq!(PendingRetry.apply(ChangeDetected), PendingRetry);
    }

    #[test]
    fn status_codes_roundtrip() {
        for state in [Synced, PendingRetry, Errored] {
            assert_eq!(
                EntitySyncState::from_status_code(state.status_code()),
                state
            );
        }
        assert_eq!(EntitySyncState::from_status_code(None), NeverSynced);
        assert!(NeverSynced.status_code().is_none());
    }

    #[test]
    fn everything_but_synced_needs_sync() {
        assert!(NeverSynced.needs_sync());
        assert!(PendingRetry.needs_sync());
        assert!(Errored.needs_sync());
        assert!(!Synced.needs_sync());
    }
}
