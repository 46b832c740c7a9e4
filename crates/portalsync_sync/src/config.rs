//! Configuration for sync rounds.

use portalsync_protocol::EntityType;
use std::time::Duration;

/// Configuration shared by the producer, consumer and reconciler.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Named connection to the central relational store.
    pub connection: String,
    /// Tenant whose entities this node syncs.
    pub tenant_id: String,
    /// This node's unique id (TENANT_GATEWAY row uuid).
    pub node_id: String,
    /// Row cap for delta queries; past it the round fails and retries.
    pub max_rows: usize,
    /// Per-query timeout.
    pub query_timeout: Duration,
    /// Prefix of the cluster property holding the sync cursor.
    pub cursor_prefix: String,
}

impl SyncConfig {
    /// Creates a configuration with default bounds.
    pub fn new(
        connection: impl Into<String>,
        tenant_id: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            connection: connection.into(),
            tenant_id: tenant_id.into(),
            node_id: node_id.into(),
            max_rows: 1000,
            query_timeout: Duration::from_secs(60),
            cursor_prefix: "portal.sync".to_string(),
        }
    }

    /// Sets the delta row cap.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Sets the per-query timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Sets the cursor property prefix.
    pub fn with_cursor_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cursor_prefix = prefix.into();
        self
    }

    /// Returns the cluster property name holding this node's cursor for
    /// one entity type.
    pub fn cursor_property(&self, entity_type: EntityType) -> String {
        format!("{}.{}.{}", self.cursor_prefix, entity_type, self.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = SyncConfig::new("central", "tenant-1", "node-1");
        assert_eq!(config.max_rows, 1000);
        assert_eq!(config.query_timeout, Duration::from_secs(60));
        assert_eq!(config.cursor_prefix, "portal.sync");
    }

    #[test]
    fn builder_overrides() {
        let config = SyncConfig::new("central", "tenant-1", "node-1")
            .with_max_rows(50)
            .with_query_timeout(Duration::from_secs(5))
            .with_cursor_prefix("sync");
        assert_eq!(config.max_rows, 50);
        assert_eq!(config.query_timeout, Duration::from_secs(5));
        assert_eq!(config.cursor_prefix, "sync");
    }

    #[test]
    fn cursor_property_names_the_node_and_type() {
        let config = SyncConfig::new("central", "tenant-1", "node-1");
        assert_eq!(
            config.cursor_property(EntityType::Application),
            "portal.sync.APPLICATION.node-1"
        );
        assert_eq!(
            config.cursor_property(EntityType::ApiKey),
            "portal.sync.API_KEY.node-1"
        );
    }
}
