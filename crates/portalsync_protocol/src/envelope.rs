//! Delta and postback envelopes.
//!
//! Both envelopes are immutable once produced and live for exactly one
//! sync round; they are never persisted beyond it.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity classes that participate in incremental sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// Portal applications.
    #[serde(rename = "APPLICATION")]
    Application,
    /// Application API keys.
    #[serde(rename = "API_KEY")]
    ApiKey,
}

impl EntityType {
    /// Returns the wire code for this entity type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Application => "APPLICATION",
            EntityType::ApiKey => "API_KEY",
        }
    }

    /// Parses a wire code.
    ///
    /// Anything unrecognized fails `UnsupportedEntityType` — the whole
    /// envelope is rejected before any mutation.
    pub fn parse(value: &str) -> ProtocolResult<Self> {
        match value {
            "APPLICATION" => Ok(EntityType::Application),
            "API_KEY" => Ok(EntityType::ApiKey),
            other => Err(ProtocolError::UnsupportedEntityType(other.to_string())),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome classification of one applied delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Every entity applied.
    Ok,
    /// Some entities applied, the rest are listed in `entityErrors`.
    Partial,
    /// Nothing applied.
    Error,
}

/// One failed entity in a postback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityError {
    /// Unique key of the failed entity.
    pub id: String,
    /// Failure message.
    pub msg: String,
}

/// A bounded delta of one entity type for one (node, tenant, window).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaEnvelope<E> {
    /// Entity type carried by this delta.
    pub entity_type: EntityType,
    /// Exclusive window start (epoch millis).
    pub increment_start: i64,
    /// Inclusive window end (epoch millis).
    pub increment_end: i64,
    /// True when the producer rebuilt the full entity set from time zero.
    #[serde(default)]
    pub bulk_sync: bool,
    /// Entities created or updated in the window.
    pub new_or_updated_entities: Vec<E>,
    /// Unique keys deleted in the window.
    #[serde(default)]
    pub deleted_ids: Vec<String>,
}

impl<E> DeltaEnvelope<E> {
    /// Returns true if the delta carries no work.
    pub fn is_empty(&self) -> bool {
        self.new_or_updated_entities.is_empty() && self.deleted_ids.is_empty()
    }

    /// Returns the number of entities named by this delta.
    pub fn entity_count(&self) -> usize {
        self.new_or_updated_entities.len() + self.deleted_ids.len()
    }

    /// Checks structural sanity. Fails before any mutation.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.increment_start < 0 {
            return Err(ProtocolError::validation("incrementStart must be >= 0"));
        }
        if self.increment_end < self.increment_start {
            return Err(ProtocolError::validation(
                "incrementEnd must be >= incrementStart",
            ));
        }
        Ok(())
    }
}

/// Acknowledgment describing the outcome of applying one delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostbackEnvelope {
    /// Entity type the acknowledged delta carried.
    pub entity_type: EntityType,
    /// Window start of the acknowledged delta.
    pub increment_start: i64,
    /// Window end of the acknowledged delta.
    pub increment_end: i64,
    /// Outcome classification.
    pub increment_status: SyncStatus,
    /// Round-level failure description, required for `error` status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Per-entity failures, required non-empty for `partial` status.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_errors: Vec<EntityError>,
    /// True when the acknowledged delta was a bulk resync.
    ///
    /// Forces the reconciler's window back to time zero.
    #[serde(default)]
    pub bulk_sync: bool,
    /// Free-form round summary, persisted into node bookkeeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_log: Option<String>,
}

impl PostbackEnvelope {
    /// Creates a fully successful postback.
    pub fn ok(entity_type: EntityType, increment_start: i64, increment_end: i64) -> Self {
        Self {
            entity_type,
            increment_start,
            increment_end,
            increment_status: SyncStatus::Ok,
            error_message: None,
            entity_errors: Vec::new(),
            bulk_sync: false,
            sync_log: None,
        }
    }

    /// Creates a partial postback carrying per-entity failures.
    pub fn partial(
        entity_type: EntityType,
        increment_start: i64,
        increment_end: i64,
        entity_errors: Vec<EntityError>,
    ) -> Self {
        Self {
            entity_type,
            increment_start,
            increment_end,
            increment_status: SyncStatus::Partial,
            error_message: None,
            entity_errors,
            bulk_sync: false,
            sync_log: None,
        }
    }

    /// Creates a failed postback.
    pub fn error(
        entity_type: EntityType,
        increment_start: i64,
        increment_end: i64,
        message: impl Into<String>,
        entity_errors: Vec<EntityError>,
    ) -> Self {
        Self {
            entity_type,
            increment_start,
            increment_end,
            increment_status: SyncStatus::Error,
            error_message: Some(message.into()),
            entity_errors,
            bulk_sync: false,
            sync_log: None,
        }
    }

    /// Sets the bulk-resync flag.
    pub fn with_bulk_sync(mut self, bulk_sync: bool) -> Self {
        self.bulk_sync = bulk_sync;
        self
    }

    /// Sets the round summary line.
    pub fn with_sync_log(mut self, sync_log: impl Into<String>) -> Self {
        self.sync_log = Some(sync_log.into());
        self
    }

    /// Returns the ids listed in `entityErrors`.
    pub fn error_ids(&self) -> Vec<&str> {
        self.entity_errors.iter().map(|e| e.id.as_str()).collect()
    }

    /// Checks structural sanity. Fails before any bookkeeping change.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.increment_start < 0 {
            return Err(ProtocolError::validation("incrementStart must be >= 0"));
        }
        if self.increment_end < self.increment_start {
            return Err(ProtocolError::validation(
                "incrementEnd must be >= incrementStart",
            ));
        }
        match self.increment_status {
            SyncStatus::Error if self.error_message.as_deref().unwrap_or("").is_empty() => Err(
                ProtocolError::validation("error status requires errorMessage"),
            ),
            SyncStatus::Partial if self.entity_errors.is_empty() => Err(
                ProtocolError::validation("partial status requires entityErrors"),
            ),
            _ => Ok(()),
        }
    }
}
