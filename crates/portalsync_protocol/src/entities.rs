//! Wire entities.
//!
//! Synced entities are keyed by their portal-assigned UUID string; the
//! node-local store identity and version never cross the wire.

use crate::envelope::EntityType;
use portalsync_store::{EntityId, FromRow, NamedEntity, Row, StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A wire entity that participates in incremental sync.
pub trait SyncEntity: NamedEntity + FromRow + Serialize + DeserializeOwned {
    /// The entity type this wire entity maps to.
    const ENTITY_TYPE: EntityType;

    /// Column list of the central-store entity fetch query.
    fn select_columns() -> &'static str;
}

fn required(row: &Row<'_>, column: &str) -> StoreResult<String> {
    row.text(column)
        .map(str::to_string)
        .ok_or_else(|| StoreError::transient(format!("row missing column {column}")))
}

/// A portal application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// Portal-assigned UUID; the unique sync key.
    pub uuid: String,
    /// Display name.
    pub name: String,
    /// API key issued to the application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Shared secret paired with the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<String>,
    /// Lifecycle status code.
    pub status: String,
    /// Owning organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_uuid: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Account plan the application is subscribed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_plan_uuid: Option<String>,
    #[serde(skip)]
    id: Option<EntityId>,
    #[serde(skip)]
    version: i64,
}

impl Application {
    /// Creates an application with the given key and display name.
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            api_key: None,
            key_secret: None,
            status: "ENABLED".to_string(),
            organization_uuid: None,
            description: None,
            account_plan_uuid: None,
            id: None,
            version: 0,
        }
    }

    /// Sets the API key pair.
    pub fn with_api_key(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self.key_secret = Some(secret.into());
        self
    }

    /// Sets the lifecycle status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Sets the owning organization.
    pub fn with_organization(mut self, organization_uuid: impl Into<String>) -> Self {
        self.organization_uuid = Some(organization_uuid.into());
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the account plan.
    pub fn with_account_plan(mut self, account_plan_uuid: impl Into<String>) -> Self {
        self.account_plan_uuid = Some(account_plan_uuid.into());
        self
    }
}

impl NamedEntity for Application {
    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn name(&self) -> &str {
        &self.uuid
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn content_eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
            && self.name == other.name
            && self.api_key == other.api_key
            && self.key_secret == other.key_secret
            && self.status == other.status
            && self.organization_uuid == other.organization_uuid
            && self.description == other.description
            && self.account_plan_uuid == other.account_plan_uuid
    }
}

impl FromRow for Application {
    fn from_row(row: &Row<'_>) -> StoreResult<Self> {
        Ok(Self {
            uuid: required(row, "UUID")?,
            name: required(row, "NAME")?,
            api_key: row.text("API_KEY").map(str::to_string),
            key_secret: row.text("KEY_SECRET").map(str::to_string),
            status: row
                .text("STATUS")
                .unwrap_or("ENABLED")
                .to_string(),
            organization_uuid: row.text("ORGANIZATION_UUID").map(str::to_string),
            description: row.text("DESCRIPTION").map(str::to_string),
            account_plan_uuid: row.text("ACCOUNT_PLAN_UUID").map(str::to_string),
            id: None,
            version: 0,
        })
    }
}

impl SyncEntity for Application {
    const ENTITY_TYPE: EntityType = EntityType::Application;

    fn select_columns() -> &'static str {
        "UUID, NAME, API_KEY, KEY_SECRET, STATUS, ORGANIZATION_UUID, DESCRIPTION, ACCOUNT_PLAN_UUID"
    }
}

/// An application API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    /// Portal-assigned UUID; the unique sync key.
    pub uuid: String,
    /// Owning application.
    pub application_uuid: String,
    /// Human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Key secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Lifecycle status code.
    pub status: String,
    #[serde(skip)]
    id: Option<EntityId>,
    #[serde(skip)]
    version: i64,
}

impl ApiKey {
    /// Creates a key with the given identity and owning application.
    pub fn new(uuid: impl Into<String>, application_uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            application_uuid: application_uuid.into(),
            label: None,
            secret: None,
            status: "ENABLED".to_string(),
            id: None,
            version: 0,
        }
    }

    /// Sets the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

impl NamedEntity for ApiKey {
    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn name(&self) -> &str {
        &self.uuid
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn content_eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
            && self.application_uuid == other.application_uuid
            && self.label == other.label
            && self.secret == other.secret
            && self.status == other.status
    }
}

impl FromRow for ApiKey {
    fn from_row(row: &Row<'_>) -> StoreResult<Self> {
        Ok(Self {
            uuid: required(row, "UUID")?,
            application_uuid: required(row, "APPLICATION_UUID")?,
            label: row.text("LABEL").map(str::to_string),
            secret: row.text("SECRET").map(str::to_string),
            status: row.text("STATUS").unwrap_or("ENABLED").to_string(),
            id: None,
            version: 0,
        })
    }
}

impl SyncEntity for ApiKey {
    const ENTITY_TYPE: EntityType = EntityType::ApiKey;

    fn select_columns() -> &'static str {
        "UUID, APPLICATION_UUID, LABEL, SECRET, STATUS"
    }
}
