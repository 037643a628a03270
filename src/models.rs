//! Data structures shared across the registry services

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::kinds::EntityKind;

/// Publication status carried by every entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Draft,
    Published,
    NotPublished,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Draft => "draft",
            EntityStatus::Published => "published",
            EntityStatus::NotPublished => "not_published",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EntityStatus::Draft),
            "published" => Ok(EntityStatus::Published),
            "not_published" => Ok(EntityStatus::NotPublished),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Administrator-defined attribute key
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MetaKey {
    pub id: i32,
    pub name: String,
    pub input_type: String,
    /// Entity kinds this key applies to; empty means all
    pub applies_to: Vec<String>,
    /// Closed value set; empty means unconstrained
    pub supported_values: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MetaKey {
    pub fn applies_to_kind(&self, kind: EntityKind) -> bool {
        self.applies_to.is_empty() || self.applies_to.iter().any(|k| k == kind.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMetaKey {
    pub name: String,
    #[serde(default = "default_input_type")]
    pub input_type: String,
    #[serde(default)]
    pub applies_to: Vec<String>,
    #[serde(default)]
    pub supported_values: Vec<String>,
}

fn default_input_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMetaKey {
    pub name: Option<String>,
    pub input_type: Option<String>,
    pub applies_to: Option<Vec<String>>,
    pub supported_values: Option<Vec<String>>,
}

/// Stored (entity, key) -> values mapping
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttributeAssignment {
    pub entity_kind: String,
    pub entity_id: i64,
    pub meta_key_id: i32,
    pub values: Vec<String>,
}

/// One attribute entry in a create/update payload. Both fields are optional
/// so a missing field is reported as such rather than as a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeInput {
    pub meta_data_key_id: Option<i32>,
    pub values: Option<Vec<String>>,
}

/// Generic entity row covering the shared column contract. Kind-specific
/// columns ride along as a JSON object so one row type serves all four
/// tables.
#[derive(Debug, Clone, Serialize)]
pub struct EntityRecord {
    pub id: i64,
    pub code: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub status: EntityStatus,
    pub extra: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEntityRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<EntityStatus>,
    /// Kind-specific columns keyed by internal field name
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub attributes: Vec<AttributeInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateEntityRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<EntityStatus>,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    /// Full replacement when present; absent leaves assignments untouched
    pub attributes: Option<Vec<AttributeInput>>,
}

/// List response envelope
#[derive(Debug, Clone, Serialize)]
pub struct ListPage {
    pub data: Vec<EntityRecord>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}
