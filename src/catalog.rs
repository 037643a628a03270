//! Metadata catalog - CRUD and validation for attribute keys
//!
//! The catalog is the leaf every other component consumes: attribute writes
//! validate against it, the query compiler resolves facet names through it,
//! and bulk import resolves its enrichment key here once per run.

use sqlx::PgPool;
use tracing::info;

use crate::error::{RegistryError, RegistryResult};
use crate::kinds::EntityKind;
use crate::models::{MetaKey, NewMetaKey, UpdateMetaKey};

const INPUT_TYPES: &[&str] = &["text", "select", "multiselect", "number"];

/// Database service for metadata key operations
#[derive(Clone, Debug)]
pub struct MetadataCatalog {
    pool: PgPool,
}

impl MetadataCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new metadata key
    pub async fn create_key(&self, new_key: NewMetaKey) -> RegistryResult<MetaKey> {
        validate_key_shape(&new_key.input_type, &new_key.applies_to)?;

        let key = sqlx::query_as::<_, MetaKey>(
            r#"
            INSERT INTO meta_keys (name, input_type, applies_to, supported_values)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, input_type, applies_to, supported_values, created_at, updated_at
            "#,
        )
        .bind(&new_key.name)
        .bind(&new_key.input_type)
        .bind(&new_key.applies_to)
        .bind(&new_key.supported_values)
        .fetch_one(&self.pool)
        .await?;

        info!("Created metadata key '{}' (id {})", key.name, key.id);
        Ok(key)
    }

    /// Get key by id
    pub async fn get_by_id(&self, key_id: i32) -> RegistryResult<Option<MetaKey>> {
        let key = sqlx::query_as::<_, MetaKey>(
            r#"
            SELECT id, name, input_type, applies_to, supported_values, created_at, updated_at
            FROM meta_keys
            WHERE id = $1
            "#,
        )
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    /// Get key by name (exact match)
    pub async fn get_by_name(&self, name: &str) -> RegistryResult<Option<MetaKey>> {
        let key = sqlx::query_as::<_, MetaKey>(
            r#"
            SELECT id, name, input_type, applies_to, supported_values, created_at, updated_at
            FROM meta_keys
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    /// List keys applicable to an entity kind
    pub async fn list_for_kind(&self, kind: EntityKind) -> RegistryResult<Vec<MetaKey>> {
        let keys = sqlx::query_as::<_, MetaKey>(
            r#"
            SELECT id, name, input_type, applies_to, supported_values, created_at, updated_at
            FROM meta_keys
            WHERE cardinality(applies_to) = 0 OR $1 = ANY(applies_to)
            ORDER BY name
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    /// Update an existing key
    pub async fn update_key(&self, key_id: i32, update: UpdateMetaKey) -> RegistryResult<MetaKey> {
        if let Some(input_type) = &update.input_type {
            validate_key_shape(input_type, update.applies_to.as_deref().unwrap_or(&[]))?;
        } else if let Some(applies_to) = &update.applies_to {
            validate_key_shape("text", applies_to)?;
        }

        // Shrinking the allow-list must not strand assignments that already
        // carry a now-unsupported value.
        if let Some(allowed) = update.supported_values.as_deref().filter(|v| !v.is_empty()) {
            let orphaned: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM entity_attributes
                    WHERE meta_key_id = $1 AND NOT ("values" <@ $2)
                )
                "#,
            )
            .bind(key_id)
            .bind(allowed)
            .fetch_one(&self.pool)
            .await?;
            if orphaned {
                return Err(RegistryError::Conflict(format!(
                    "supported_values update for key {key_id} would orphan stored attribute values"
                )));
            }
        }

        let key = sqlx::query_as::<_, MetaKey>(
            r#"
            UPDATE meta_keys
            SET name = COALESCE($2, name),
                input_type = COALESCE($3, input_type),
                applies_to = COALESCE($4, applies_to),
                supported_values = COALESCE($5, supported_values),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, input_type, applies_to, supported_values, created_at, updated_at
            "#,
        )
        .bind(key_id)
        .bind(&update.name)
        .bind(&update.input_type)
        .bind(&update.applies_to)
        .bind(&update.supported_values)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RegistryError::MetadataNotFound { key_id })?;

        info!("Updated metadata key '{}' (id {})", key.name, key.id);
        Ok(key)
    }

    /// Delete a key. Keys still referenced by attribute assignments are
    /// protected by the FK and surface as a conflict.
    pub async fn delete_key(&self, key_id: i32) -> RegistryResult<()> {
        let result = sqlx::query("DELETE FROM meta_keys WHERE id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::MetadataNotFound { key_id });
        }

        info!("Deleted metadata key {key_id}");
        Ok(())
    }

    /// Validate one attribute entry of a create/update payload.
    ///
    /// Returns the resolved key on success so the caller can persist the
    /// assignment without a second lookup. This runs once per attribute in
    /// the payload; bulk import bypasses it by pre-filtering values at parse
    /// time.
    pub async fn validate_attribute(
        &self,
        kind: EntityKind,
        key_id: Option<i32>,
        values: Option<&[String]>,
    ) -> RegistryResult<MetaKey> {
        let key_id = key_id.ok_or(RegistryError::MissingAttributeField {
            field: "meta_data_key_id",
        })?;
        let values = values.ok_or(RegistryError::MissingAttributeField { field: "values" })?;

        let key = self
            .get_by_id(key_id)
            .await?
            .ok_or(RegistryError::MetadataNotFound { key_id })?;

        if !key.applies_to_kind(kind) {
            return Err(RegistryError::Validation(format!(
                "metadata key '{}' does not apply to {kind}",
                key.name
            )));
        }

        if !key.supported_values.is_empty() {
            // Case-sensitive exact membership.
            for value in values {
                if !key.supported_values.contains(value) {
                    return Err(RegistryError::InvalidAttributeValue {
                        key: key.name.clone(),
                        value: value.clone(),
                    });
                }
            }
        }

        Ok(key)
    }
}

fn validate_key_shape(input_type: &str, applies_to: &[String]) -> RegistryResult<()> {
    if !INPUT_TYPES.contains(&input_type) {
        return Err(RegistryError::Validation(format!(
            "unknown input_type '{input_type}'"
        )));
    }
    for kind in applies_to {
        if kind.parse::<EntityKind>().is_err() {
            return Err(RegistryError::Validation(format!(
                "applies_to names unknown entity kind '{kind}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shape_validation() {
        assert!(validate_key_shape("multiselect", &["asset".to_string()]).is_ok());
        assert!(validate_key_shape("dropdown", &[]).is_err());
        assert!(validate_key_shape("text", &["vendor".to_string()]).is_err());
    }
}
