//! Attribute store - per-entity attribute assignment rows
//!
//! One row per (entity, key) pair in the shared `entity_attributes` table.
//! Writes are full replacements: an update deletes the entity's old rows
//! before inserting the new set, never merges. Rows are exclusively owned by
//! their entity and dropped with it.

use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::error::RegistryResult;
use crate::kinds::EntityKind;
use crate::models::AttributeAssignment;

#[derive(Clone, Debug)]
pub struct AttributeStore {
    pool: PgPool,
}

impl AttributeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch all assignments for one entity
    pub async fn for_entity(
        &self,
        kind: EntityKind,
        entity_id: i64,
    ) -> RegistryResult<Vec<AttributeAssignment>> {
        let rows = sqlx::query_as::<_, AttributeAssignment>(
            r#"
            SELECT entity_kind, entity_id, meta_key_id, "values"
            FROM entity_attributes
            WHERE entity_kind = $1 AND entity_id = $2
            ORDER BY meta_key_id
            "#,
        )
        .bind(kind.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Replace an entity's assignments inside the caller's transaction.
    /// Old rows go first so the write is a replacement, not a merge.
    pub async fn replace_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        kind: EntityKind,
        entity_id: i64,
        assignments: &[(i32, Vec<String>)],
    ) -> RegistryResult<()> {
        sqlx::query("DELETE FROM entity_attributes WHERE entity_kind = $1 AND entity_id = $2")
            .bind(kind.as_str())
            .bind(entity_id)
            .execute(&mut **tx)
            .await?;

        for (meta_key_id, values) in assignments {
            sqlx::query(
                r#"
                INSERT INTO entity_attributes (entity_kind, entity_id, meta_key_id, "values")
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(kind.as_str())
            .bind(entity_id)
            .bind(meta_key_id)
            .bind(values)
            .execute(&mut **tx)
            .await?;
        }

        debug!(
            "Replaced {} attribute rows for {kind} {entity_id}",
            assignments.len()
        );
        Ok(())
    }

    /// Drop all assignments for an entity inside the caller's transaction
    pub async fn delete_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        kind: EntityKind,
        entity_id: i64,
    ) -> RegistryResult<()> {
        sqlx::query("DELETE FROM entity_attributes WHERE entity_kind = $1 AND entity_id = $2")
            .bind(kind.as_str())
            .bind(entity_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Bulk-link imported entities to an attribute key, one row per entity.
    /// Used by the import pipeline after each batch flush; conflicts mean the
    /// entity already carries the key (re-import) and are left untouched.
    pub async fn link_batch(
        tx: &mut Transaction<'_, Postgres>,
        kind: EntityKind,
        meta_key_id: i32,
        links: &[(i64, Vec<String>)],
    ) -> RegistryResult<()> {
        if links.is_empty() {
            return Ok(());
        }

        let mut builder = sqlx::QueryBuilder::new(
            r#"INSERT INTO entity_attributes (entity_kind, entity_id, meta_key_id, "values") "#,
        );
        builder.push_values(links, |mut b, (entity_id, values)| {
            b.push_bind(kind.as_str())
                .push_bind(entity_id)
                .push_bind(meta_key_id)
                .push_bind(values);
        });
        builder.push(" ON CONFLICT (entity_kind, entity_id, meta_key_id) DO NOTHING");
        builder.build().execute(&mut **tx).await?;

        debug!("Linked {} imported {kind} rows to key {meta_key_id}", links.len());
        Ok(())
    }
}
