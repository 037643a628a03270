//! Code assigner - deterministic display-code backfill
//!
//! Every row whose `code` is still NULL gets `prefix || zero-pad(id, 5)`.
//! The predicate excludes already-coded rows, so the statement is idempotent
//! and safe to run after every import, covering leftovers from earlier runs
//! as well.

use sqlx::PgPool;
use tracing::info;

use crate::error::RegistryResult;
use crate::kinds::KindDescriptor;

pub struct CodeAssigner;

impl CodeAssigner {
    /// Backfill codes for every code-less row of the kind's table.
    /// Returns the number of rows updated.
    pub async fn backfill_codes(pool: &PgPool, desc: &KindDescriptor) -> RegistryResult<u64> {
        let sql = format!(
            "UPDATE {table} SET code = $1 || LPAD(id::text, 5, '0') WHERE code IS NULL",
            table = desc.table
        );
        let result = sqlx::query(&sql)
            .bind(desc.code_prefix)
            .execute(pool)
            .await?;

        let updated = result.rows_affected();
        if updated > 0 {
            info!("Backfilled {updated} {} codes", desc.kind);
        }
        Ok(updated)
    }
}
