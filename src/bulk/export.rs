//! Bulk export pipeline - streaming CSV over a dedicated connection
//!
//! One pooled connection is checked out for the whole export and driven by a
//! spawned producer; rows stream from a server-side cursor into a CSV
//! encoder, and encoded chunks travel a bounded channel to the consumer
//! (typically an HTTP response body). The connection is owned by the
//! producer task, so it returns to the pool on every exit path: completion,
//! query error, or the consumer dropping the receiver mid-stream.

use std::time::Duration;

use futures::TryStreamExt;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::kinds::{descriptor, ColumnType, EntityKind, ExportColumn, KindDescriptor};

use super::ARRAY_SEPARATOR;

/// Rows encoded per emitted chunk. Small enough to start the download
/// quickly, large enough to amortize channel traffic.
const ROWS_PER_CHUNK: usize = 500;

pub type ExportChunk = Result<Vec<u8>, RegistryError>;

pub struct BulkExportPipeline {
    pool: PgPool,
    timeout: Duration,
}

impl BulkExportPipeline {
    pub fn new(pool: PgPool, timeout_secs: u64) -> Self {
        Self {
            pool,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Start an export and return the chunk stream. The first chunk is the
    /// header row; it is produced before any row is fetched, so an empty
    /// table still yields a well-formed file.
    pub async fn export(&self, kind: EntityKind) -> RegistryResult<mpsc::Receiver<ExportChunk>> {
        let desc = descriptor(kind);
        let (tx, rx) = mpsc::channel::<ExportChunk>(4);

        let header = encode_header(desc)?;
        if tx.send(Ok(header)).await.is_err() {
            return Err(RegistryError::Internal("export receiver closed".into()));
        }

        let pool = self.pool.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, produce(pool, desc, &tx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RegistryError::Timeout {
                    seconds: timeout.as_secs(),
                }),
            };
            if let Err(e) = outcome {
                warn!("export of {} aborted: {e}", desc.kind);
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(rx)
    }
}

/// Producer half: owns the connection, streams rows, encodes chunks.
async fn produce(
    pool: PgPool,
    desc: &'static KindDescriptor,
    tx: &mpsc::Sender<ExportChunk>,
) -> RegistryResult<()> {
    let mut conn = pool.acquire().await?;

    let sql = select_sql(desc);
    let mut rows = sqlx::query(&sql).fetch(&mut *conn);

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut pending = 0usize;
    let mut total = 0u64;

    while let Some(row) = rows.try_next().await? {
        writer.write_record(encode_row(desc, &row)?)?;
        pending += 1;
        total += 1;
        if pending >= ROWS_PER_CHUNK {
            let chunk = std::mem::replace(&mut writer, csv::Writer::from_writer(Vec::new()))
                .into_inner()
                .map_err(|e| RegistryError::Internal(e.to_string()))?;
            if tx.send(Ok(chunk)).await.is_err() {
                // Consumer gone; stop fetching and let the connection drop
                // back into the pool.
                debug!("export consumer for {} went away after {total} rows", desc.kind);
                return Ok(());
            }
            pending = 0;
        }
    }

    if pending > 0 {
        let chunk = writer
            .into_inner()
            .map_err(|e| RegistryError::Internal(e.to_string()))?;
        let _ = tx.send(Ok(chunk)).await;
    }

    debug!("Exported {total} {} rows", desc.kind);
    Ok(())
}

fn select_sql(desc: &KindDescriptor) -> String {
    let columns: Vec<String> = desc
        .export_columns
        .iter()
        .map(|c| {
            if c.expr == c.alias {
                c.expr.to_string()
            } else {
                format!("{} AS {}", c.expr, c.alias)
            }
        })
        .collect();
    format!(
        "SELECT {} FROM {} ORDER BY created_at DESC",
        columns.join(", "),
        desc.table
    )
}

fn encode_header(desc: &KindDescriptor) -> RegistryResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(desc.export_columns.iter().map(|c| c.header))?;
    writer
        .into_inner()
        .map_err(|e| RegistryError::Internal(e.to_string()))
}

fn encode_row(desc: &KindDescriptor, row: &PgRow) -> RegistryResult<Vec<String>> {
    desc.export_columns
        .iter()
        .enumerate()
        .map(|(i, column)| encode_cell(column, row, i))
        .collect()
}

fn encode_cell(column: &ExportColumn, row: &PgRow, index: usize) -> RegistryResult<String> {
    let cell = match column.ty {
        ColumnType::Text => row.try_get::<Option<String>, _>(index)?.unwrap_or_default(),
        ColumnType::BigInt => row
            .try_get::<Option<i64>, _>(index)?
            .map(|n| n.to_string())
            .unwrap_or_default(),
        ColumnType::Int => row
            .try_get::<Option<i32>, _>(index)?
            .map(|n| n.to_string())
            .unwrap_or_default(),
        ColumnType::Bool => row
            .try_get::<Option<bool>, _>(index)?
            .map(|b| if b { "yes" } else { "no" }.to_string())
            .unwrap_or_default(),
        ColumnType::TextArray => row
            .try_get::<Option<Vec<String>>, _>(index)?
            .unwrap_or_default()
            .join(ARRAY_SEPARATOR),
        ColumnType::Timestamp => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_default(),
    };
    Ok(cell)
}
