//! Bulk import pipeline - streaming, batched CSV ingestion
//!
//! The decoder runs on a blocking thread and feeds transformed rows through a
//! bounded channel sized to one batch; when the inserter falls behind, the
//! decoder blocks on the full channel instead of buffering the file in
//! memory. Each full batch flushes in its own transaction with
//! duplicate-insert suppression, then links enrichment attributes for the
//! rows that actually landed, keyed by the unique import column. Batches
//! commit independently: a decode failure aborts the run but keeps what
//! earlier batches committed, and the error carries that count.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use sqlx::{PgPool, QueryBuilder};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::attributes::AttributeStore;
use crate::catalog::MetadataCatalog;
use crate::codes::CodeAssigner;
use crate::error::{RegistryError, RegistryResult};
use crate::kinds::{descriptor, CellParse, CsvColumn, EntityKind, KindDescriptor};
use crate::registry::FieldValue;

use super::GUIDANCE_MARKER;

/// Issue log entries are capped so a pathological file cannot balloon the
/// response. The total is still counted.
const MAX_ISSUES: usize = 1_000;

/// One recorded row-level problem (dropped token, nulled field, skipped row)
#[derive(Debug, Clone, serde::Serialize)]
pub struct RowIssue {
    pub line: u64,
    pub field: String,
    pub message: String,
}

/// Outcome of an import run
#[derive(Debug, Clone, serde::Serialize)]
pub struct ImportReport {
    /// Rows actually inserted
    pub inserted: u64,
    /// Rows that reached the insert stage
    pub flushed: u64,
    /// Rows suppressed by the unique-key conflict rule
    pub skipped_duplicates: u64,
    /// Number of batch flushes performed
    pub batches: u64,
    /// Display codes backfilled after the run (covers pre-existing rows too)
    pub codes_assigned: u64,
    /// Row-level issue log, truncated at 1,000 entries
    pub issues: Vec<RowIssue>,
    /// Total issues observed, including truncated ones
    pub issue_count: u64,
}

/// A transformed CSV row ready for insertion
struct ImportRow {
    /// Value of the unique import-key column
    key: String,
    /// Parsed values, parallel to the descriptor's csv_columns
    values: Vec<FieldValue>,
    /// Enrichment attribute values already filtered against the allow-list
    enrichment: Vec<String>,
    issues: Vec<RowIssue>,
}

/// Fatal decode failure reported through the channel
struct DecodeFailure {
    line: u64,
    message: String,
}

pub struct BulkImportPipeline {
    pool: PgPool,
    catalog: MetadataCatalog,
    batch_size: usize,
    timeout: Duration,
}

impl BulkImportPipeline {
    pub fn new(pool: PgPool, batch_size: usize, timeout_secs: u64) -> Self {
        let catalog = MetadataCatalog::new(pool.clone());
        Self {
            pool,
            catalog,
            batch_size: batch_size.max(1),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Import a CSV file for one entity kind. The source file is removed on
    /// success. Returns the report; on decode failure the error carries the
    /// count of rows already committed by earlier batches.
    pub async fn import(&self, kind: EntityKind, path: PathBuf) -> RegistryResult<ImportReport> {
        match tokio::time::timeout(self.timeout, self.run(kind, path)).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    async fn run(&self, kind: EntityKind, path: PathBuf) -> RegistryResult<ImportReport> {
        let desc = descriptor(kind);

        // Resolve the enrichment key once, before streaming begins.
        let enrichment_key = match desc.enrichment {
            Some(enrichment) => {
                let key = self.catalog.get_by_name(enrichment.key).await?;
                if key.is_none() {
                    warn!(
                        "enrichment key '{}' not in catalog, importing {kind} without it",
                        enrichment.key
                    );
                }
                key
            }
            None => None,
        };
        let enrichment_allowed: Vec<String> = enrichment_key
            .as_ref()
            .map(|k| k.supported_values.clone())
            .unwrap_or_default();

        // Bounded to one batch: the blocking_send below is the backpressure
        // that keeps an unbounded CSV from growing the buffer before the
        // first flush.
        let (tx, mut rx) = mpsc::channel::<Result<ImportRow, DecodeFailure>>(self.batch_size);

        let decoder_path = path.clone();
        let decoder = tokio::task::spawn_blocking(move || {
            decode_loop(decoder_path, desc, enrichment_allowed, tx)
        });

        let mut report = ImportReport {
            inserted: 0,
            flushed: 0,
            skipped_duplicates: 0,
            batches: 0,
            codes_assigned: 0,
            issues: Vec::new(),
            issue_count: 0,
        };
        let mut batch: Vec<ImportRow> = Vec::with_capacity(self.batch_size);

        let failure = loop {
            match rx.recv().await {
                Some(Ok(row)) => {
                    record_issues(&mut report, &row.issues);
                    batch.push(row);
                    if batch.len() >= self.batch_size {
                        self.flush_batch(desc, enrichment_key.as_ref().map(|k| k.id), &mut batch, &mut report)
                            .await?;
                    }
                }
                Some(Err(failure)) => break Some(failure),
                None => break None,
            }
        };

        if let Some(failure) = failure {
            // Abort immediately: the pending batch is discarded, committed
            // batches stay (import is not atomic across batches).
            drop(rx);
            let _ = decoder.await;
            return Err(RegistryError::Decode {
                line: failure.line,
                message: failure.message,
                inserted: report.inserted,
            });
        }

        self.flush_batch(desc, enrichment_key.as_ref().map(|k| k.id), &mut batch, &mut report)
            .await?;

        decoder
            .await
            .map_err(|e| RegistryError::Internal(format!("decoder task failed: {e}")))?;

        report.codes_assigned = CodeAssigner::backfill_codes(&self.pool, desc).await?;

        tokio::fs::remove_file(&path).await?;

        info!(
            "Imported {} {kind} rows ({} flushed, {} duplicates skipped, {} issues)",
            report.inserted, report.flushed, report.skipped_duplicates, report.issue_count
        );
        Ok(report)
    }

    /// Insert one batch in its own transaction, then link enrichment
    /// attributes for the rows that were actually inserted.
    async fn flush_batch(
        &self,
        desc: &'static KindDescriptor,
        enrichment_key_id: Option<i32>,
        batch: &mut Vec<ImportRow>,
        report: &mut ImportReport,
    ) -> RegistryResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let mut builder = QueryBuilder::new(format!("INSERT INTO {} (", desc.table));
        for (i, column) in desc.csv_columns.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(column.field);
        }
        builder.push(", status) ");
        builder.push_values(batch.iter(), |mut b, row| {
            for value in &row.values {
                push_field_bind_sep(&mut b, value.clone());
            }
            b.push_bind("draft");
        });
        builder.push(format!(
            " ON CONFLICT ({key}) DO NOTHING RETURNING id, {key}",
            key = desc.import_key
        ));

        let inserted: Vec<(i64, String)> = builder
            .build_query_as::<(i64, String)>()
            .fetch_all(&mut *tx)
            .await?;

        report.flushed += batch.len() as u64;
        report.inserted += inserted.len() as u64;
        report.skipped_duplicates += (batch.len() - inserted.len()) as u64;
        report.batches += 1;

        // The import key is the unique ON CONFLICT target, so mapping the
        // returned rows back to their source by that key is injective. For
        // duplicate keys within a batch the first occurrence wins, matching
        // the conflict rule.
        if let Some(meta_key_id) = enrichment_key_id {
            let mut by_key: HashMap<&str, &ImportRow> = HashMap::with_capacity(batch.len());
            for row in batch.iter() {
                by_key.entry(row.key.as_str()).or_insert(row);
            }
            let links: Vec<(i64, Vec<String>)> = inserted
                .iter()
                .filter_map(|(id, key)| {
                    let row = by_key.get(key.as_str())?;
                    if row.enrichment.is_empty() {
                        None
                    } else {
                        Some((*id, row.enrichment.clone()))
                    }
                })
                .collect();
            AttributeStore::link_batch(&mut tx, desc.kind, meta_key_id, &links).await?;
        }

        tx.commit().await?;
        debug!(
            "Flushed batch of {} {} rows ({} inserted)",
            batch.len(),
            desc.kind,
            inserted.len()
        );
        batch.clear();
        Ok(())
    }
}

fn record_issues(report: &mut ImportReport, issues: &[RowIssue]) {
    report.issue_count += issues.len() as u64;
    let room = MAX_ISSUES.saturating_sub(report.issues.len());
    report.issues.extend(issues.iter().take(room).cloned());
}

fn push_field_bind_sep(
    b: &mut sqlx::query_builder::Separated<'_, '_, sqlx::Postgres, &str>,
    value: FieldValue,
) {
    match value {
        FieldValue::Text(v) => b.push_bind(v),
        FieldValue::Int(v) => b.push_bind(v),
        FieldValue::Bool(v) => b.push_bind(v),
        FieldValue::TextArray(v) => b.push_bind(v),
    };
}

/// Blocking decode loop: header-mapped CSV reader, per-row transform, rows
/// pushed through the bounded channel. All failures travel the channel; a
/// closed channel (inserter gone) just ends the loop.
fn decode_loop(
    path: PathBuf,
    desc: &'static KindDescriptor,
    enrichment_allowed: Vec<String>,
    tx: mpsc::Sender<Result<ImportRow, DecodeFailure>>,
) {
    let fail = |line: u64, message: String| DecodeFailure { line, message };

    let mut reader = match csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(&path)
    {
        Ok(reader) => reader,
        Err(e) => {
            let _ = tx.blocking_send(Err(fail(0, e.to_string())));
            return;
        }
    };

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            let _ = tx.blocking_send(Err(fail(1, e.to_string())));
            return;
        }
    };

    // Map the column contract onto the uploaded header set once.
    let mut column_idx: Vec<Option<usize>> = Vec::with_capacity(desc.csv_columns.len());
    for column in desc.csv_columns {
        column_idx.push(headers.iter().position(|h| h == column.header));
    }
    // The import key is part of every kind's column contract.
    let Some(key_pos) = desc
        .csv_columns
        .iter()
        .position(|c| c.field == desc.import_key)
    else {
        let _ = tx.blocking_send(Err(fail(0, "import key missing from column contract".into())));
        return;
    };
    if column_idx[key_pos].is_none() {
        let _ = tx.blocking_send(Err(fail(
            1,
            format!("missing required column '{}'", desc.csv_columns[key_pos].header),
        )));
        return;
    }
    let enrichment_idx = desc
        .enrichment
        .and_then(|e| headers.iter().position(|h| h == e.header));

    for (i, record) in reader.records().enumerate() {
        // 1-based, counting the header row.
        let line = i as u64 + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                let _ = tx.blocking_send(Err(fail(line, e.to_string())));
                return;
            }
        };

        match transform_record(
            desc,
            &record,
            &column_idx,
            key_pos,
            enrichment_idx,
            &enrichment_allowed,
            line,
        ) {
            Some(row) => {
                if tx.blocking_send(Ok(row)).is_err() {
                    return;
                }
            }
            None => continue,
        }
    }
}

/// Transform one record; `None` skips the row (blank key or guidance row)
fn transform_record(
    desc: &KindDescriptor,
    record: &csv::StringRecord,
    column_idx: &[Option<usize>],
    key_pos: usize,
    enrichment_idx: Option<usize>,
    enrichment_allowed: &[String],
    line: u64,
) -> Option<ImportRow> {
    let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("");

    let key = cell(column_idx[key_pos]);
    if key.is_empty() || key.starts_with(GUIDANCE_MARKER) {
        return None;
    }

    let mut issues = Vec::new();
    let mut values = Vec::with_capacity(desc.csv_columns.len());
    for (column, idx) in desc.csv_columns.iter().zip(column_idx) {
        values.push(parse_cell(column, cell(*idx), line, &mut issues));
    }

    let enrichment = match enrichment_idx {
        Some(idx) => parse_multi_cell(
            cell(Some(idx)),
            enrichment_allowed,
            desc.enrichment.map(|e| e.header).unwrap_or_default(),
            line,
            &mut issues,
        ),
        None => Vec::new(),
    };

    Some(ImportRow {
        key: key.to_string(),
        values,
        enrichment,
        issues,
    })
}

fn parse_cell(
    column: &CsvColumn,
    raw: &str,
    line: u64,
    issues: &mut Vec<RowIssue>,
) -> FieldValue {
    match column.parse {
        CellParse::Text => FieldValue::Text(non_empty(raw)),
        CellParse::Int => {
            if raw.is_empty() {
                FieldValue::Int(None)
            } else {
                match raw.parse::<i64>() {
                    Ok(n) => FieldValue::Int(Some(n)),
                    Err(_) => {
                        issues.push(RowIssue {
                            line,
                            field: column.header.to_string(),
                            message: format!("'{raw}' is not an integer, stored as empty"),
                        });
                        FieldValue::Int(None)
                    }
                }
            }
        }
        CellParse::Bool => FieldValue::Bool(parse_bool_cell(raw, column.header, line, issues)),
        CellParse::Multi { allowed } => {
            let allowed: Vec<String> = allowed.iter().map(|s| s.to_string()).collect();
            FieldValue::TextArray(parse_multi_cell(raw, &allowed, column.header, line, issues))
        }
    }
}

fn non_empty(raw: &str) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// yes/true/1 and no/false/0 (case-insensitive); anything else becomes null
fn parse_bool_cell(
    raw: &str,
    field: &str,
    line: u64,
    issues: &mut Vec<RowIssue>,
) -> Option<bool> {
    if raw.is_empty() {
        return None;
    }
    match raw.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => {
            issues.push(RowIssue {
                line,
                field: field.to_string(),
                message: format!("'{raw}' is not a yes/no value, stored as empty"),
            });
            None
        }
    }
}

/// Split a multi-value cell and keep only allow-listed tokens. Both the
/// comma and the export join separator are accepted, so exported files
/// re-import as-is. Unknown tokens are dropped, not rejected, but each drop
/// is logged. An empty allow-list means unconstrained.
fn parse_multi_cell(
    raw: &str,
    allowed: &[String],
    field: &str,
    line: u64,
    issues: &mut Vec<RowIssue>,
) -> Vec<String> {
    raw.split([',', '|'])
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| {
            if allowed.is_empty() || allowed.iter().any(|a| a == token) {
                Some(token.to_string())
            } else {
                issues.push(RowIssue {
                    line,
                    field: field.to_string(),
                    message: format!("'{token}' is not in the allowed set, dropped"),
                });
                None
            }
        })
        .collect()
}
