//! Integration tests for bulk CSV import/export
//!
//! Covers batching behavior, duplicate suppression, enrichment linking,
//! decode-failure partial success, code backfill, and export formatting.

use std::io::Write;
use std::path::PathBuf;

use sqlx::PgPool;
use tempfile::TempPath;

use riskledger::bulk::{csv_template, BulkExportPipeline, BulkImportPipeline};
use riskledger::catalog::MetadataCatalog;
use riskledger::codes::CodeAssigner;
use riskledger::error::RegistryError;
use riskledger::kinds::{descriptor, EntityKind};
use riskledger::models::NewMetaKey;

/// Write CSV content to a temp file the pipeline can consume. The guard
/// keeps the file alive until the import finishes; the pipeline itself
/// removes the file on success.
fn spool(contents: &str) -> (TempPath, PathBuf) {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(contents.as_bytes()).unwrap();
    let path = tmp.into_temp_path();
    let buf = path.to_path_buf();
    (path, buf)
}

async fn seed_industry_key(pool: &PgPool) -> i32 {
    MetadataCatalog::new(pool.clone())
        .create_key(NewMetaKey {
            name: "industry".to_string(),
            input_type: "multiselect".to_string(),
            applies_to: vec![],
            supported_values: vec!["Finance".to_string(), "Retail".to_string()],
        })
        .await
        .unwrap()
        .id
}

#[sqlx::test(migrations = "./migrations")]
async fn import_inserts_rows_and_backfills_codes(pool: PgPool) {
    let (_guard, path) = spool(
        "Name,Description,Asset Type,Location,Critical\n\
         db-server,Prod database,server,DC1,yes\n\
         crm,Customer records,application,Cloud,no\n",
    );

    let pipeline = BulkImportPipeline::new(pool.clone(), 100, 60);
    let report = pipeline.import(EntityKind::Asset, path).await.unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.flushed, 2);
    assert_eq!(report.skipped_duplicates, 0);
    assert_eq!(report.issue_count, 0);
    assert_eq!(report.codes_assigned, 2);

    let rows: Vec<(i64, Option<String>, Option<bool>)> =
        sqlx::query_as("SELECT id, code, critical FROM assets ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(rows.len(), 2);
    for (id, code, _) in &rows {
        assert_eq!(code.as_deref(), Some(format!("AST{id:05}").as_str()));
    }
    assert_eq!(rows[0].2, Some(true));
    assert_eq!(rows[1].2, Some(false));
}

#[sqlx::test(migrations = "./migrations")]
async fn duplicates_are_skipped_not_rejected(pool: PgPool) {
    let pipeline = BulkImportPipeline::new(pool.clone(), 100, 60);

    let (_g1, path) = spool(
        "Name,Description,Asset Type,Location,Critical\n\
         db-server,first,server,DC1,yes\n\
         db-server,second,server,DC2,no\n",
    );
    let report = pipeline.import(EntityKind::Asset, path).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped_duplicates, 1);

    // Re-importing the same file is a no-op.
    let (_g2, path) = spool(
        "Name,Description,Asset Type,Location,Critical\n\
         db-server,first,server,DC1,yes\n",
    );
    let report = pipeline.import(EntityKind::Asset, path).await.unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.skipped_duplicates, 1);

    let (desc,): (String,) = sqlx::query_as("SELECT description FROM assets WHERE name = $1")
        .bind("db-server")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(desc, "first");
}

#[sqlx::test(migrations = "./migrations")]
async fn batches_flush_at_the_configured_size(pool: PgPool) {
    let (_guard, path) = spool(
        "Name,Description,Asset Type,Location,Critical\n\
         a1,,server,,\n\
         a2,,server,,\n\
         a3,,server,,\n",
    );

    let pipeline = BulkImportPipeline::new(pool, 2, 60);
    let report = pipeline.import(EntityKind::Asset, path).await.unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.batches, 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn enrichment_values_link_to_inserted_rows(pool: PgPool) {
    let key_id = seed_industry_key(&pool).await;

    let (_guard, path) = spool(
        "Name,Description,Asset Type,Location,Critical,Industry\n\
         core-banking,,application,,yes,\"Finance,Retail\"\n\
         pos-terminal,,device,,no,Retail\n\
         standalone,,device,,no,\n",
    );

    let pipeline = BulkImportPipeline::new(pool.clone(), 100, 60);
    let report = pipeline.import(EntityKind::Asset, path).await.unwrap();
    assert_eq!(report.inserted, 3);

    let rows: Vec<(String, Vec<String>)> = sqlx::query_as(
        "SELECT a.name, ea.values FROM entity_attributes ea \
         JOIN assets a ON a.id = ea.entity_id \
         WHERE ea.entity_kind = 'asset' AND ea.meta_key_id = $1 \
         ORDER BY a.name",
    )
    .bind(key_id)
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "core-banking");
    assert_eq!(rows[0].1, vec!["Finance", "Retail"]);
    assert_eq!(rows[1].0, "pos-terminal");
    assert_eq!(rows[1].1, vec!["Retail"]);
}

#[sqlx::test(migrations = "./migrations")]
async fn unknown_tokens_and_bad_cells_become_issues(pool: PgPool) {
    seed_industry_key(&pool).await;

    let (_guard, path) = spool(
        "Name,Description,Asset Type,Location,Critical,Industry\n\
         srv,,server,,maybe,\"Finance,Aerospace\"\n",
    );

    let pipeline = BulkImportPipeline::new(pool.clone(), 100, 60);
    let report = pipeline.import(EntityKind::Asset, path).await.unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.issue_count, 2);
    assert!(report.issues.iter().any(|i| i.field == "Critical"));
    assert!(report.issues.iter().any(|i| i.message.contains("Aerospace")));

    let (critical,): (Option<bool>,) =
        sqlx::query_as("SELECT critical FROM assets WHERE name = 'srv'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(critical, None);
}

#[sqlx::test(migrations = "./migrations")]
async fn decode_failure_keeps_committed_batches(pool: PgPool) {
    // Third data row has too many cells; the reader rejects it after the
    // first batch of two has already committed.
    let (_guard, path) = spool(
        "Name,Description,Asset Type,Location,Critical\n\
         a1,,server,,\n\
         a2,,server,,\n\
         a3,,server,,,extra-cell\n",
    );

    let pipeline = BulkImportPipeline::new(pool.clone(), 2, 60);
    let err = pipeline.import(EntityKind::Asset, path).await.unwrap_err();

    match err {
        RegistryError::Decode { line, inserted, .. } => {
            assert_eq!(line, 4);
            assert_eq!(inserted, 2);
        }
        other => panic!("expected Decode error, got {other}"),
    }

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM assets")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn missing_key_column_aborts_before_any_insert(pool: PgPool) {
    let (_guard, path) = spool("Title,Description\nx,y\n");

    let pipeline = BulkImportPipeline::new(pool.clone(), 100, 60);
    let err = pipeline.import(EntityKind::Asset, path).await.unwrap_err();
    assert!(matches!(err, RegistryError::Decode { inserted: 0, .. }));
}

#[sqlx::test(migrations = "./migrations")]
async fn template_uploads_cleanly(pool: PgPool) {
    seed_industry_key(&pool).await;
    let template = csv_template(EntityKind::Process).unwrap();
    let (_guard, path) = spool(std::str::from_utf8(&template).unwrap());

    let pipeline = BulkImportPipeline::new(pool, 100, 60);
    let report = pipeline.import(EntityKind::Process, path).await.unwrap();

    // The guidance sentinel row is skipped, so a pristine template is empty.
    assert_eq!(report.inserted, 0);
    assert_eq!(report.flushed, 0);
    assert_eq!(report.issue_count, 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn code_backfill_is_idempotent(pool: PgPool) {
    sqlx::query("INSERT INTO assets (name) VALUES ('one'), ('two')")
        .execute(&pool)
        .await
        .unwrap();

    let desc = descriptor(EntityKind::Asset);
    assert_eq!(CodeAssigner::backfill_codes(&pool, desc).await.unwrap(), 2);
    assert_eq!(CodeAssigner::backfill_codes(&pool, desc).await.unwrap(), 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn export_streams_header_plus_rows(pool: PgPool) {
    sqlx::query(
        "INSERT INTO processes (name, description, owner, departments, status) VALUES \
         ('payroll', 'Monthly pay run', 'Alice', ARRAY['Finance','HR'], 'published')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let pipeline = BulkExportPipeline::new(pool, 60);
    let mut rx = pipeline.export(EntityKind::Process).await.unwrap();

    let mut bytes = Vec::new();
    while let Some(chunk) = rx.recv().await {
        bytes.extend(chunk.unwrap());
    }

    let text = String::from_utf8(bytes).unwrap();
    let mut lines = text.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("ID,Code,Name,Description,Owner,Criticality,Departments"));

    let row = lines.next().unwrap();
    assert!(row.contains("payroll"));
    assert!(row.contains("Finance|HR"));
    assert!(row.contains("published"));
    assert!(lines.next().is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn export_orders_newest_first(pool: PgPool) {
    sqlx::query(
        "INSERT INTO assets (name, created_at) VALUES \
         ('older', now() - interval '1 hour'), ('newer', now())",
    )
    .execute(&pool)
    .await
    .unwrap();

    let pipeline = BulkExportPipeline::new(pool, 60);
    let mut rx = pipeline.export(EntityKind::Asset).await.unwrap();

    let mut bytes = Vec::new();
    while let Some(chunk) = rx.recv().await {
        bytes.extend(chunk.unwrap());
    }
    let text = String::from_utf8(bytes).unwrap();
    let data: Vec<&str> = text.lines().skip(1).collect();
    assert!(data[0].contains("newer"));
    assert!(data[1].contains("older"));
}

#[sqlx::test(migrations = "./migrations")]
async fn exported_file_reimports_without_duplicates(pool: PgPool) {
    let (_g, path) = spool(
        "Name,Description,Asset Type,Location,Critical\n\
         db-server,Prod database,server,DC1,yes\n",
    );
    let importer = BulkImportPipeline::new(pool.clone(), 100, 60);
    importer.import(EntityKind::Asset, path).await.unwrap();

    let exporter = BulkExportPipeline::new(pool.clone(), 60);
    let mut rx = exporter.export(EntityKind::Asset).await.unwrap();
    let mut bytes = Vec::new();
    while let Some(chunk) = rx.recv().await {
        bytes.extend(chunk.unwrap());
    }

    // The export carries extra columns (ID, Code, Status, timestamps); the
    // importer maps headers by name and ignores what it does not know.
    let (_g2, path) = spool(std::str::from_utf8(&bytes).unwrap());
    let report = importer.import(EntityKind::Asset, path).await.unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.skipped_duplicates, 1);
    assert_eq!(report.issue_count, 0);
}
