//! REST API routes for bulk CSV exchange
//!
//! Uploads are spooled to a temp file before the import pipeline runs, so a
//! slow client cannot hold a database transaction open. Exports stream
//! straight from the pipeline's channel into the response body.

use std::io::Write;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::header,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use tempfile::NamedTempFile;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::bulk::{csv_template, BulkExportPipeline, BulkImportPipeline, ImportReport};
use crate::error::{RegistryError, RegistryResult};
use crate::kinds::descriptor;

use super::{parse_kind, ApiState};

// ============================================================================
// Route Handlers
// ============================================================================

/// POST /api/:kind/import
/// Multipart upload with a single `file` field holding the CSV
async fn import_entities(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    mut multipart: Multipart,
) -> RegistryResult<Json<ImportReport>> {
    let kind = parse_kind(&kind)?;

    let mut spooled: Option<NamedTempFile> = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| RegistryError::Validation(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        if let Some(content_type) = field.content_type() {
            if !matches!(content_type, "text/csv" | "application/csv" | "application/octet-stream")
            {
                return Err(RegistryError::Validation(format!(
                    "expected a CSV upload, got {content_type}"
                )));
            }
        }

        let mut tmp = NamedTempFile::new()?;
        let mut written = 0usize;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| RegistryError::Validation(e.to_string()))?
        {
            written += chunk.len();
            if written > state.config.import_max_bytes {
                return Err(RegistryError::PayloadTooLarge {
                    limit: state.config.import_max_bytes,
                });
            }
            tmp.write_all(&chunk)?;
        }
        tmp.flush()?;
        info!("Spooled {written}-byte {kind} import upload");
        spooled = Some(tmp);
        break;
    }

    let tmp = spooled.ok_or_else(|| {
        RegistryError::Validation("multipart upload must contain a 'file' field".to_string())
    })?;

    let pipeline = BulkImportPipeline::new(
        state.pool,
        state.config.import_batch_size,
        state.config.bulk_timeout_secs,
    );
    // The pipeline removes the file on success; the temp guard cleans up on
    // the error paths.
    let path = tmp.into_temp_path();
    let report = pipeline.import(kind, path.to_path_buf()).await?;
    Ok(Json(report))
}

/// GET /api/:kind/export
/// Streams the full table as a CSV attachment
async fn export_entities(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
) -> RegistryResult<Response> {
    let kind = parse_kind(&kind)?;
    let pipeline = BulkExportPipeline::new(state.pool, state.config.bulk_timeout_secs);
    let rx = pipeline.export(kind).await?;

    let body = Body::from_stream(ReceiverStream::new(rx));
    csv_response(descriptor(kind).table, body)
}

/// GET /api/:kind/template
/// Import template: header row plus one guidance row
async fn download_template(Path(kind): Path<String>) -> RegistryResult<Response> {
    let kind = parse_kind(&kind)?;
    let bytes = csv_template(kind)?;
    csv_response(&format!("{}_template", descriptor(kind).table), Body::from(bytes))
}

fn csv_response(stem: &str, body: Body) -> RegistryResult<Response> {
    Response::builder()
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{stem}.csv\""),
        )
        .body(body)
        .map_err(|e| RegistryError::Internal(e.to_string()))
}

// ============================================================================
// Router Factory
// ============================================================================

/// Create the bulk exchange router
pub fn create_bulk_router(state: ApiState) -> Router {
    let upload_limit = state.config.import_max_bytes;
    Router::new()
        .route("/api/:kind/import", post(import_entities))
        .route("/api/:kind/export", get(export_entities))
        .route("/api/:kind/template", get(download_template))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}
