//! REST API routes for metadata catalog administration
//!
//! All database access goes through MetadataCatalog.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};

use crate::catalog::MetadataCatalog;
use crate::error::{RegistryError, RegistryResult};
use crate::models::{MetaKey, NewMetaKey, UpdateMetaKey};

use super::{parse_kind, ApiState};

// ============================================================================
// Route Handlers
// ============================================================================

/// POST /api/meta-keys
async fn create_key(
    State(state): State<ApiState>,
    Json(request): Json<NewMetaKey>,
) -> RegistryResult<Json<MetaKey>> {
    let catalog = MetadataCatalog::new(state.pool);
    Ok(Json(catalog.create_key(request).await?))
}

/// GET /api/meta-keys/:id
async fn get_key(
    State(state): State<ApiState>,
    Path(id): Path<i32>,
) -> RegistryResult<Json<MetaKey>> {
    let catalog = MetadataCatalog::new(state.pool);
    let key = catalog
        .get_by_id(id)
        .await?
        .ok_or(RegistryError::MetadataNotFound { key_id: id })?;
    Ok(Json(key))
}

/// GET /api/meta-keys/for/:kind
/// Keys applicable to one entity kind (global keys included)
async fn list_keys_for_kind(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
) -> RegistryResult<Json<Vec<MetaKey>>> {
    let kind = parse_kind(&kind)?;
    let catalog = MetadataCatalog::new(state.pool);
    Ok(Json(catalog.list_for_kind(kind).await?))
}

/// PATCH /api/meta-keys/:id
async fn update_key(
    State(state): State<ApiState>,
    Path(id): Path<i32>,
    Json(request): Json<UpdateMetaKey>,
) -> RegistryResult<Json<MetaKey>> {
    let catalog = MetadataCatalog::new(state.pool);
    Ok(Json(catalog.update_key(id, request).await?))
}

/// DELETE /api/meta-keys/:id
/// Fails with 409 while any attribute assignment still references the key
async fn delete_key(
    State(state): State<ApiState>,
    Path(id): Path<i32>,
) -> RegistryResult<Json<serde_json::Value>> {
    let catalog = MetadataCatalog::new(state.pool);
    catalog.delete_key(id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ============================================================================
// Router Factory
// ============================================================================

/// Create the catalog administration router
pub fn create_catalog_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/meta-keys", post(create_key))
        .route(
            "/api/meta-keys/:id",
            get(get_key).patch(update_key).delete(delete_key),
        )
        .route("/api/meta-keys/for/:kind", get(list_keys_for_kind))
        .with_state(state)
}
