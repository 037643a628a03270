//! REST API routes for entity CRUD and faceted listing
//!
//! All database access goes through EntityRegistry.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, put},
    Router,
};
use serde::Deserialize;

use crate::error::RegistryResult;
use crate::filter::ListQuery;
use crate::models::{
    AttributeAssignment, CreateEntityRequest, EntityRecord, EntityStatus, ListPage,
    UpdateEntityRequest,
};
use crate::registry::EntityRegistry;

use super::{parse_kind, ApiState};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: EntityStatus,
}

// ============================================================================
// Route Handlers
// ============================================================================

/// GET /api/:kind
/// Faceted, paginated listing: `?q=&status=&filters=key1:v1,v2;key2:v3`
async fn list_entities(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    Query(query): Query<ListQuery>,
) -> RegistryResult<Json<ListPage>> {
    let kind = parse_kind(&kind)?;
    let registry = EntityRegistry::new(state.pool);
    Ok(Json(registry.list(kind, &query).await?))
}

/// POST /api/:kind
async fn create_entity(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    Json(request): Json<CreateEntityRequest>,
) -> RegistryResult<Json<EntityRecord>> {
    let kind = parse_kind(&kind)?;
    let registry = EntityRegistry::new(state.pool);
    Ok(Json(registry.create(kind, request).await?))
}

/// GET /api/:kind/:id
async fn get_entity(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, i64)>,
) -> RegistryResult<Json<EntityRecord>> {
    let kind = parse_kind(&kind)?;
    let registry = EntityRegistry::new(state.pool);
    Ok(Json(registry.get(kind, id).await?))
}

/// GET /api/:kind/:id/attributes
async fn get_entity_attributes(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, i64)>,
) -> RegistryResult<Json<Vec<AttributeAssignment>>> {
    let kind = parse_kind(&kind)?;
    let registry = EntityRegistry::new(state.pool);
    Ok(Json(registry.get_attributes(kind, id).await?))
}

/// PATCH /api/:kind/:id
async fn update_entity(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, i64)>,
    Json(request): Json<UpdateEntityRequest>,
) -> RegistryResult<Json<EntityRecord>> {
    let kind = parse_kind(&kind)?;
    let registry = EntityRegistry::new(state.pool);
    Ok(Json(registry.update(kind, id, request).await?))
}

/// PUT /api/:kind/:id/status
async fn update_entity_status(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, i64)>,
    Json(request): Json<StatusUpdateRequest>,
) -> RegistryResult<Json<EntityRecord>> {
    let kind = parse_kind(&kind)?;
    let registry = EntityRegistry::new(state.pool);
    Ok(Json(registry.update_status(kind, id, request.status).await?))
}

/// DELETE /api/:kind/:id
async fn delete_entity(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, i64)>,
) -> RegistryResult<Json<serde_json::Value>> {
    let kind = parse_kind(&kind)?;
    let registry = EntityRegistry::new(state.pool);
    registry.delete(kind, id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// GET /api/health
async fn health_check(State(state): State<ApiState>) -> RegistryResult<Json<serde_json::Value>> {
    sqlx::query("SELECT 1").execute(&state.pool).await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "service": "riskledger",
    })))
}

// ============================================================================
// Router Factory
// ============================================================================

/// Create the entity router with all CRUD and listing endpoints
pub fn create_entity_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/:kind", get(list_entities).post(create_entity))
        .route(
            "/api/:kind/:id",
            get(get_entity).patch(update_entity).delete(delete_entity),
        )
        .route("/api/:kind/:id/attributes", get(get_entity_attributes))
        .route("/api/:kind/:id/status", put(update_entity_status))
        .with_state(state)
}
