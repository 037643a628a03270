//! REST API surface
//!
//! Route modules follow one pattern: a router factory taking shared state,
//! handlers returning `Result<_, RegistryError>` so every error maps to its
//! HTTP status in one place.

mod bulk_routes;
mod catalog_routes;
mod entity_routes;

use std::str::FromStr;

use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::RegistryError;
use crate::kinds::EntityKind;

#[derive(Clone)]
pub struct ApiState {
    pub pool: PgPool,
    pub config: Config,
}

/// Create the full application router
pub fn create_router(pool: PgPool, config: Config) -> Router {
    let state = ApiState { pool, config };
    Router::new()
        .merge(entity_routes::create_entity_router(state.clone()))
        .merge(catalog_routes::create_catalog_router(state.clone()))
        .merge(bulk_routes::create_bulk_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Parse the `:kind` path segment, rejecting unknown kinds with a 400
fn parse_kind(raw: &str) -> Result<EntityKind, RegistryError> {
    EntityKind::from_str(raw).map_err(RegistryError::Validation)
}
