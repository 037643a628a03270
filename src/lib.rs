//! Riskledger - Faceted Entity Registry
//!
//! This crate provides the record-keeping core for a risk-management
//! register: four entity kinds (processes, risk scenarios, assets, threat
//! controls) sharing one generic engine for metadata-validated attributes,
//! faceted list queries, and bulk CSV exchange.
//!
//! ## Architecture
//! All list traffic flows through the faceted query compiler:
//! query string -> facet parse -> catalog resolution -> parameterized SQL
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use riskledger::filter::ListQuery;
//! use riskledger::kinds::EntityKind;
//! use riskledger::registry::EntityRegistry;
//!
//! # async fn demo(pool: sqlx::PgPool) -> anyhow::Result<()> {
//! let registry = EntityRegistry::new(pool);
//! let page = registry
//!     .list(EntityKind::Asset, &ListQuery::default())
//!     .await?;
//! println!("{} assets", page.total);
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Runtime configuration
pub mod config;

// Static per-kind contracts (tables, columns, facets, CSV formats)
pub mod kinds;

// Shared request/response types
pub mod models;

// Metadata dictionary and attribute validation
pub mod catalog;

// Attribute assignment storage
pub mod attributes;

// Faceted list-query parsing and compilation
pub mod filter;

// Display-code backfill
pub mod codes;

// Typed entity CRUD over the generic engine
pub mod registry;

// Bulk CSV exchange
pub mod bulk;

// HTTP surface (when enabled)
#[cfg(feature = "server")]
pub mod api;

pub use error::{RegistryError, RegistryResult};
pub use kinds::EntityKind;
pub use registry::EntityRegistry;
