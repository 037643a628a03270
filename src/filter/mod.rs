//! Faceted filtering
//!
//! Raw list-query parameters arrive as text (`key1:v1,v2;key2:v3` facet
//! expressions, comma-separated status lists) and are resolved into a
//! [`FilterSpec`] that the compiler turns into one bound SQL predicate.

mod compiler;

pub use compiler::{FacetedQueryCompiler, FilterSpec};
pub(crate) use compiler::decode_entity_row as compiler_decode;

use serde::Deserialize;

use crate::kinds::NativeFacetKind;
use crate::models::EntityStatus;

/// Raw list-endpoint query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    /// Free-text search pattern
    pub q: Option<String>,
    /// Comma-separated status allow-list
    pub status: Option<String>,
    /// Facet expression, `key1:v1,v2;key2:v3`
    pub filters: Option<String>,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// A facet as parsed from the text encoding, before catalog resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFacet {
    pub key: String,
    pub values: Vec<String>,
}

/// A facet resolved to a metadata key id
#[derive(Debug, Clone)]
pub struct Facet {
    pub meta_key_id: i32,
    pub values: Vec<String>,
}

/// A facet that targets a native entity column
#[derive(Debug, Clone)]
pub struct NativeFacet {
    pub column: &'static str,
    pub shape: NativeFacetKind,
    pub values: Vec<String>,
}

/// Parse the `key1:v1,v2;key2:v3` facet expression.
///
/// Permissive by contract: segments without a colon, empty keys, and empty
/// value lists are dropped rather than rejected.
pub fn parse_facet_expression(expr: &str) -> Vec<RawFacet> {
    expr.split(';')
        .filter_map(|segment| {
            let (key, values) = segment.split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let values: Vec<String> = values
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            if values.is_empty() {
                return None;
            }
            Some(RawFacet {
                key: key.to_string(),
                values,
            })
        })
        .collect()
}

/// Parse a comma-separated status allow-list. Unlike facet segments, a token
/// that names no status is a caller error, not a droppable segment.
pub fn parse_status_list(raw: &str) -> Result<Vec<EntityStatus>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect()
}
