//! Faceted query compiler
//!
//! Turns a resolved [`FilterSpec`] into one bound SQL predicate. Identifiers
//! (table, columns) come exclusively from the static kind descriptor;
//! every value goes through `push_bind`. Mapping-table facets compile to one
//! `id IN (...)` sub-selection per key, so ANDing them yields the
//! set-intersection semantics: an entity must satisfy every requested key,
//! but only one of the requested values within each key.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::catalog::MetadataCatalog;
use crate::error::{RegistryError, RegistryResult};
use crate::kinds::{KindDescriptor, SortDirection};
use crate::models::{EntityRecord, EntityStatus, ListPage};

use super::{parse_facet_expression, parse_status_list, Facet, ListQuery, NativeFacet};

/// Fully resolved filter input, ready to compile
#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub search: Option<String>,
    pub statuses: Vec<EntityStatus>,
    pub native: Vec<NativeFacet>,
    pub mapped: Vec<Facet>,
    pub sort: (&'static str, SortDirection),
    pub page: i64,
    pub limit: i64,
}

pub struct FacetedQueryCompiler {
    desc: &'static KindDescriptor,
}

impl FacetedQueryCompiler {
    pub fn new(desc: &'static KindDescriptor) -> Self {
        Self { desc }
    }

    /// Resolve raw query parameters into a [`FilterSpec`].
    ///
    /// Facet keys are partitioned here: names matching a native column stay
    /// native; everything else must resolve through the catalog. An
    /// unresolvable key is a hard failure so callers never silently serve an
    /// empty result for a facet they should not be offering.
    pub async fn resolve(
        &self,
        catalog: &MetadataCatalog,
        query: &ListQuery,
    ) -> RegistryResult<FilterSpec> {
        let statuses = match query.status.as_deref() {
            Some(raw) => parse_status_list(raw).map_err(RegistryError::Validation)?,
            None => Vec::new(),
        };

        let mut native = Vec::new();
        let mut mapped = Vec::new();
        for raw in parse_facet_expression(query.filters.as_deref().unwrap_or("")) {
            if let Some((column, shape)) = self.desc.native_facet(&raw.key) {
                // The interpolated identifier comes from the descriptor's
                // closed list, never from the request.
                native.push(NativeFacet {
                    column,
                    shape,
                    values: raw.values,
                });
                continue;
            }

            let key = if raw.key.chars().all(|c| c.is_ascii_digit()) {
                // Numeric shape: treat as an explicit key id.
                let key_id: i32 = raw.key.parse().map_err(|_| {
                    RegistryError::Validation(format!("invalid meta_data_key id '{}'", raw.key))
                })?;
                catalog
                    .get_by_id(key_id)
                    .await?
                    .ok_or(RegistryError::MetadataNotFound { key_id })?
            } else {
                catalog
                    .get_by_name(&raw.key)
                    .await?
                    .ok_or_else(|| RegistryError::UnknownFacetKey {
                        name: raw.key.clone(),
                    })?
            };
            mapped.push(Facet {
                meta_key_id: key.id,
                values: raw.values,
            });
        }

        let sort_dir = query.sort_dir.as_deref().and_then(|d| match d {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        });
        let sort = self.desc.resolve_sort(query.sort_by.as_deref(), sort_dir);

        Ok(FilterSpec {
            search: query.q.clone().filter(|s| !s.trim().is_empty()),
            statuses,
            native,
            mapped,
            sort,
            page: query.page.unwrap_or(1).max(1),
            limit: query.limit.unwrap_or(25).clamp(1, 500),
        })
    }

    /// Append the WHERE clause groups to a query builder. Shared between the
    /// page query and the COUNT query so both see the same predicate.
    fn push_predicate<'a>(&self, builder: &mut QueryBuilder<'a, Postgres>, spec: &'a FilterSpec) {
        builder.push(" WHERE 1=1");

        if let Some(pattern) = &spec.search {
            let like = format!("%{}%", escape_like(pattern));
            builder.push(" AND (");
            for (i, column) in self.desc.search_columns.iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                builder.push(*column).push(" ILIKE ").push_bind(like.clone());
            }
            builder.push(")");
        }

        if !spec.statuses.is_empty() {
            let statuses: Vec<String> =
                spec.statuses.iter().map(|s| s.as_str().to_string()).collect();
            builder.push(" AND status = ANY(").push_bind(statuses).push(")");
        }

        for facet in &spec.native {
            match facet.shape {
                crate::kinds::NativeFacetKind::Array => {
                    builder
                        .push(" AND ")
                        .push(facet.column)
                        .push(" && ")
                        .push_bind(facet.values.clone());
                }
                crate::kinds::NativeFacetKind::Scalar => {
                    builder
                        .push(" AND ")
                        .push(facet.column)
                        .push(" = ANY(")
                        .push_bind(facet.values.clone())
                        .push(")");
                }
            }
        }

        for facet in &spec.mapped {
            builder
                .push(" AND id IN (SELECT entity_id FROM entity_attributes WHERE entity_kind = ")
                .push_bind(self.desc.kind.as_str())
                .push(" AND meta_key_id = ")
                .push_bind(facet.meta_key_id)
                .push(r#" AND "values" && "#)
                .push_bind(facet.values.clone())
                .push(")");
        }
    }

    /// Run the compiled query and return one page plus the total count
    pub async fn list(&self, pool: &PgPool, spec: &FilterSpec) -> RegistryResult<ListPage> {
        let mut count_builder = QueryBuilder::new(format!(
            "SELECT COUNT(*) AS total FROM {}",
            self.desc.table
        ));
        self.push_predicate(&mut count_builder, spec);
        let total: i64 = count_builder
            .build()
            .fetch_one(pool)
            .await?
            .try_get("total")
            .map_err(|e| RegistryError::Internal(e.to_string()))?;

        let mut builder = QueryBuilder::new(format!(
            "SELECT id, code, name, description, status, created_at, updated_at, \
             to_jsonb({t}.*) AS row_json FROM {t}",
            t = self.desc.table
        ));
        self.push_predicate(&mut builder, spec);
        builder
            .push(" ORDER BY ")
            .push(spec.sort.0)
            .push(" ")
            .push(spec.sort.1.as_sql())
            .push(" LIMIT ")
            .push_bind(spec.limit)
            .push(" OFFSET ")
            .push_bind(page_offset(spec.page, spec.limit));

        let rows = builder.build().fetch_all(pool).await?;
        let data = rows
            .into_iter()
            .map(decode_entity_row)
            .collect::<RegistryResult<Vec<_>>>()?;

        let total_pages = if total == 0 {
            0
        } else {
            (total + spec.limit - 1) / spec.limit
        };

        Ok(ListPage {
            data,
            total,
            page: spec.page,
            limit: spec.limit,
            total_pages,
        })
    }
}

/// OFFSET for a 1-based page. Saturates so an absurd `page` degrades to an
/// empty page instead of overflowing.
fn page_offset(page: i64, limit: i64) -> i64 {
    page.saturating_sub(1).saturating_mul(limit)
}

/// Escape LIKE metacharacters so search text matches literally instead of
/// acting as a pattern.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

const COMMON_COLUMNS: &[&str] = &[
    "id",
    "code",
    "name",
    "description",
    "status",
    "created_at",
    "updated_at",
];

/// Decode a generic entity row: shared columns typed, kind columns as JSON
pub(crate) fn decode_entity_row(row: PgRow) -> RegistryResult<EntityRecord> {
    let internal = |e: sqlx::Error| RegistryError::Internal(e.to_string());

    let status_raw: String = row.try_get("status").map_err(internal)?;
    let status: EntityStatus = status_raw
        .parse()
        .map_err(|e: String| RegistryError::Internal(e))?;

    let mut extra: serde_json::Value = row.try_get("row_json").map_err(internal)?;
    if let Some(map) = extra.as_object_mut() {
        for column in COMMON_COLUMNS {
            map.remove(*column);
        }
    }

    Ok(EntityRecord {
        id: row.try_get("id").map_err(internal)?,
        code: row.try_get("code").map_err(internal)?,
        name: row.try_get("name").map_err(internal)?,
        description: row.try_get("description").map_err(internal)?,
        status,
        extra,
        created_at: row.try_get("created_at").map_err(internal)?,
        updated_at: row.try_get("updated_at").map_err(internal)?,
    })
}
