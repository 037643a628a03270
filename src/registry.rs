//! Entity registry service - generic CRUD over the four entity kinds
//!
//! One service parameterized by the kind descriptor replaces four
//! hand-copied per-kind services. Create and update wrap their multi-table
//! writes (entity row + attribute rows) in one transaction: all-or-nothing,
//! rolled back on any validation or constraint failure.

use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use crate::attributes::AttributeStore;
use crate::catalog::MetadataCatalog;
use crate::error::{RegistryError, RegistryResult};
use crate::filter::{FacetedQueryCompiler, ListQuery};
use crate::kinds::{descriptor, CellParse, EntityKind, KindDescriptor};
use crate::models::{
    AttributeAssignment, AttributeInput, CreateEntityRequest, EntityRecord, EntityStatus,
    ListPage, UpdateEntityRequest,
};

const RETURNING_TAIL: &str =
    "RETURNING id, code, name, description, status, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct EntityRegistry {
    pool: PgPool,
    catalog: MetadataCatalog,
    attributes: AttributeStore,
}

impl EntityRegistry {
    pub fn new(pool: PgPool) -> Self {
        let catalog = MetadataCatalog::new(pool.clone());
        let attributes = AttributeStore::new(pool.clone());
        Self {
            pool,
            catalog,
            attributes,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn catalog(&self) -> &MetadataCatalog {
        &self.catalog
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    /// Create an entity with its attribute assignments in one transaction
    pub async fn create(
        &self,
        kind: EntityKind,
        request: CreateEntityRequest,
    ) -> RegistryResult<EntityRecord> {
        let desc = descriptor(kind);
        if request.name.trim().is_empty() {
            return Err(RegistryError::Validation("name must not be empty".into()));
        }

        // Attribute validation happens before any write; the transaction
        // below still guards against races on the unique columns.
        let assignments = self.validate_attributes(kind, &request.attributes).await?;

        let mut tx = self.pool.begin().await?;

        let mut builder = QueryBuilder::new(format!(
            "INSERT INTO {} (name, description, status",
            desc.table
        ));
        let fields = collect_kind_fields(desc, &request.fields)?;
        for (column, _) in &fields {
            builder.push(", ").push(*column);
        }
        builder.push(") VALUES (");
        builder.push_bind(request.name.clone());
        builder.push(", ").push_bind(request.description.clone());
        builder
            .push(", ")
            .push_bind(request.status.unwrap_or(EntityStatus::Draft).as_str());
        for (_, value) in &fields {
            builder.push(", ");
            push_field_bind(&mut builder, value.clone());
        }
        builder.push(format!(
            ") {RETURNING_TAIL}, to_jsonb({}.*) AS row_json",
            desc.table
        ));

        let row = builder.build().fetch_one(&mut *tx).await?;
        let record = crate::filter::compiler_decode(row)?;

        AttributeStore::replace_in_tx(&mut tx, kind, record.id, &assignments).await?;
        tx.commit().await?;

        info!("Created {kind} '{}' (id {})", record.name, record.id);
        Ok(record)
    }

    /// Fetch one entity by id
    pub async fn get(&self, kind: EntityKind, id: i64) -> RegistryResult<EntityRecord> {
        let desc = descriptor(kind);
        let sql = format!(
            "SELECT id, code, name, description, status, created_at, updated_at, \
             to_jsonb({t}.*) AS row_json FROM {t} WHERE id = $1",
            t = desc.table
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RegistryError::NotFound {
                what: "entity",
                id: id.to_string(),
            })?;
        crate::filter::compiler_decode(row)
    }

    /// Fetch an entity's attribute assignments
    pub async fn get_attributes(
        &self,
        kind: EntityKind,
        id: i64,
    ) -> RegistryResult<Vec<AttributeAssignment>> {
        self.attributes.for_entity(kind, id).await
    }

    /// Update core fields and, when present, fully replace attribute rows
    pub async fn update(
        &self,
        kind: EntityKind,
        id: i64,
        request: UpdateEntityRequest,
    ) -> RegistryResult<EntityRecord> {
        let desc = descriptor(kind);

        let assignments = match &request.attributes {
            Some(attrs) => Some(self.validate_attributes(kind, attrs).await?),
            None => None,
        };

        let mut tx = self.pool.begin().await?;

        let mut builder = QueryBuilder::new(format!("UPDATE {} SET updated_at = NOW()", desc.table));
        if let Some(name) = &request.name {
            builder.push(", name = ").push_bind(name.clone());
        }
        if let Some(description) = &request.description {
            builder.push(", description = ").push_bind(description.clone());
        }
        if let Some(status) = request.status {
            builder.push(", status = ").push_bind(status.as_str());
        }
        for (column, value) in collect_kind_fields(desc, &request.fields)? {
            builder.push(format!(", {column} = "));
            push_field_bind(&mut builder, value);
        }
        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(format!(
                " {RETURNING_TAIL}, to_jsonb({}.*) AS row_json",
                desc.table
            ));

        let row = builder
            .build()
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RegistryError::NotFound {
                what: "entity",
                id: id.to_string(),
            })?;
        let record = crate::filter::compiler_decode(row)?;

        if let Some(assignments) = assignments {
            AttributeStore::replace_in_tx(&mut tx, kind, id, &assignments).await?;
        }
        tx.commit().await?;

        info!("Updated {kind} '{}' (id {})", record.name, record.id);
        Ok(record)
    }

    /// Set only the status
    pub async fn update_status(
        &self,
        kind: EntityKind,
        id: i64,
        status: EntityStatus,
    ) -> RegistryResult<EntityRecord> {
        self.update(
            kind,
            id,
            UpdateEntityRequest {
                name: None,
                description: None,
                status: Some(status),
                fields: serde_json::Map::new(),
                attributes: None,
            },
        )
        .await
    }

    /// Delete an entity and its attribute rows
    pub async fn delete(&self, kind: EntityKind, id: i64) -> RegistryResult<()> {
        let desc = descriptor(kind);
        let mut tx = self.pool.begin().await?;

        AttributeStore::delete_in_tx(&mut tx, kind, id).await?;
        let sql = format!("DELETE FROM {} WHERE id = $1", desc.table);
        let result = sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound {
                what: "entity",
                id: id.to_string(),
            });
        }
        tx.commit().await?;

        info!("Deleted {kind} {id}");
        Ok(())
    }

    /// Compile and run a faceted list query
    pub async fn list(&self, kind: EntityKind, query: &ListQuery) -> RegistryResult<ListPage> {
        let compiler = FacetedQueryCompiler::new(descriptor(kind));
        let spec = compiler.resolve(&self.catalog, query).await?;
        compiler.list(&self.pool, &spec).await
    }

    async fn validate_attributes(
        &self,
        kind: EntityKind,
        attributes: &[AttributeInput],
    ) -> RegistryResult<Vec<(i32, Vec<String>)>> {
        let mut assignments = Vec::with_capacity(attributes.len());
        for attr in attributes {
            let key = self
                .catalog
                .validate_attribute(kind, attr.meta_data_key_id, attr.values.as_deref())
                .await?;
            // Both checked by validate_attribute.
            let values = attr.values.clone().unwrap_or_default();
            assignments.push((key.id, values));
        }
        Ok(assignments)
    }
}

/// A kind-specific column value coerced from the request's JSON `fields` map
#[derive(Debug, Clone)]
pub(crate) enum FieldValue {
    Text(Option<String>),
    Int(Option<i64>),
    Bool(Option<bool>),
    TextArray(Vec<String>),
}

pub(crate) fn push_field_bind(builder: &mut QueryBuilder<'_, Postgres>, value: FieldValue) {
    match value {
        FieldValue::Text(v) => builder.push_bind(v),
        FieldValue::Int(v) => builder.push_bind(v),
        FieldValue::Bool(v) => builder.push_bind(v),
        FieldValue::TextArray(v) => builder.push_bind(v),
    };
}

/// Map the request's `fields` object onto the kind's column contract.
/// Unknown field names are rejected; the descriptor is the closed allow-list
/// that keeps request data out of SQL identifiers.
fn collect_kind_fields(
    desc: &KindDescriptor,
    fields: &serde_json::Map<String, serde_json::Value>,
) -> RegistryResult<Vec<(&'static str, FieldValue)>> {
    let mut out = Vec::new();
    for (name, value) in fields {
        let column = desc
            .csv_columns
            .iter()
            .find(|c| c.field == name.as_str() && c.field != "name" && c.field != "description")
            .ok_or_else(|| {
                RegistryError::Validation(format!("unknown field '{name}' for {}", desc.kind))
            })?;
        out.push((column.field, coerce_field(column.parse, value)?));
    }
    Ok(out)
}

fn coerce_field(parse: CellParse, value: &serde_json::Value) -> RegistryResult<FieldValue> {
    let type_err = |expected: &str| {
        RegistryError::Validation(format!("expected {expected}, got {value}"))
    };
    Ok(match parse {
        CellParse::Text => match value {
            serde_json::Value::Null => FieldValue::Text(None),
            serde_json::Value::String(s) => FieldValue::Text(Some(s.clone())),
            _ => return Err(type_err("a string")),
        },
        CellParse::Int => match value {
            serde_json::Value::Null => FieldValue::Int(None),
            serde_json::Value::Number(n) => {
                FieldValue::Int(Some(n.as_i64().ok_or_else(|| type_err("an integer"))?))
            }
            _ => return Err(type_err("an integer")),
        },
        CellParse::Bool => match value {
            serde_json::Value::Null => FieldValue::Bool(None),
            serde_json::Value::Bool(b) => FieldValue::Bool(Some(*b)),
            _ => return Err(type_err("a boolean")),
        },
        CellParse::Multi { allowed } => match value {
            serde_json::Value::Null => FieldValue::TextArray(Vec::new()),
            serde_json::Value::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let s = item.as_str().ok_or_else(|| type_err("an array of strings"))?;
                    if !allowed.contains(&s) {
                        return Err(RegistryError::Validation(format!(
                            "value '{s}' is not in the allowed set"
                        )));
                    }
                    values.push(s.to_string());
                }
                FieldValue::TextArray(values)
            }
            _ => return Err(type_err("an array of strings")),
        },
    })
}
