//! Integration tests for the metadata catalog and attribute validation
//!
//! These cover the dictionary invariant: a key with a non-empty
//! supported_values set constrains every later assignment to members of that
//! set, and a referenced key can never be deleted out from under its
//! assignments.

use sqlx::PgPool;

use riskledger::catalog::MetadataCatalog;
use riskledger::error::RegistryError;
use riskledger::kinds::EntityKind;
use riskledger::models::{
    AttributeInput, CreateEntityRequest, NewMetaKey, UpdateEntityRequest, UpdateMetaKey,
};
use riskledger::registry::EntityRegistry;

fn new_key(name: &str, applies_to: &[&str], supported: &[&str]) -> NewMetaKey {
    NewMetaKey {
        name: name.to_string(),
        input_type: "multiselect".to_string(),
        applies_to: applies_to.iter().map(|s| s.to_string()).collect(),
        supported_values: supported.iter().map(|s| s.to_string()).collect(),
    }
}

fn create_request(name: &str, attributes: Vec<AttributeInput>) -> CreateEntityRequest {
    CreateEntityRequest {
        name: name.to_string(),
        description: None,
        status: None,
        fields: serde_json::Map::new(),
        attributes,
    }
}

fn attribute(key_id: i32, values: &[&str]) -> AttributeInput {
    AttributeInput {
        meta_data_key_id: Some(key_id),
        values: Some(values.iter().map(|s| s.to_string()).collect()),
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn constrained_key_rejects_non_members(pool: PgPool) {
    let catalog = MetadataCatalog::new(pool.clone());
    let registry = EntityRegistry::new(pool);

    let key = catalog
        .create_key(new_key("industry", &[], &["Finance", "Retail"]))
        .await
        .unwrap();

    let ok = registry
        .create(
            EntityKind::Asset,
            create_request("crm", vec![attribute(key.id, &["Finance"])]),
        )
        .await;
    assert!(ok.is_ok());

    let err = registry
        .create(
            EntityKind::Asset,
            create_request("erp", vec![attribute(key.id, &["Aerospace"])]),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::InvalidAttributeValue { ref value, .. } if value == "Aerospace"
    ));

    // Membership is case-sensitive.
    let err = registry
        .create(
            EntityKind::Asset,
            create_request("dwh", vec![attribute(key.id, &["finance"])]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidAttributeValue { .. }));
}

#[sqlx::test(migrations = "./migrations")]
async fn invalid_attribute_rolls_back_the_entity(pool: PgPool) {
    let catalog = MetadataCatalog::new(pool.clone());
    let registry = EntityRegistry::new(pool.clone());

    let key = catalog
        .create_key(new_key("region", &[], &["EMEA"]))
        .await
        .unwrap();

    let err = registry
        .create(
            EntityKind::Process,
            create_request("payroll", vec![attribute(key.id, &["LATAM"])]),
        )
        .await;
    assert!(err.is_err());

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM processes")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn unconstrained_key_accepts_any_value(pool: PgPool) {
    let catalog = MetadataCatalog::new(pool.clone());
    let registry = EntityRegistry::new(pool);

    let key = catalog.create_key(new_key("tags", &[], &[])).await.unwrap();
    let created = registry
        .create(
            EntityKind::ThreatControl,
            create_request("mfa", vec![attribute(key.id, &["anything", "goes"])]),
        )
        .await
        .unwrap();

    let assignments = registry
        .get_attributes(EntityKind::ThreatControl, created.id)
        .await
        .unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].values, vec!["anything", "goes"]);
}

#[sqlx::test(migrations = "./migrations")]
async fn key_applicability_is_enforced(pool: PgPool) {
    let catalog = MetadataCatalog::new(pool.clone());
    let registry = EntityRegistry::new(pool);

    let key = catalog
        .create_key(new_key("asset_owner", &["asset"], &[]))
        .await
        .unwrap();

    let err = registry
        .create(
            EntityKind::Process,
            create_request("billing", vec![attribute(key.id, &["ops"])]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));

    assert!(registry
        .create(
            EntityKind::Asset,
            create_request("mainframe", vec![attribute(key.id, &["ops"])]),
        )
        .await
        .is_ok());
}

#[sqlx::test(migrations = "./migrations")]
async fn missing_and_unknown_keys_are_distinct_errors(pool: PgPool) {
    let registry = EntityRegistry::new(pool);

    let err = registry
        .create(
            EntityKind::Asset,
            create_request(
                "a1",
                vec![AttributeInput {
                    meta_data_key_id: None,
                    values: Some(vec!["x".to_string()]),
                }],
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::MissingAttributeField { field: "meta_data_key_id" }
    ));

    let err = registry
        .create(EntityKind::Asset, create_request("a2", vec![attribute(9999, &["x"])]))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::MetadataNotFound { key_id: 9999 }));
}

#[sqlx::test(migrations = "./migrations")]
async fn referenced_key_cannot_be_deleted(pool: PgPool) {
    let catalog = MetadataCatalog::new(pool.clone());
    let registry = EntityRegistry::new(pool);

    let key = catalog.create_key(new_key("zone", &[], &[])).await.unwrap();
    let created = registry
        .create(
            EntityKind::Asset,
            create_request("fw", vec![attribute(key.id, &["dmz"])]),
        )
        .await
        .unwrap();

    let err = catalog.delete_key(key.id).await.unwrap_err();
    assert!(matches!(err, RegistryError::Conflict(_)));

    // Once the entity is gone, the key is free.
    registry.delete(EntityKind::Asset, created.id).await.unwrap();
    catalog.delete_key(key.id).await.unwrap();
}

#[sqlx::test(migrations = "./migrations")]
async fn update_replaces_attributes_only_when_present(pool: PgPool) {
    let catalog = MetadataCatalog::new(pool.clone());
    let registry = EntityRegistry::new(pool);

    let key = catalog.create_key(new_key("zone", &[], &[])).await.unwrap();
    let created = registry
        .create(
            EntityKind::Asset,
            create_request("router", vec![attribute(key.id, &["core"])]),
        )
        .await
        .unwrap();

    // attributes: None leaves assignments untouched.
    registry
        .update(
            EntityKind::Asset,
            created.id,
            UpdateEntityRequest {
                name: None,
                description: Some("edge router".to_string()),
                status: None,
                fields: serde_json::Map::new(),
                attributes: None,
            },
        )
        .await
        .unwrap();
    let kept = registry.get_attributes(EntityKind::Asset, created.id).await.unwrap();
    assert_eq!(kept.len(), 1);

    // attributes: Some([]) is a full replacement with nothing.
    registry
        .update(
            EntityKind::Asset,
            created.id,
            UpdateEntityRequest {
                name: None,
                description: None,
                status: None,
                fields: serde_json::Map::new(),
                attributes: Some(vec![]),
            },
        )
        .await
        .unwrap();
    let cleared = registry.get_attributes(EntityKind::Asset, created.id).await.unwrap();
    assert!(cleared.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn duplicate_key_names_conflict(pool: PgPool) {
    let catalog = MetadataCatalog::new(pool);

    catalog.create_key(new_key("industry", &[], &[])).await.unwrap();
    let err = catalog.create_key(new_key("industry", &[], &[])).await.unwrap_err();
    assert!(matches!(err, RegistryError::Conflict(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn update_key_patches_only_provided_fields(pool: PgPool) {
    let catalog = MetadataCatalog::new(pool);

    let key = catalog
        .create_key(new_key("criticality_band", &["process"], &["low", "high"]))
        .await
        .unwrap();

    let updated = catalog
        .update_key(
            key.id,
            UpdateMetaKey {
                name: None,
                input_type: None,
                applies_to: None,
                supported_values: Some(vec![
                    "low".to_string(),
                    "medium".to_string(),
                    "high".to_string(),
                ]),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.name, "criticality_band");
    assert_eq!(updated.applies_to, vec!["process"]);
    assert_eq!(updated.supported_values.len(), 3);
}

#[sqlx::test(migrations = "./migrations")]
async fn shrinking_supported_values_cannot_orphan_assignments(pool: PgPool) {
    let catalog = MetadataCatalog::new(pool.clone());
    let registry = EntityRegistry::new(pool);

    let key = catalog
        .create_key(new_key("industry", &[], &["Finance", "Retail"]))
        .await
        .unwrap();
    let created = registry
        .create(
            EntityKind::Asset,
            create_request("crm", vec![attribute(key.id, &["Retail"])]),
        )
        .await
        .unwrap();

    let shrink = UpdateMetaKey {
        name: None,
        input_type: None,
        applies_to: None,
        supported_values: Some(vec!["Finance".to_string()]),
    };

    // "Retail" is assigned, so dropping it from the allow-list is rejected.
    let err = catalog.update_key(key.id, shrink.clone()).await.unwrap_err();
    assert!(matches!(err, RegistryError::Conflict(_)));

    // Growing the set is always fine.
    catalog
        .update_key(
            key.id,
            UpdateMetaKey {
                name: None,
                input_type: None,
                applies_to: None,
                supported_values: Some(vec![
                    "Finance".to_string(),
                    "Retail".to_string(),
                    "Healthcare".to_string(),
                ]),
            },
        )
        .await
        .unwrap();

    // Once no assignment carries "Retail" the shrink goes through.
    registry.delete(EntityKind::Asset, created.id).await.unwrap();
    catalog.update_key(key.id, shrink).await.unwrap();
}
