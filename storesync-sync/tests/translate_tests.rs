//! Tests for translate.rs: field classification, id rewriting and lookup
//! filters.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use storesync_sync::translate::{build_lookup_filter, classify, field_filter, query_pairs};
use storesync_sync::{FieldKind, SchemaRegistry, SyncError, Translator};
use storesync_types::EntityType;

fn translator() -> Translator {
    Translator::new(Arc::new(SchemaRegistry::standard().unwrap()))
}

// ── Classification ──────────────────────────────────────────────

#[test]
fn classifies_declared_relations_by_shape() {
    let registry = SchemaRegistry::standard().unwrap();
    let schema = registry.get(EntityType::Product);

    let collection = classify(schema, "product_collection", &json!({ "id": "pcol_1" }));
    assert!(matches!(collection, FieldKind::NestedEntity(_)));
    assert_eq!(collection.target(), Some(EntityType::ProductCollection));

    let tags = classify(schema, "product_tags", &json!([{ "id": "tag_1" }]));
    assert!(matches!(tags, FieldKind::RelationCollection(_)));

    let fk = classify(schema, "collection_id", &json!("pcol_1"));
    assert!(matches!(fk, FieldKind::RelationRef(_)));
    assert_eq!(fk.target(), Some(EntityType::ProductCollection));

    assert_eq!(classify(schema, "title", &json!("Shirt")), FieldKind::Scalar);
}

#[test]
fn undeclared_keys_fall_back_to_shape() {
    let guessed = classify(None, "regions", &json!([{ "id": "reg_1" }]));
    assert!(matches!(guessed, FieldKind::RelationCollection(_)));
    assert_eq!(guessed.target(), Some(EntityType::Region));

    assert_eq!(classify(None, "metadata", &json!({ "color": "red" })), FieldKind::Scalar);
    assert_eq!(classify(None, "tags", &json!(["a", "b"])), FieldKind::Scalar);
}

// ── Outbound ────────────────────────────────────────────────────

#[test]
fn outbound_moves_id_to_join_key_and_strips_audit_fields() {
    let out = translator().outbound(
        Some(EntityType::Product),
        &json!({
            "id": "prod_1",
            "title": "Shirt",
            "created_at": "2024-01-01",
            "updated_at": "2024-01-02",
            "product-collection": { "id": "pcol_1", "title": "Summer", "deleted_at": null }
        }),
    );

    assert_eq!(
        out,
        json!({
            "medusa_id": "prod_1",
            "title": "Shirt",
            "product_collection": { "medusa_id": "pcol_1", "title": "Summer" }
        })
    );
}

#[test]
fn outbound_keeps_plain_objects_intact() {
    let out = translator().outbound(
        Some(EntityType::Product),
        &json!({ "id": "prod_1", "metadata": { "created_at": "kept" } }),
    );
    assert_eq!(out["metadata"], json!({ "created_at": "kept" }));
}

#[test]
fn outbound_applies_field_remaps() {
    let mut remaps = HashMap::new();
    remaps.insert(
        EntityType::Product,
        HashMap::from([("title".to_string(), "name".to_string())]),
    );
    let out = translator()
        .with_remaps(remaps)
        .outbound(Some(EntityType::Product), &json!({ "id": "prod_1", "title": "Shirt" }));

    assert_eq!(out, json!({ "medusa_id": "prod_1", "name": "Shirt" }));
}

// ── Inbound ─────────────────────────────────────────────────────

#[test]
fn inbound_restores_local_id_and_drops_content_fields() {
    let local = translator().inbound(
        Some(EntityType::Product),
        &json!({
            "id": 42,
            "medusa_id": "prod_1",
            "title": "Shirt",
            "publishedAt": "2024-01-01",
            "product_variants": [{ "id": 7, "medusa_id": "variant_1", "updatedAt": "x" }]
        }),
    );

    assert_eq!(
        local,
        json!({
            "id": "prod_1",
            "title": "Shirt",
            "product-variants": [{ "id": "variant_1" }]
        })
    );
}

#[test]
fn inbound_reverses_field_remaps() {
    let mut remaps = HashMap::new();
    remaps.insert(
        EntityType::Product,
        HashMap::from([("title".to_string(), "name".to_string())]),
    );
    let local = translator()
        .with_remaps(remaps)
        .inbound(Some(EntityType::Product), &json!({ "medusa_id": "prod_1", "name": "Shirt" }));

    assert_eq!(local, json!({ "id": "prod_1", "title": "Shirt" }));
}

proptest! {
    #[test]
    fn outbound_then_inbound_restores_scalars(id in "[a-z]{1,8}_[A-Z0-9]{1,12}", title in ".{0,32}") {
        let t = translator();
        let original = json!({ "id": id, "title": title });
        let round = t.inbound(Some(EntityType::Product), &t.outbound(Some(EntityType::Product), &original));
        prop_assert_eq!(round, original);
    }
}

// ── Lookup filters ──────────────────────────────────────────────

#[test]
fn explicit_id_becomes_join_key_filter() {
    let query = build_lookup_filter(Some("prod_1"), Some("populate=*")).unwrap().unwrap();
    let pairs = query_pairs(&query);
    assert!(pairs.contains(&("populate".to_string(), "*".to_string())));
    assert!(pairs.contains(&("filters[medusa_id]".to_string(), "prod_1".to_string())));
}

#[test]
fn filter_id_is_normalised_to_join_key() {
    let query = build_lookup_filter(None, Some("filters%5Bid%5D=prod_1")).unwrap().unwrap();
    assert_eq!(
        query_pairs(&query),
        vec![("filters[medusa_id]".to_string(), "prod_1".to_string())]
    );
}

#[test]
fn id_in_both_places_is_a_conflict() {
    let err = build_lookup_filter(Some("prod_1"), Some("filters[medusa_id]=prod_2")).unwrap_err();
    assert!(matches!(err, SyncError::ValidationConflict(msg) if msg.contains("multiple ids")));
}

#[test]
fn no_id_leaves_query_alone() {
    assert_eq!(build_lookup_filter(None, None).unwrap(), None);
    assert_eq!(build_lookup_filter(None, Some("")).unwrap(), None);
    assert_eq!(
        build_lookup_filter(None, Some("sort=title")).unwrap(),
        Some("sort=title".to_string())
    );
}

#[test]
fn field_filter_encodes_brackets() {
    let query = field_filter("code", "usd");
    assert_eq!(query, "filters%5Bcode%5D=usd");
    assert_eq!(query_pairs(&query), vec![("filters[code]".to_string(), "usd".to_string())]);
}
