//! Tests for schema.rs: relation lookups and dependency ordering.

use storesync_sync::schema::standard_schemas;
use storesync_sync::{EntitySchema, RelationDecl, RelationKind, SchemaRegistry, SyncError};
use storesync_types::EntityType;

fn before(registry: &SchemaRegistry, a: EntityType, b: EntityType) -> bool {
    registry.rank(a) < registry.rank(b)
}

// ── Dependency order ────────────────────────────────────────────

#[test]
fn standard_registry_covers_every_type() {
    let registry = SchemaRegistry::standard().unwrap();
    assert_eq!(registry.dependency_order().len(), EntityType::ALL.len());
    for t in EntityType::ALL {
        assert!(registry.get(t).is_some(), "{t} has no schema");
    }
}

#[test]
fn upstream_types_come_first() {
    let registry = SchemaRegistry::standard().unwrap();
    use EntityType::*;

    assert!(before(&registry, Currency, Region));
    assert!(before(&registry, Region, Country));
    assert!(before(&registry, PaymentProvider, Region));
    assert!(before(&registry, ShippingProfile, ShippingOption));
    assert!(before(&registry, ShippingOption, ShippingOptionRequirement));
    assert!(before(&registry, ProductCollection, Product));
    assert!(before(&registry, ProductType, Product));
    assert!(before(&registry, Product, ProductVariant));
    assert!(before(&registry, ProductVariant, MoneyAmount));
    assert!(before(&registry, ProductOption, ProductOptionValue));
    assert!(before(&registry, Currency, Store));
}

#[test]
fn sort_by_dependency_orders_seed_collections() {
    let registry = SchemaRegistry::standard().unwrap();
    let mut types = vec![
        EntityType::Store,
        EntityType::Product,
        EntityType::ShippingOption,
        EntityType::Region,
    ];
    registry.sort_by_dependency(&mut types);

    assert_eq!(
        types,
        vec![
            EntityType::Region,
            EntityType::ShippingOption,
            EntityType::Product,
            EntityType::Store,
        ]
    );
}

#[test]
fn self_reference_adds_no_edge() {
    let registry = SchemaRegistry::new(vec![EntitySchema::new(EntityType::ProductCategory).relation(
        RelationDecl::many_to_one("parent_category", EntityType::ProductCategory)
            .with_foreign_key("parent_category_id"),
    )])
    .unwrap();
    assert_eq!(registry.dependency_order(), &[EntityType::ProductCategory]);
}

#[test]
fn cycle_is_rejected() {
    let result = SchemaRegistry::new(vec![
        EntitySchema::new(EntityType::Product)
            .relation(RelationDecl::many_to_one("variant", EntityType::ProductVariant)),
        EntitySchema::new(EntityType::ProductVariant)
            .relation(RelationDecl::many_to_one("product", EntityType::Product)),
    ]);
    match result {
        Err(SyncError::Schema(msg)) => assert!(msg.contains("cycle")),
        other => panic!("expected cycle error, got {other:?}"),
    }
}

#[test]
fn undeclared_target_is_rejected() {
    let result = SchemaRegistry::new(vec![
        EntitySchema::new(EntityType::Region)
            .relation(RelationDecl::many_to_one("currency", EntityType::Currency)),
    ]);
    assert!(matches!(result, Err(SyncError::Schema(_))));
}

#[test]
fn missing_schema_lookup_fails() {
    let registry = SchemaRegistry::new(vec![EntitySchema::new(EntityType::Image)]).unwrap();
    assert!(matches!(
        registry.schema(EntityType::Product),
        Err(SyncError::Schema(_))
    ));
    assert_eq!(registry.rank(EntityType::Product), usize::MAX);
}

// ── Relation lookups ────────────────────────────────────────────

#[test]
fn relation_lookup_accepts_either_naming() {
    let schemas = standard_schemas();
    let product = schemas
        .iter()
        .find(|s| s.entity_type == EntityType::Product)
        .unwrap();

    let rel = product.relation_for("product-variants").unwrap();
    assert_eq!(rel.target, EntityType::ProductVariant);
    assert_eq!(rel.kind, RelationKind::OneToMany);
    assert!(!rel.is_upstream());

    let fk = product.relation_by_foreign_key("collection_id").unwrap();
    assert_eq!(fk.key, "product_collection");
    assert!(fk.is_upstream());
}

#[test]
fn unique_field_defaults_to_join_key() {
    let registry = SchemaRegistry::standard().unwrap();
    assert_eq!(registry.schema(EntityType::Product).unwrap().unique_field, "medusa_id");
    assert_eq!(registry.schema(EntityType::Currency).unwrap().unique_field, "code");
}

#[test]
fn update_allow_list() {
    let registry = SchemaRegistry::standard().unwrap();
    let collection = registry.schema(EntityType::ProductCollection).unwrap();
    assert!(collection.is_relevant_change(["title"].into_iter()));
    assert!(!collection.is_relevant_change(["metadata"].into_iter()));

    let image = registry.schema(EntityType::Image).unwrap();
    assert!(image.is_relevant_change(["anything"].into_iter()));
}
