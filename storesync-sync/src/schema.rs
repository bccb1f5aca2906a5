//! Per-type relation declarations and the entity-type dependency graph.
//!
//! Relation keys are declared in the content system's naming (underscored).
//! Each relation also contributes one edge to the dependency graph:
//! many-to-one and many-to-many targets must exist before the declaring
//! type, one-to-many targets are owned children created after it.
//! Self references add no edge.

use crate::error::{SyncError, SyncResult};
use std::collections::{BTreeSet, HashMap};
use storesync_types::{EntityType, JOIN_KEY};

/// Cardinality of a declared relation, seen from the declaring type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    ManyToOne,
    OneToMany,
    ManyToMany,
}

/// One relation field on an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDecl {
    /// Field name in content-system naming.
    pub key: String,
    pub target: EntityType,
    pub kind: RelationKind,
    /// Scalar field carrying the target's local id (`collection_id`).
    /// Only meaningful for many-to-one relations.
    pub foreign_key: Option<String>,
}

impl RelationDecl {
    pub fn many_to_one(key: &str, target: EntityType) -> Self {
        Self {
            key: key.to_string(),
            target,
            kind: RelationKind::ManyToOne,
            foreign_key: None,
        }
    }

    pub fn one_to_many(key: &str, target: EntityType) -> Self {
        Self {
            key: key.to_string(),
            target,
            kind: RelationKind::OneToMany,
            foreign_key: None,
        }
    }

    pub fn many_to_many(key: &str, target: EntityType) -> Self {
        Self {
            key: key.to_string(),
            target,
            kind: RelationKind::ManyToMany,
            foreign_key: None,
        }
    }

    /// Names the scalar foreign-key field of a many-to-one relation.
    pub fn with_foreign_key(mut self, field: &str) -> Self {
        self.foreign_key = Some(field.to_string());
        self
    }

    /// Whether the target must exist before the declaring type.
    pub fn is_upstream(&self) -> bool {
        !matches!(self.kind, RelationKind::OneToMany)
    }
}

/// Declared shape of one entity type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub entity_type: EntityType,
    pub relations: Vec<RelationDecl>,
    /// Field used to find an existing record before creating one.
    pub unique_field: String,
    /// Fields whose change is worth an update. `None` accepts any change.
    pub update_fields: Option<Vec<String>>,
}

impl EntitySchema {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            relations: Vec::new(),
            unique_field: JOIN_KEY.to_string(),
            update_fields: None,
        }
    }

    pub fn relation(mut self, decl: RelationDecl) -> Self {
        self.relations.push(decl);
        self
    }

    pub fn unique_by(mut self, field: &str) -> Self {
        self.unique_field = field.to_string();
        self
    }

    pub fn updates_on(mut self, fields: &[&str]) -> Self {
        self.update_fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Finds a relation by key, accepting either naming convention.
    pub fn relation_for(&self, key: &str) -> Option<&RelationDecl> {
        let normalized = key.replace('-', "_");
        self.relations.iter().find(|r| r.key == normalized)
    }

    /// Finds the many-to-one relation whose foreign key is `field`.
    pub fn relation_by_foreign_key(&self, field: &str) -> Option<&RelationDecl> {
        self.relations
            .iter()
            .find(|r| r.foreign_key.as_deref() == Some(field))
    }

    /// Whether any of `changed` is on the update allow-list.
    pub fn is_relevant_change<'a>(&self, mut changed: impl Iterator<Item = &'a str>) -> bool {
        match &self.update_fields {
            None => true,
            Some(allowed) => changed.any(|f| allowed.iter().any(|a| a == f)),
        }
    }
}

/// All entity schemas plus their precomputed dependency order.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<EntityType, EntitySchema>,
    order: Vec<EntityType>,
}

impl SchemaRegistry {
    /// Builds a registry and sorts the dependency graph. Fails on cycles and
    /// on relations pointing at undeclared types.
    pub fn new(schemas: Vec<EntitySchema>) -> SyncResult<Self> {
        let schemas: HashMap<EntityType, EntitySchema> =
            schemas.into_iter().map(|s| (s.entity_type, s)).collect();
        let order = topological_order(&schemas)?;
        Ok(Self { schemas, order })
    }

    /// The built-in commerce catalogue.
    pub fn standard() -> SyncResult<Self> {
        Self::new(standard_schemas())
    }

    pub fn schema(&self, entity_type: EntityType) -> SyncResult<&EntitySchema> {
        self.schemas.get(&entity_type).ok_or_else(|| {
            SyncError::Schema(format!("no schema declared for {entity_type}"))
        })
    }

    pub fn get(&self, entity_type: EntityType) -> Option<&EntitySchema> {
        self.schemas.get(&entity_type)
    }

    /// Every declared type, upstream types first.
    pub fn dependency_order(&self) -> &[EntityType] {
        &self.order
    }

    /// Position of a type in the dependency order.
    pub fn rank(&self, entity_type: EntityType) -> usize {
        self.order
            .iter()
            .position(|t| *t == entity_type)
            .unwrap_or(usize::MAX)
    }

    /// Sorts `types` by dependency order, keeping unknown types last.
    pub fn sort_by_dependency(&self, types: &mut [EntityType]) {
        types.sort_by_key(|t| self.rank(*t));
    }
}

/// Kahn's algorithm. Among ready types the earliest declared wins, so the
/// order is deterministic.
fn topological_order(schemas: &HashMap<EntityType, EntitySchema>) -> SyncResult<Vec<EntityType>> {
    let mut depends_on: HashMap<EntityType, BTreeSet<EntityType>> =
        schemas.keys().map(|t| (*t, BTreeSet::new())).collect();

    for schema in schemas.values() {
        for rel in &schema.relations {
            if !schemas.contains_key(&rel.target) {
                return Err(SyncError::Schema(format!(
                    "{} relation '{}' targets undeclared type {}",
                    schema.entity_type, rel.key, rel.target
                )));
            }
            if rel.target == schema.entity_type {
                continue;
            }
            let (downstream, upstream) = if rel.is_upstream() {
                (schema.entity_type, rel.target)
            } else {
                (rel.target, schema.entity_type)
            };
            depends_on.entry(downstream).or_default().insert(upstream);
        }
    }

    let mut order = Vec::with_capacity(depends_on.len());
    let mut ready: BTreeSet<EntityType> = depends_on
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(t, _)| *t)
        .collect();

    while let Some(next) = ready.pop_first() {
        order.push(next);
        depends_on.remove(&next);
        for (t, deps) in depends_on.iter_mut() {
            if deps.remove(&next) && deps.is_empty() {
                ready.insert(*t);
            }
        }
    }

    if !depends_on.is_empty() {
        let mut stuck: Vec<_> = depends_on.keys().map(|t| t.as_str()).collect();
        stuck.sort_unstable();
        return Err(SyncError::Schema(format!(
            "dependency cycle among: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

/// Relation declarations for the commerce catalogue.
pub fn standard_schemas() -> Vec<EntitySchema> {
    use EntityType::*;
    use RelationDecl as R;

    vec![
        EntitySchema::new(FulfillmentProvider),
        EntitySchema::new(PaymentProvider),
        EntitySchema::new(Currency).unique_by("code"),
        EntitySchema::new(Country)
            .relation(R::many_to_one("region", Region).with_foreign_key("region_id")),
        EntitySchema::new(Region)
            .relation(R::many_to_one("currency", Currency))
            .relation(R::one_to_many("countries", Country))
            .relation(R::many_to_many("payment_providers", PaymentProvider))
            .relation(R::many_to_many("fulfillment_providers", FulfillmentProvider))
            .updates_on(&[
                "name",
                "currency_code",
                "countries",
                "payment_providers",
                "fulfillment_providers",
            ]),
        EntitySchema::new(ShippingOptionRequirement).relation(
            R::many_to_one("shipping_option", ShippingOption)
                .with_foreign_key("shipping_option_id"),
        ),
        EntitySchema::new(ShippingOption)
            .relation(R::many_to_one("region", Region).with_foreign_key("region_id"))
            .relation(R::many_to_one("shipping_profile", ShippingProfile).with_foreign_key("profile_id"))
            .relation(
                R::many_to_one("fulfillment_provider", FulfillmentProvider)
                    .with_foreign_key("provider_id"),
            )
            .relation(R::one_to_many("requirements", ShippingOptionRequirement)),
        EntitySchema::new(ShippingProfile)
            .relation(R::one_to_many("shipping_options", ShippingOption)),
        EntitySchema::new(ProductCollection)
            .relation(R::one_to_many("products", Product))
            .updates_on(&["handle", "title"]),
        EntitySchema::new(ProductCategory)
            .relation(
                R::many_to_one("parent_category", ProductCategory)
                    .with_foreign_key("parent_category_id"),
            )
            .updates_on(&["handle", "name"]),
        EntitySchema::new(ProductType),
        EntitySchema::new(ProductTag),
        EntitySchema::new(ProductOption)
            .relation(R::many_to_one("product", Product).with_foreign_key("product_id"))
            .relation(R::one_to_many("values", ProductOptionValue)),
        EntitySchema::new(ProductOptionValue)
            .relation(R::many_to_one("option", ProductOption).with_foreign_key("option_id"))
            .relation(R::many_to_one("variant", ProductVariant).with_foreign_key("variant_id")),
        EntitySchema::new(MoneyAmount)
            .relation(R::many_to_one("variant", ProductVariant).with_foreign_key("variant_id"))
            .relation(R::many_to_one("region", Region).with_foreign_key("region_id")),
        EntitySchema::new(Image),
        EntitySchema::new(Product)
            .relation(R::many_to_one("product_type", ProductType).with_foreign_key("type_id"))
            .relation(
                R::many_to_one("product_collection", ProductCollection)
                    .with_foreign_key("collection_id"),
            )
            .relation(R::many_to_one("profile", ShippingProfile).with_foreign_key("profile_id"))
            .relation(R::many_to_many("product_tags", ProductTag))
            .relation(R::many_to_many("product_categories", ProductCategory))
            .relation(R::many_to_many("images", Image))
            .relation(R::one_to_many("product_options", ProductOption))
            .relation(R::one_to_many("product_variants", ProductVariant))
            .updates_on(&[
                "variants",
                "options",
                "tags",
                "title",
                "subtitle",
                "type",
                "type_id",
                "collection",
                "collection_id",
                "categories",
                "thumbnail",
                "height",
                "weight",
                "width",
                "length",
            ]),
        EntitySchema::new(ProductVariant)
            .relation(R::many_to_one("product", Product).with_foreign_key("product_id"))
            .relation(R::one_to_many("money_amount", MoneyAmount))
            .relation(R::one_to_many("product_option_value", ProductOptionValue))
            .updates_on(&[
                "title",
                "prices",
                "sku",
                "material",
                "weight",
                "length",
                "height",
                "origin_country",
                "options",
            ]),
        EntitySchema::new(ProductMetafield)
            .relation(R::many_to_one("product", Product).with_foreign_key("product_id")),
        EntitySchema::new(Store)
            .relation(R::many_to_many("currencies", Currency))
            .relation(R::many_to_one("default_currency", Currency)),
        EntitySchema::new(User),
    ]
}
