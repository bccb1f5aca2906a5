//! Entity types mirrored between the commerce and content systems.
//!
//! Each type has three spellings:
//! - the content collection name (plural, hyphenated): `product-variants`
//! - the singular name used in commerce event names: `product-variant`
//! - the seed collection key (camel case): `productVariants`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A kind of record that can be synchronised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityType {
    FulfillmentProvider,
    PaymentProvider,
    Currency,
    Country,
    Region,
    ShippingOptionRequirement,
    ShippingOption,
    ShippingProfile,
    ProductCollection,
    ProductCategory,
    ProductType,
    ProductTag,
    ProductOption,
    ProductOptionValue,
    MoneyAmount,
    Image,
    Product,
    ProductVariant,
    ProductMetafield,
    Store,
    User,
}

impl EntityType {
    /// Every known type, in declaration order.
    pub const ALL: [EntityType; 21] = [
        EntityType::FulfillmentProvider,
        EntityType::PaymentProvider,
        EntityType::Currency,
        EntityType::Country,
        EntityType::Region,
        EntityType::ShippingOptionRequirement,
        EntityType::ShippingOption,
        EntityType::ShippingProfile,
        EntityType::ProductCollection,
        EntityType::ProductCategory,
        EntityType::ProductType,
        EntityType::ProductTag,
        EntityType::ProductOption,
        EntityType::ProductOptionValue,
        EntityType::MoneyAmount,
        EntityType::Image,
        EntityType::Product,
        EntityType::ProductVariant,
        EntityType::ProductMetafield,
        EntityType::Store,
        EntityType::User,
    ];

    /// Content-system collection name, used as the REST path segment.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FulfillmentProvider => "fulfillment-providers",
            Self::PaymentProvider => "payment-providers",
            Self::Currency => "currencies",
            Self::Country => "countries",
            Self::Region => "regions",
            Self::ShippingOptionRequirement => "shipping-option-requirements",
            Self::ShippingOption => "shipping-options",
            Self::ShippingProfile => "shipping-profiles",
            Self::ProductCollection => "product-collections",
            Self::ProductCategory => "product-categories",
            Self::ProductType => "product-types",
            Self::ProductTag => "product-tags",
            Self::ProductOption => "product-options",
            Self::ProductOptionValue => "product-option-values",
            Self::MoneyAmount => "money-amounts",
            Self::Image => "images",
            Self::Product => "products",
            Self::ProductVariant => "product-variants",
            Self::ProductMetafield => "product-metafields",
            Self::Store => "stores",
            Self::User => "users",
        }
    }

    /// Singular name, as used in commerce event names (`region.created`).
    pub const fn singular(&self) -> &'static str {
        match self {
            Self::FulfillmentProvider => "fulfillment-provider",
            Self::PaymentProvider => "payment-provider",
            Self::Currency => "currency",
            Self::Country => "country",
            Self::Region => "region",
            Self::ShippingOptionRequirement => "shipping-option-requirement",
            Self::ShippingOption => "shipping-option",
            Self::ShippingProfile => "shipping-profile",
            Self::ProductCollection => "product-collection",
            Self::ProductCategory => "product-category",
            Self::ProductType => "product-type",
            Self::ProductTag => "product-tag",
            Self::ProductOption => "product-option",
            Self::ProductOptionValue => "product-option-value",
            Self::MoneyAmount => "money-amount",
            Self::Image => "image",
            Self::Product => "product",
            Self::ProductVariant => "product-variant",
            Self::ProductMetafield => "product-metafield",
            Self::Store => "store",
            Self::User => "user",
        }
    }

    /// Key under which the type travels in a seed page (`productCollections`).
    pub fn seed_key(&self) -> String {
        let mut out = String::new();
        let mut upper = false;
        for c in self.as_str().chars() {
            if c == '-' {
                upper = true;
            } else if upper {
                out.push(c.to_ascii_uppercase());
                upper = false;
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Resolves a relation key found in a payload (`product_variants`,
    /// `payment-providers`, `currency`, `iso_countries`) to a type.
    pub fn from_relation_key(key: &str) -> Option<Self> {
        let normalized = key.replace('_', "-").to_ascii_lowercase();
        let normalized = normalized.strip_prefix("iso-").unwrap_or(&normalized);
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized || t.singular() == normalized)
    }

    /// Resolves a seed collection key (`paymentProviders`) to a type.
    pub fn from_seed_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.seed_key() == key)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_relation_key(s)
            .or_else(|| Self::from_seed_key(s))
            .ok_or_else(|| crate::Error::UnknownEntityType(s.to_string()))
    }
}

impl TryFrom<String> for EntityType {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.as_str().to_string()
    }
}
