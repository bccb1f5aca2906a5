//! Commerce payload reshaping.
//!
//! Commerce entities name some relations differently from the content
//! collections that hold them (`tags` vs `product_tags`). Product and
//! variant payloads are renamed here before translation.

use serde_json::{Map, Value};
use storesync_types::{EntityType, JOIN_KEY, LOCAL_ID_FIELD};

const PRODUCT_RENAMES: &[(&str, &str)] = &[
    ("type", "product_type"),
    ("tags", "product_tags"),
    ("options", "product_options"),
    ("variants", "product_variants"),
    ("collection", "product_collection"),
    ("categories", "product_categories"),
];

const VARIANT_RENAMES: &[(&str, &str)] = &[
    ("prices", "money_amount"),
    ("options", "product_option_value"),
];

fn rename(map: &mut Map<String, Value>, renames: &[(&str, &str)]) {
    for (from, to) in renames {
        if let Some(v) = map.remove(*from) {
            map.insert((*to).to_string(), v);
        }
    }
}

/// Renames relation fields of a commerce entity to the content system's
/// names. Variants embedded in a product are reshaped too.
pub fn reshape(entity_type: EntityType, mut value: Value) -> Value {
    let Some(map) = value.as_object_mut() else {
        return value;
    };
    match entity_type {
        EntityType::Product => {
            rename(map, PRODUCT_RENAMES);
            if let Some(Value::Array(variants)) = map.get_mut("product_variants") {
                for variant in variants.iter_mut() {
                    if let Some(v) = variant.as_object_mut() {
                        rename(v, VARIANT_RENAMES);
                    }
                }
            }
        }
        EntityType::ProductVariant => rename(map, VARIANT_RENAMES),
        _ => {}
    }
    value
}

/// Renames every scalar `id` field, at any depth, to the join key.
pub fn rename_ids(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(id) = map.get(LOCAL_ID_FIELD).filter(|v| !v.is_object() && !v.is_array()) {
                let id = id.clone();
                map.remove(LOCAL_ID_FIELD);
                map.insert(JOIN_KEY.to_string(), id);
            }
            map.values_mut().for_each(rename_ids);
        }
        Value::Array(items) => items.iter_mut().for_each(rename_ids),
        _ => {}
    }
}
