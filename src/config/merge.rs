//! Configuration merge logic
//!
//! Layers are merged in place, lowest precedence first:
//! - tables merge key by key, recursively
//! - arrays replace the lower layer's array whole
//! - anything else (including `null`) replaces the lower value

use serde_json::Value;

/// Merge `overlay` into `base` and return the result.
pub fn deep_merge(mut base: Value, overlay: Value) -> Value {
    merge_into(&mut base, overlay);
    base
}

/// Merge config layers in precedence order; the last layer wins.
pub fn merge_layers(layers: Vec<Value>) -> Value {
    let mut layers = layers.into_iter();
    let Some(mut merged) = layers.next() else {
        return Value::Null;
    };
    for layer in layers {
        merge_into(&mut merged, layer);
    }
    merged
}

fn merge_into(slot: &mut Value, overlay: Value) {
    match (slot, overlay) {
        (Value::Object(table), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match table.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        table.insert(key, value);
                    }
                }
            }
        }
        (slot, overlay) => *slot = overlay,
    }
}
