//! Chart values
//!
//! Chart defaults, then the owner's `set` tree, then the runtime
//! information. Later layers win; maps merge key by key, anything else
//! is replaced.

use serde_json::Value;

/// Deep-merges `overlay` into `base`
pub fn merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Layers values in order, later ones winning
pub fn compose<'a>(layers: impl IntoIterator<Item = &'a Value>) -> Value {
    let mut values = Value::Object(serde_json::Map::new());
    for layer in layers {
        merge(&mut values, layer);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_later_layers_win() {
        let defaults = json!({"image": {"repo": "quay.io/a", "tag": "v1"}, "debug": false});
        let set = json!({"image": {"tag": "v2"}});
        let runtime = json!({"debug": true, "kernelFullVersion": "5.14.0"});
        let values = compose([&defaults, &set, &runtime]);
        assert_eq!(
            values,
            json!({"image": {"repo": "quay.io/a", "tag": "v2"}, "debug": true, "kernelFullVersion": "5.14.0"})
        );
    }

    #[test]
    fn test_lists_replace() {
        let mut base = json!({"args": ["a", "b"]});
        merge(&mut base, &json!({"args": ["c"]}));
        assert_eq!(base, json!({"args": ["c"]}));
    }

    #[test]
    fn test_null_layer_is_ignored() {
        let values = compose([&json!({"a": 1}), &Value::Null]);
        assert_eq!(values, json!({"a": 1}));
    }
}
