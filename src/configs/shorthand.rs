//! Rewrites of the short forms an operator may use in an override.

use serde_json::{json, Map, Value};

use crate::error::Result;

use super::tree::as_object;

/// Expands every shorthand in a raw override tree.
///
/// The rewrite is pure and idempotent: expanding an already expanded tree
/// yields the same tree.
///
/// # Errors
/// Returns `Unsupported` if `overrides` is not an object.
pub fn expand(overrides: &Value) -> Result<Value> {
    let mut map = as_object(overrides)?.clone();

    rewrite(&mut map, "stop", |v| {
        v.as_u64().map(|limit| json!({"type": "limit_steps", "limit": limit}))
    });
    rewrite(&mut map, "batch_size", |v| {
        v.as_u64().map(|value| json!({"type": "fixed", "value": value}))
    });
    rewrite(&mut map, "num_unrollings", |v| {
        v.as_u64().map(|value| json!({"type": "fixed", "value": value}))
    });
    rewrite(&mut map, "learning_rate", |v| {
        v.is_number().then(|| json!({"type": "fixed", "value": v}))
    });
    rewrite(&mut map, "checkpoint_steps", |v| match v {
        Value::Array(steps) => Some(json!({"type": "true_on_steps", "steps": steps})),
        Value::Number(n) if n.is_u64() => Some(json!({"type": "true_on_steps", "steps": [n]})),
        Value::Object(_) => None,
        _ => Some(Value::Null),
    });
    rewrite(&mut map, "debug", |v| match v {
        Value::Number(n) if n.is_u64() => Some(json!({"type": "true_on_steps", "steps": [n]})),
        Value::Object(_) => None,
        _ => Some(Value::Null),
    });

    rename(&mut map, "train_dataset_name", "train_dataset");
    rename(&mut map, "validation_dataset_names", "validation_datasets");
    move_num_unrollings(&mut map);

    Ok(Value::Object(map))
}

/// Applies `short` to the value under `key`, then names the resulting spec.
fn rewrite<F>(map: &mut Map<String, Value>, key: &str, short: F)
where
    F: FnOnce(&Value) -> Option<Value>,
{
    let Some(value) = map.get_mut(key) else {
        return;
    };
    if let Some(expanded) = short(value) {
        *value = expanded;
    }
    if let Value::Object(spec) = value {
        spec.entry("name")
            .or_insert_with(|| Value::String(key.to_string()));
    }
}

fn rename(map: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = map.remove(from) {
        map.insert(to.to_string(), value);
    }
}

/// `num_unrollings` is a batch argument; validation batches default to one unrolling.
fn move_num_unrollings(map: &mut Map<String, Value>) {
    let Some(spec) = map.remove("num_unrollings") else {
        return;
    };

    let train_kwargs = map
        .entry("train_batch_kwargs")
        .or_insert_with(|| Value::Object(Map::new()));
    match train_kwargs {
        Value::Object(kwargs) => {
            kwargs.insert("num_unrollings".to_string(), spec);
        }
        other => *other = json!({ "num_unrollings": spec }),
    }

    map.entry("valid_batch_kwargs")
        .or_insert_with(|| json!({"num_unrollings": 1}));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_become_named_controller_specs() {
        let expanded = expand(&json!({"stop": 1000, "batch_size": 32})).unwrap();
        assert_eq!(
            expanded,
            json!({
                "stop": {"type": "limit_steps", "limit": 1000, "name": "stop"},
                "batch_size": {"type": "fixed", "value": 32, "name": "batch_size"}
            })
        );
    }

    #[test]
    fn checkpoint_and_debug_steps() {
        let expanded = expand(&json!({"checkpoint_steps": [10, 20], "debug": 5})).unwrap();
        assert_eq!(
            expanded["checkpoint_steps"],
            json!({"type": "true_on_steps", "steps": [10, 20], "name": "checkpoint_steps"})
        );
        assert_eq!(
            expanded["debug"],
            json!({"type": "true_on_steps", "steps": [5], "name": "debug"})
        );

        let expanded = expand(&json!({"checkpoint_steps": "never", "debug": false})).unwrap();
        assert_eq!(expanded["checkpoint_steps"], Value::Null);
        assert_eq!(expanded["debug"], Value::Null);
    }

    #[test]
    fn specs_keep_their_own_name() {
        let raw = json!({"learning_rate": {"type": "fixed", "value": 0.1, "name": "lr"}});
        assert_eq!(expand(&raw).unwrap(), raw);

        let expanded = expand(&json!({"learning_rate": 0.3})).unwrap();
        assert_eq!(expanded["learning_rate"]["name"], json!("learning_rate"));
    }

    #[test]
    fn num_unrollings_moves_into_batch_kwargs() {
        let expanded = expand(&json!({"num_unrollings": 21})).unwrap();
        assert_eq!(
            expanded,
            json!({
                "train_batch_kwargs": {
                    "num_unrollings": {"type": "fixed", "value": 21, "name": "num_unrollings"}
                },
                "valid_batch_kwargs": {"num_unrollings": 1}
            })
        );
    }

    #[test]
    fn dataset_names_are_renamed() {
        let expanded = expand(&json!({
            "train_dataset_name": "train",
            "validation_dataset_names": ["valid"]
        }))
        .unwrap();
        assert_eq!(
            expanded,
            json!({"train_dataset": "train", "validation_datasets": ["valid"]})
        );
    }

    #[test]
    fn expansion_is_idempotent() {
        let raw = json!({
            "stop": 10,
            "num_unrollings": 5,
            "checkpoint_steps": 3,
            "learning_rate": 0.01,
            "results_collect_interval": 1
        });
        let once = expand(&raw).unwrap();
        assert_eq!(expand(&once).unwrap(), once);
    }
}
