use serde_json::{Map, Value};

use crate::error::{HarnessError, Result};

/// Returns true if `key` appears as a key anywhere in `tree`, at any depth.
pub fn search(tree: &Value, key: &str) -> bool {
    match tree {
        Value::Object(map) => map
            .iter()
            .any(|(k, value)| k == key || search(value, key)),
        _ => false,
    }
}

/// Checks that every top-level key of `overrides` exists somewhere in `target`.
///
/// Only membership is checked, not the path the key lives at.
///
/// # Errors
/// Returns `UnknownKey` naming the first unrecognized key.
pub fn check_keys(target: &Value, overrides: &Map<String, Value>) -> Result<()> {
    match overrides.keys().find(|key| !search(target, key)) {
        Some(key) => Err(HarnessError::UnknownKey(key.clone())),
        None => Ok(()),
    }
}

/// Writes `value` under every occurrence of `key` in `tree`.
///
/// Matched values are not searched further; each one is combined with `value`
/// through [`overlay`].
///
/// # Errors
/// Returns `UnknownKey` naming a nested key absent from a matched value.
pub fn paste(tree: &mut Value, key: &str, value: &Value, free_form: &[&str]) -> Result<()> {
    let Value::Object(map) = tree else {
        return Ok(());
    };

    for (k, existing) in map.iter_mut() {
        if k == key {
            overlay(key, existing, value, free_form)?;
        } else {
            paste(existing, key, value, free_form)?;
        }
    }
    Ok(())
}

/// Path-aware recursive overlay of `src` onto `dest`, the value stored under `key`.
///
/// Objects are merged key by key and every nested key of `src` must already
/// exist in `dest`. A value replaces `dest` as a whole when it is not an
/// object, when `dest` is an empty object, when it carries its own `type`
/// (a controller spec switching policy), or when `key` is one of `free_form`.
///
/// # Errors
/// Returns `UnknownKey` naming the first nested key absent from `dest`.
pub fn overlay(key: &str, dest: &mut Value, src: &Value, free_form: &[&str]) -> Result<()> {
    match (dest, src) {
        (Value::Object(dest_map), Value::Object(src_map))
            if !dest_map.is_empty()
                && !src_map.contains_key("type")
                && !free_form.contains(&key) =>
        {
            for (nested, value) in src_map {
                let existing = dest_map
                    .get_mut(nested)
                    .ok_or_else(|| HarnessError::UnknownKey(nested.clone()))?;
                overlay(nested, existing, value, free_form)?;
            }
        }
        (dest_slot, src_value) => {
            *dest_slot = src_value.clone();
        }
    }
    Ok(())
}

/// Merges a partial `overrides` tree onto `target` after validating its keys.
///
/// # Arguments
/// * `target` - The tree to merge into.
/// * `overrides` - The partial tree; its top-level keys may live at any depth of `target`.
/// * `free_form` - Keys whose values are replaced as a whole instead of merged.
///
/// # Errors
/// Returns `Unsupported` if either root is not an object, or `UnknownKey` if an
/// override key exists nowhere in `target` or a nested key is missing from the
/// value it is merged into. On error `target` is left untouched.
pub fn merge(target: &mut Value, overrides: &Value, free_form: &[&str]) -> Result<()> {
    if !target.is_object() {
        return Err(HarnessError::Unsupported(format!(
            "merge target must be an object, got {target}"
        )));
    }
    let overrides = as_object(overrides)?;
    check_keys(target, overrides)?;

    let mut merged = target.clone();
    for (key, value) in overrides {
        paste(&mut merged, key, value, free_form)?;
    }
    *target = merged;
    Ok(())
}

/// Borrows `value` as an object.
///
/// # Errors
/// Returns `Unsupported` for any other kind of value.
pub fn as_object(value: &Value) -> Result<&Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| HarnessError::Unsupported(format!("expected an object, got {value}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn search_looks_at_every_depth() {
        let tree = json!({"a": 1, "b": {"c": {"d": [1, 2]}}});
        assert!(search(&tree, "a"));
        assert!(search(&tree, "d"));
        assert!(!search(&tree, "zzz"));
    }

    #[test]
    fn merge_pastes_nested_keys() {
        let mut tree = json!({"a": 1, "b": {"c": 2}});
        merge(&mut tree, &json!({"c": 5}), &[]).unwrap();
        assert_eq!(tree, json!({"a": 1, "b": {"c": 5}}));
    }

    #[test]
    fn merge_pastes_every_occurrence() {
        let mut tree = json!({"x": {"size": 1}, "y": {"size": 2}, "size": 3});
        merge(&mut tree, &json!({"size": 7}), &[]).unwrap();
        assert_eq!(tree, json!({"x": {"size": 7}, "y": {"size": 7}, "size": 7}));
    }

    #[test]
    fn merge_overlays_nested_objects_key_by_key() {
        let mut tree = json!({"collect": {"interval": 100, "per_print": 1}});
        merge(&mut tree, &json!({"collect": {"interval": 5}}), &[]).unwrap();
        assert_eq!(tree, json!({"collect": {"interval": 5, "per_print": 1}}));
    }

    #[test]
    fn misspelled_nested_key_is_rejected() {
        let mut tree = json!({"collect": {"interval": 100, "per_print": 1}});
        let err = merge(&mut tree, &json!({"collect": {"intreval": 5}}), &[]).unwrap_err();

        assert!(matches!(err, HarnessError::UnknownKey(ref key) if key == "intreval"));
        assert_eq!(tree, json!({"collect": {"interval": 100, "per_print": 1}}));
    }

    #[test]
    fn typed_specs_and_free_form_maps_are_replaced_whole() {
        let mut tree = json!({
            "kwargs": {"num_unrollings": 1},
            "empty": {},
            "lr": {"type": "exponential_decay", "init": 0.1, "decay": 0.5, "period": 10}
        });
        let overrides = json!({
            "kwargs": {"dropout": 0.5},
            "empty": {"anything": 1},
            "lr": {"type": "fixed", "value": 0.5}
        });
        merge(&mut tree, &overrides, &["kwargs"]).unwrap();

        assert_eq!(tree["kwargs"], json!({"dropout": 0.5}));
        assert_eq!(tree["empty"], json!({"anything": 1}));
        assert_eq!(tree["lr"], json!({"type": "fixed", "value": 0.5}));

        merge(&mut tree, &json!({"lr": {"value": 0.25}}), &[]).unwrap();
        assert_eq!(tree["lr"], json!({"type": "fixed", "value": 0.25}));
    }

    #[test]
    fn unknown_key_is_named_and_leaves_target_untouched() {
        let mut tree = json!({"a": 1, "b": {"c": 2}});
        let err = merge(&mut tree, &json!({"a": 3, "zzz": 1}), &[]).unwrap_err();

        assert!(matches!(err, HarnessError::UnknownKey(ref key) if key == "zzz"));
        assert_eq!(tree, json!({"a": 1, "b": {"c": 2}}));
    }

    #[test]
    fn non_object_roots_are_unsupported() {
        let mut tree = json!({"a": 1});
        assert!(matches!(
            merge(&mut tree, &json!([1, 2]), &[]),
            Err(HarnessError::Unsupported(_))
        ));
        let mut scalar = json!(3);
        assert!(merge(&mut scalar, &json!({}), &[]).is_err());
    }
}
