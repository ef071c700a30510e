use serde_json::Value;

use crate::error::{HarnessError, Result};

use super::{defaults::FREE_FORM_KEYS, shorthand, tree};

/// Resolves a sequence of partial overrides into one full tree per run.
///
/// The first override is merged onto a copy of `defaults`, every later one onto
/// a copy of the previously resolved run, so omitted keys carry forward. With no
/// overrides the defaults are the single resolved run. Batch kwargs and tensor
/// schedules are replaced as a whole.
///
/// # Errors
/// Returns the first merge error, naming the offending key.
pub fn resolve(overrides: &[Value], defaults: &Value) -> Result<Vec<Value>> {
    if overrides.is_empty() {
        return Ok(vec![defaults.clone()]);
    }

    let mut resolved: Vec<Value> = Vec::with_capacity(overrides.len());
    for partial in overrides {
        let mut run = resolved.last().unwrap_or(defaults).clone();
        tree::merge(&mut run, partial, FREE_FORM_KEYS)?;
        resolved.push(run);
    }
    Ok(resolved)
}

/// A session configuration split into its fixed part and its per-run parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSession {
    /// Everything in the defaults except the repeated branch.
    pub start: Value,
    /// One resolved repeated branch per run.
    pub runs: Vec<Value>,
}

/// Resolves session overrides after shorthand expansion.
///
/// The first override resolves against the whole of `defaults`; later overrides
/// resolve against the previous run's `branch` only, so they may not touch the
/// fixed part of the session.
///
/// # Errors
/// Returns `InvalidConfig` if `defaults` has no `branch`, or any shorthand or
/// merge error.
pub fn resolve_session(
    overrides: &[Value],
    defaults: &Value,
    branch: &str,
) -> Result<ResolvedSession> {
    let expanded = overrides
        .iter()
        .map(shorthand::expand)
        .collect::<Result<Vec<_>>>()?;

    let (first, rest) = match expanded.split_first() {
        Some((first, rest)) => (Some(first), rest),
        None => (None, &[][..]),
    };

    let mut whole = defaults.clone();
    if let Some(first) = first {
        tree::merge(&mut whole, first, FREE_FORM_KEYS)?;
    }

    let Value::Object(mut start) = whole else {
        return Err(HarnessError::Unsupported("defaults must be an object".into()));
    };
    let first_run = start
        .remove(branch)
        .ok_or_else(|| HarnessError::InvalidConfig(format!("defaults have no '{branch}' branch")))?;

    let mut runs = vec![first_run.clone()];
    if !rest.is_empty() {
        runs.extend(resolve(rest, &first_run)?);
    }

    log::info!("resolved {} run(s)", runs.len());
    Ok(ResolvedSession {
        start: Value::Object(start),
        runs,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::configs::defaults::{train_defaults, RUN_BRANCH};

    #[test]
    fn later_runs_carry_forward() {
        let defaults = json!({"a": 1, "b": {"c": 2}});
        let runs = resolve(&[json!({"c": 5}), json!({"a": 9})], &defaults).unwrap();

        assert_eq!(runs[0], json!({"a": 1, "b": {"c": 5}}));
        assert_eq!(runs[1], json!({"a": 9, "b": {"c": 5}}));
    }

    #[test]
    fn unknown_key_is_a_config_error() {
        let defaults = json!({"a": 1, "b": {"c": 2}});
        let err = resolve(&[json!({"zzz": 1})], &defaults).unwrap_err();
        assert!(matches!(err, HarnessError::UnknownKey(ref key) if key == "zzz"));
        assert_eq!(err.to_string(), "wrong argument name 'zzz'");
    }

    #[test]
    fn no_overrides_resolve_to_defaults() {
        let defaults = json!({"a": 1});
        assert_eq!(resolve(&[], &defaults).unwrap(), vec![defaults]);
    }

    #[test]
    fn session_splits_start_specs_from_runs() {
        let overrides = [
            json!({"save_path": "out", "stop": 20, "results_collect_interval": 1}),
            json!({"stop": 40}),
        ];
        let session = resolve_session(&overrides, &train_defaults(), RUN_BRANCH).unwrap();

        assert_eq!(session.start["start_specs"]["save_path"], json!("out"));
        assert!(session.start.get(RUN_BRANCH).is_none());
        assert_eq!(session.runs.len(), 2);
        assert_eq!(session.runs[0]["train_specs"]["stop"]["limit"], json!(20));
        assert_eq!(session.runs[1]["train_specs"]["stop"]["limit"], json!(40));
        assert_eq!(
            session.runs[1]["schedule"]["to_be_collected_while_training"]
                ["results_collect_interval"],
            json!(1)
        );
    }

    #[test]
    fn later_runs_cannot_touch_start_specs() {
        let overrides = [json!({}), json!({"save_path": "elsewhere"})];
        let err = resolve_session(&overrides, &train_defaults(), RUN_BRANCH).unwrap_err();
        assert!(matches!(err, HarnessError::UnknownKey(ref key) if key == "save_path"));
    }

    #[test]
    fn misspelled_nested_setting_is_rejected() {
        let overrides = [json!({
            "train_dataset": "train",
            "to_be_collected_while_training": {"results_colect_interval": 5}
        })];
        let err = resolve_session(&overrides, &train_defaults(), RUN_BRANCH).unwrap_err();
        assert!(
            matches!(err, HarnessError::UnknownKey(ref key) if key == "results_colect_interval")
        );
    }

    #[test]
    fn switching_controller_type_drops_old_fields() {
        let overrides = [json!({"train_dataset": "train", "learning_rate": 0.5})];
        let session = resolve_session(&overrides, &train_defaults(), RUN_BRANCH).unwrap();
        assert_eq!(
            session.runs[0]["train_specs"]["learning_rate"],
            json!({"type": "fixed", "value": 0.5, "name": "learning_rate"})
        );
    }

    #[test]
    fn batch_kwargs_take_any_key() {
        let overrides = [
            json!({"train_dataset": "train", "train_batch_kwargs": {"dropout": 0.1}}),
            json!({"train_batch_kwargs": {"num_unrollings": 4}}),
        ];
        let session = resolve_session(&overrides, &train_defaults(), RUN_BRANCH).unwrap();
        assert_eq!(
            session.runs[1]["train_specs"]["train_batch_kwargs"],
            json!({"num_unrollings": 4})
        );
    }

    #[test]
    fn empty_session_is_one_default_run() {
        let session = resolve_session(&[], &train_defaults(), RUN_BRANCH).unwrap();
        assert_eq!(session.runs.len(), 1);
        assert_eq!(session.runs[0], train_defaults()[RUN_BRANCH]);
    }
}
