use serde::Deserialize;
use serde_json::Value;

use crate::error::{HarnessError, Result};

/// When a single alias is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasSchedule {
    /// On exactly these steps.
    OnSteps(Vec<u64>),
    /// Whenever `step % period == 0`. A zero period is never due.
    Every(u64),
}

impl AliasSchedule {
    pub fn is_due(&self, step: u64) -> bool {
        match self {
            Self::OnSteps(steps) => steps.contains(&step),
            Self::Every(period) => step.checked_rem(*period) == Some(0),
        }
    }

    fn from_value(alias: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64().ok_or_else(|| {
                        HarnessError::InvalidConfig(format!(
                            "step {item} of alias '{alias}' is not a non-negative integer"
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Self::OnSteps),
            Value::Number(n) => match n.as_u64() {
                Some(0) | None => Err(HarnessError::InvalidConfig(format!(
                    "period {n} of alias '{alias}' must be a positive integer"
                ))),
                Some(period) => Ok(Self::Every(period)),
            },
            other => Err(HarnessError::InvalidConfig(format!(
                "schedule of alias '{alias}' must be a list of steps or a period, got {other}"
            ))),
        }
    }
}

/// The schedule of one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategorySchedule {
    /// Each alias has its own policy.
    PerAlias(Vec<(String, AliasSchedule)>),
    /// Every alias is fetched on every step.
    Always(Vec<String>),
}

impl CategorySchedule {
    /// Every alias mentioned by the category, in schedule order.
    pub fn aliases(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            Self::PerAlias(entries) => Box::new(entries.iter().map(|(alias, _)| alias.as_str())),
            Self::Always(aliases) => Box::new(aliases.iter().map(String::as_str)),
        }
    }

    /// The aliases due at `step`, in schedule order.
    pub fn due(&self, step: u64) -> Vec<&str> {
        match self {
            Self::PerAlias(entries) => entries
                .iter()
                .filter(|(_, schedule)| schedule.is_due(step))
                .map(|(alias, _)| alias.as_str())
                .collect(),
            Self::Always(aliases) => aliases.iter().map(String::as_str).collect(),
        }
    }
}

/// A declarative per-category schedule of named outputs.
///
/// ```json
/// {
///     "train_print_tensors": {"gradients": 100, "activations": [0, 10, 500]},
///     "always_printed": ["memory"]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Value")]
pub struct TensorSchedule {
    categories: Vec<(String, CategorySchedule)>,
}

impl TensorSchedule {
    /// Parses a schedule tree, keeping the order categories and aliases were written in.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for a malformed category or leaf, or a zero period.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(HarnessError::InvalidConfig(format!(
                "a tensor schedule must be an object, got {value}"
            )));
        };

        let categories = map
            .iter()
            .map(|(category, schedule)| -> Result<(String, CategorySchedule)> {
                let schedule = match schedule {
                    Value::Object(entries) => CategorySchedule::PerAlias(
                        entries
                            .iter()
                            .map(|(alias, leaf)| {
                                AliasSchedule::from_value(alias, leaf)
                                    .map(|schedule| (alias.clone(), schedule))
                            })
                            .collect::<Result<_>>()?,
                    ),
                    Value::Array(items) => CategorySchedule::Always(
                        items
                            .iter()
                            .map(|item| {
                                item.as_str().map(str::to_string).ok_or_else(|| {
                                    HarnessError::InvalidConfig(format!(
                                        "category '{category}' lists a non-string alias {item}"
                                    ))
                                })
                            })
                            .collect::<Result<_>>()?,
                    ),
                    other => {
                        return Err(HarnessError::InvalidConfig(format!(
                            "category '{category}' must be an object or a list, got {other}"
                        )))
                    }
                };
                Ok((category.clone(), schedule))
            })
            .collect::<Result<_>>()?;

        Ok(Self { categories })
    }

    pub fn categories(&self) -> &[(String, CategorySchedule)] {
        &self.categories
    }

    /// Every alias mentioned anywhere in the schedule.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .flat_map(|(_, schedule)| schedule.aliases())
    }
}

impl TryFrom<Value> for TensorSchedule {
    type Error = HarnessError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(&value)
    }
}
