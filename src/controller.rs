use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{HarnessError, Result},
    progress::ProgressStore,
};

/// A value produced by a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ControlValue {
    /// Truthiness of the value: `false`, `0` and `0.0` are false.
    pub fn is_truthy(&self) -> bool {
        match *self {
            Self::Bool(b) => b,
            Self::Int(i) => i != 0,
            Self::Float(x) => x != 0.0,
        }
    }

    /// Returns the value as a float, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Bool(_) => None,
            Self::Int(i) => Some(i as f64),
            Self::Float(x) => Some(x),
        }
    }

    /// Returns the value as a count, if it is a non-negative whole number.
    pub fn as_usize(&self) -> Option<usize> {
        match *self {
            Self::Int(i) => usize::try_from(i).ok(),
            Self::Float(x) if x >= 0.0 && x.fract() == 0.0 && x <= usize::MAX as f64 => {
                Some(x as usize)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<ControlValue> for Value {
    fn from(value: ControlValue) -> Self {
        match value {
            ControlValue::Bool(b) => Value::from(b),
            ControlValue::Int(i) => Value::from(i),
            ControlValue::Float(x) => Value::from(x),
        }
    }
}

/// The policy a controller follows, selected by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Policy {
    /// Always the same value.
    Fixed { value: ControlValue },
    /// `init * decay^(step / period)`, a staircase.
    ExponentialDecay { init: f64, decay: f64, period: u64 },
    /// True while `step <= limit`.
    LimitSteps { limit: u64 },
    /// True when `step % period == 0`.
    PeriodicTruth { period: u64 },
    /// True when `step` is one of `steps`.
    TrueOnSteps { steps: Vec<u64> },
    /// True when any of the wrapped controllers changed since the last evaluation.
    ChangesDetector { old_specs: Vec<ControllerSpec> },
}

/// The declarative specification of a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub policy: Policy,
}

impl ControllerSpec {
    /// Creates a new unnamed `ControllerSpec`.
    pub fn new(policy: Policy) -> Self {
        Self { name: None, policy }
    }

    /// Wraps `specs` in a `changes_detector` tracking all of them.
    pub fn changes_tracker(specs: Vec<ControllerSpec>) -> Self {
        Self::new(Policy::ChangesDetector { old_specs: specs })
    }

    /// A controller that never fires.
    pub fn never() -> Self {
        Self::new(Policy::TrueOnSteps { steps: Vec::new() })
    }

    /// Reads a spec from a configuration tree node.
    ///
    /// # Errors
    /// Returns `InvalidController` if the node is not a known controller spec.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| HarnessError::InvalidController(format!("{e} in {value}")))
    }
}

/// A step-indexed value provider driven by a declarative [`Policy`].
///
/// Evaluation reads the current step from the [`ProgressStore`]. Only the
/// `changes_detector` policy keeps state: the last value seen from each of its
/// wrapped controllers.
#[derive(Debug, Clone)]
pub struct Controller {
    spec: ControllerSpec,
    tracked: Vec<(Controller, ControlValue)>,
}

impl Controller {
    /// Creates a new `Controller`.
    ///
    /// A `changes_detector` evaluates and caches each wrapped controller right away.
    ///
    /// # Errors
    /// Returns `InvalidController` if a period is zero, recursively.
    pub fn new(spec: ControllerSpec, store: &ProgressStore) -> Result<Self> {
        match &spec.policy {
            Policy::ExponentialDecay { period: 0, .. } | Policy::PeriodicTruth { period: 0 } => {
                return Err(HarnessError::InvalidController(format!(
                    "controller {:?} has a zero period",
                    spec.name
                )));
            }
            _ => {}
        }

        let tracked = match &spec.policy {
            Policy::ChangesDetector { old_specs } => old_specs
                .iter()
                .map(|child_spec| -> Result<(Controller, ControlValue)> {
                    let mut child = Controller::new(child_spec.clone(), store)?;
                    let last = child.evaluate(store);
                    Ok((child, last))
                })
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };

        Ok(Self { spec, tracked })
    }

    /// Builds a controller straight from a configuration tree node.
    ///
    /// # Errors
    /// Returns `InvalidController` for unknown `type`s or malformed fields.
    pub fn from_value(value: &Value, store: &ProgressStore) -> Result<Self> {
        Self::new(ControllerSpec::from_value(value)?, store)
    }

    /// The controller's name, used for display filtering.
    pub fn name(&self) -> Option<&str> {
        self.spec.name.as_deref()
    }

    /// The specification this controller was built from.
    pub fn spec(&self) -> &ControllerSpec {
        &self.spec
    }

    /// Evaluates the controller at the store's current step.
    pub fn evaluate(&mut self, store: &ProgressStore) -> ControlValue {
        let step = store.step();
        match &self.spec.policy {
            Policy::Fixed { value } => *value,
            Policy::ExponentialDecay {
                init,
                decay,
                period,
            } => {
                let stairs = i32::try_from(step / period).unwrap_or(i32::MAX);
                ControlValue::Float(init * decay.powi(stairs))
            }
            Policy::LimitSteps { limit } => ControlValue::Bool(step <= *limit),
            Policy::PeriodicTruth { period } => ControlValue::Bool(step % period == 0),
            Policy::TrueOnSteps { steps } => ControlValue::Bool(steps.contains(&step)),
            Policy::ChangesDetector { .. } => {
                // Every child is evaluated so every cache is refreshed.
                let mut changed = false;
                for (child, last) in &mut self.tracked {
                    let current = child.evaluate(store);
                    if current != *last {
                        *last = current;
                        changed = true;
                    }
                }
                ControlValue::Bool(changed)
            }
        }
    }

    /// Evaluates the controller and returns its truthiness.
    pub fn fires(&mut self, store: &ProgressStore) -> bool {
        self.evaluate(store).is_truthy()
    }
}
