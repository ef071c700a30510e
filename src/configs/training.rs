use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    controller::{ControllerSpec, Policy},
    error::{HarnessError, Result},
    schedule::{ResultKind, TensorSchedule},
};

/// Settings fixed for a whole session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartSpecs {
    #[serde(default)]
    pub restore_path: Option<PathBuf>,
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    pub result_types: Vec<ResultKind>,
}

/// How often training results are collected and printed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CollectSpecs {
    /// `None` disables collection, validation and result files.
    pub results_collect_interval: Option<u64>,
    pub print_per_collected: u64,
    pub example_per_print: u64,
}

impl CollectSpecs {
    /// Period of printed reports and validation passes.
    ///
    /// `None` when collection is disabled or the period does not fit a `u64`.
    pub fn valid_period(&self) -> Option<u64> {
        self.results_collect_interval
            .and_then(|interval| interval.checked_mul(self.print_per_collected))
    }

    /// # Errors
    /// Returns `InvalidConfig` for a zero interval or print ratio, or a
    /// validation period that overflows.
    pub fn check(&self) -> Result<()> {
        if self.results_collect_interval == Some(0) || self.print_per_collected == 0 {
            return Err(HarnessError::InvalidConfig(
                "results_collect_interval and print_per_collected must be positive".into(),
            ));
        }
        if self.results_collect_interval.is_some() && self.valid_period().is_none() {
            return Err(HarnessError::InvalidConfig(format!(
                "results_collect_interval {:?} times print_per_collected {} overflows",
                self.results_collect_interval, self.print_per_collected
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScheduleSpecs {
    pub to_be_collected_while_training: CollectSpecs,
    pub printed_result_types: Vec<ResultKind>,
    pub printed_controllers: Vec<String>,
    pub train_tensor_schedule: TensorSchedule,
    pub validation_tensor_schedule: TensorSchedule,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrainSpecs {
    pub learning_rate: ControllerSpec,
    /// Controller specs carrying the extra `placeholder` they feed.
    #[serde(default)]
    pub additions_to_feed_dict: Option<Vec<Value>>,
    pub stop: ControllerSpec,
    #[serde(default)]
    pub train_dataset: Option<String>,
    pub batch_size: ControllerSpec,
    #[serde(default)]
    pub train_batch_kwargs: Map<String, Value>,
    #[serde(default)]
    pub checkpoint_steps: Option<ControllerSpec>,
    #[serde(default)]
    pub debug: Option<ControllerSpec>,
    #[serde(default)]
    pub validation_datasets: Vec<String>,
    pub validation_batch_size: usize,
    #[serde(default)]
    pub valid_batch_kwargs: Map<String, Value>,
}

impl TrainSpecs {
    /// Shifts step limits and checkpoint steps by the run's first step.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a shifted step does not fit a `u64`.
    pub fn offset_by(&mut self, init_step: u64) -> Result<()> {
        let shift = |step: &mut u64| -> Result<()> {
            *step = step.checked_add(init_step).ok_or_else(|| {
                HarnessError::InvalidConfig(format!("step {step} overflows past {init_step}"))
            })?;
            Ok(())
        };

        if let Policy::LimitSteps { limit } = &mut self.stop.policy {
            shift(limit)?;
        }
        if let Some(ControllerSpec {
            policy: Policy::TrueOnSteps { steps },
            ..
        }) = &mut self.checkpoint_steps
        {
            steps.iter_mut().try_for_each(shift)?;
        }
        Ok(())
    }

    /// The feed additions as `(placeholder, spec)` pairs.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for an addition with neither a `placeholder` nor a
    /// `name`, or `InvalidController` if its spec is malformed.
    pub fn feed_additions(&self) -> Result<Vec<(String, ControllerSpec)>> {
        let Some(additions) = &self.additions_to_feed_dict else {
            return Ok(Vec::new());
        };

        additions
            .iter()
            .map(|addition| -> Result<(String, ControllerSpec)> {
                let spec = ControllerSpec::from_value(addition)?;
                let placeholder = addition
                    .get("placeholder")
                    .and_then(Value::as_str)
                    .or(spec.name.as_deref())
                    .ok_or_else(|| {
                        HarnessError::InvalidConfig(format!(
                            "feed addition {addition} names no placeholder"
                        ))
                    })?
                    .to_string();
                Ok((placeholder, spec))
            })
            .collect()
    }
}

/// One fully resolved run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunSpecs {
    pub train_specs: TrainSpecs,
    pub schedule: ScheduleSpecs,
}

impl RunSpecs {
    /// Reads and checks a resolved run tree.
    ///
    /// # Errors
    /// Returns `Json` if the tree does not match the expected layout, or
    /// `InvalidConfig` for zero or overflowing collection periods or a missing
    /// train dataset.
    pub fn from_value(value: &Value) -> Result<Self> {
        let specs: Self = serde_json::from_value(value.clone())?;

        specs.schedule.to_be_collected_while_training.check()?;
        if specs.train_specs.train_dataset.is_none() {
            return Err(HarnessError::InvalidConfig("no train dataset given".into()));
        }
        Ok(specs)
    }
}

impl StartSpecs {
    /// # Errors
    /// Returns `Json` if the tree does not match the expected layout.
    pub fn from_value(value: &Value) -> Result<Self> {
        let start = value.get("start_specs").unwrap_or(value);
        Ok(serde_json::from_value(start.clone())?)
    }
}
