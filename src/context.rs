//! The collaborators a training session drives but does not implement.

use std::{io, path::Path};

use serde_json::{Map, Value};

use crate::{
    controller::ControlValue, error::Result, results::Output, schedule::HookRegistry,
};

/// Free-form arguments handed to a data feed, e.g. `num_unrollings`.
pub type BatchKwargs = Map<String, Value>;

/// One batch of inputs and labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub inputs: Vec<Vec<f32>>,
    pub labels: Vec<Vec<f32>>,
}

/// Everything fed to the execution context alongside a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub batch: Batch,
    /// `None` during validation.
    pub learning_rate: Option<f64>,
    /// Extra named values driven by controllers.
    pub params: Vec<(String, ControlValue)>,
}

/// Runs named outputs, typically a model bound to some compute backend.
pub trait ExecutionContext {
    /// The aliases this context provides.
    fn hooks(&self) -> &HookRegistry;

    fn hooks_mut(&mut self) -> &mut HookRegistry;

    /// Runs `outputs` and returns one result per requested output, in order.
    ///
    /// # Errors
    /// Implementations report failures as `HarnessError::Execution`.
    fn execute(&mut self, outputs: &[String], feed: &Feed) -> Result<Vec<Output>>;

    /// Persists the current weights at `path`.
    fn save_checkpoint(&mut self, path: &Path) -> io::Result<()>;

    /// Loads weights saved by [`ExecutionContext::save_checkpoint`].
    fn restore_checkpoint(&mut self, path: &Path) -> io::Result<()>;

    /// Switches the context into an interactive debugging mode.
    fn enable_debugging(&mut self) {}

    /// Parameters the context was built with, recorded in the launch log.
    fn build_parameters(&self) -> Value {
        Value::Null
    }
}

/// A source of batches for one dataset.
pub trait DataFeed {
    fn next(&mut self) -> Batch;

    /// Number of batches in one pass over the dataset.
    fn dataset_length(&self) -> usize;

    fn change_batch_size(&mut self, batch_size: usize);

    fn change_specs(&mut self, kwargs: &BatchKwargs);
}

/// Opens data feeds by dataset name.
pub trait FeedFactory {
    /// # Errors
    /// Returns an error if the dataset is unknown or cannot be read.
    fn open(
        &mut self,
        dataset: &str,
        batch_size: usize,
        kwargs: &BatchKwargs,
    ) -> Result<Box<dyn DataFeed>>;
}
