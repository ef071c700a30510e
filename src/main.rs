use std::{env, fs, io, path::Path};

use anyhow::{bail, Context};
use serde_json::{json, Value};

use step_harness::{
    train, Batch, BatchKwargs, DataFeed, ExecutionContext, Feed, FeedFactory, HarnessError, Hook,
    HookRegistry, Output,
};

/// `y = w * x`, fitted by plain gradient descent.
struct LinearModel {
    weight: f64,
    hooks: HookRegistry,
}

impl LinearModel {
    fn new() -> Self {
        let hooks = HookRegistry::new()
            .with("train_op", Hook::Single("train_op".into()))
            .with("loss", Hook::Single("loss".into()))
            .with("perplexity", Hook::Single("perplexity".into()))
            .with("accuracy", Hook::Single("accuracy".into()))
            .with("validation_predictions", Hook::Single("predictions".into()))
            .with("validation_loss", Hook::Single("loss".into()))
            .with("validation_perplexity", Hook::Single("perplexity".into()))
            .with("validation_accuracy", Hook::Single("accuracy".into()))
            .with("weight", Hook::Single("weight".into()));

        Self { weight: 0.0, hooks }
    }
}

impl ExecutionContext for LinearModel {
    fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    fn execute(&mut self, outputs: &[String], feed: &Feed) -> step_harness::Result<Vec<Output>> {
        let pairs: Vec<(f64, f64)> = feed
            .batch
            .inputs
            .iter()
            .zip(&feed.batch.labels)
            .filter_map(|(x, y)| Some((f64::from(*x.first()?), f64::from(*y.first()?))))
            .collect();
        if pairs.is_empty() {
            return Err(HarnessError::Execution("empty batch".into()));
        }

        let n = pairs.len() as f64;
        let predictions: Vec<f64> = pairs.iter().map(|(x, _)| self.weight * x).collect();
        let loss = pairs
            .iter()
            .zip(&predictions)
            .map(|((_, y), p)| (p - y).powi(2))
            .sum::<f64>()
            / n;
        let gradient = pairs
            .iter()
            .zip(&predictions)
            .map(|((x, y), p)| 2.0 * (p - y) * x)
            .sum::<f64>()
            / n;
        let accuracy = pairs
            .iter()
            .zip(&predictions)
            .filter(|((_, y), p)| (*p - y).abs() < 0.5)
            .count() as f64
            / n;

        let weight = self.weight;
        let results = outputs
            .iter()
            .map(|output| match output.as_str() {
                "train_op" => Ok(Output::Empty),
                "loss" => Ok(Output::Scalar(loss)),
                "perplexity" => Ok(Output::Scalar(loss.exp())),
                "accuracy" => Ok(Output::Scalar(accuracy)),
                "predictions" => Ok(Output::Array(predictions.clone())),
                "weight" => Ok(Output::Scalar(weight)),
                other => Err(HarnessError::Execution(format!("unknown output '{other}'"))),
            })
            .collect::<step_harness::Result<Vec<_>>>()?;

        if outputs.iter().any(|output| output == "train_op") {
            self.weight -= feed.learning_rate.unwrap_or(0.0) * gradient;
        }
        Ok(results)
    }

    fn save_checkpoint(&mut self, path: &Path) -> io::Result<()> {
        fs::write(path, self.weight.to_string())
    }

    fn restore_checkpoint(&mut self, path: &Path) -> io::Result<()> {
        let text = fs::read_to_string(path)?;
        self.weight = text
            .trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(())
    }

    fn build_parameters(&self) -> Value {
        json!({"model": "linear", "init_weight": 0.0})
    }
}

/// Points of `y = 3x` on a fixed grid, served in order.
struct LinePoints {
    points: Vec<(f32, f32)>,
    batch_size: usize,
    cursor: usize,
}

impl DataFeed for LinePoints {
    fn next(&mut self) -> Batch {
        let mut batch = Batch::default();
        for _ in 0..self.batch_size.max(1) {
            let (x, y) = self.points[self.cursor % self.points.len()];
            batch.inputs.push(vec![x]);
            batch.labels.push(vec![y]);
            self.cursor += 1;
        }
        batch
    }

    fn dataset_length(&self) -> usize {
        self.points.len().div_ceil(self.batch_size.max(1))
    }

    fn change_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size;
    }

    fn change_specs(&mut self, kwargs: &BatchKwargs) {
        log::debug!("line feed ignores batch kwargs {kwargs:?}");
    }
}

struct LineDatasets;

impl FeedFactory for LineDatasets {
    fn open(
        &mut self,
        dataset: &str,
        batch_size: usize,
        _kwargs: &BatchKwargs,
    ) -> step_harness::Result<Box<dyn DataFeed>> {
        let range = match dataset {
            "train" => 0..40,
            "valid" => 40..50,
            other => return Err(HarnessError::InvalidConfig(format!("unknown dataset '{other}'"))),
        };
        let points = range
            .map(|i| {
                let x = i as f32 / 50.0;
                (x, 3.0 * x)
            })
            .collect();

        Ok(Box::new(LinePoints {
            points,
            batch_size,
            cursor: 0,
        }))
    }
}

fn demo_overrides() -> Vec<Value> {
    vec![
        json!({
            "result_types": ["loss", "perplexity", "accuracy"],
            "train_dataset_name": "train",
            "validation_dataset_names": ["valid"],
            "learning_rate": {"type": "exponential_decay", "init": 0.5, "decay": 0.5, "period": 200},
            "stop": 399,
            "batch_size": 8,
            "results_collect_interval": 50,
            "print_per_collected": 2,
            "printed_result_types": ["loss", "accuracy"],
            "train_print_tensors": {"weight": 100}
        }),
        json!({"stop": 199, "batch_size": 4, "validation_batch_size": 2}),
    ]
}

fn read_overrides(path: &str) -> anyhow::Result<Vec<Value>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let value: Value = serde_json::from_str(&text).with_context(|| format!("parsing {path}"))?;
    match value {
        Value::Array(runs) => Ok(runs),
        Value::Object(_) => Ok(vec![value]),
        other => bail!("{path} must hold an override object or a list of them, got {other}"),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let overrides = match env::args().nth(1) {
        Some(path) => read_overrides(&path)?,
        None => demo_overrides(),
    };

    let mut model = LinearModel::new();
    let report = train(&mut model, &mut LineDatasets, &overrides)?;

    println!(
        "trained {} run(s) up to step {}, weight = {}",
        report.runs, report.final_step, model.weight
    );
    Ok(())
}
