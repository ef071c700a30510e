mod launch_log;

use std::{fs, io::Write, path::PathBuf};

use serde_json::Value;

pub use launch_log::LaunchLog;

use crate::{
    configs::{
        resolve_session, train_defaults, RunSpecs, ScheduleSpecs, StartSpecs, TrainSpecs,
        RUN_BRANCH,
    },
    context::{Batch, BatchKwargs, DataFeed, ExecutionContext, Feed, FeedFactory},
    controller::{ControlValue, Controller, ControllerSpec, Policy},
    error::{HarnessError, Result},
    progress::ProgressStore,
    results::{extract, realign, Demuxed, ResultSink},
    schedule::{OutputScheduler, Plan, Regime},
};

/// Alias run alone before each validation pass, if the context provides it.
const RESET_VALIDATION_STATE: &str = "reset_validation_state";

/// What a finished session hands back.
#[derive(Debug, Clone)]
pub struct TrainReport {
    /// The step after the last executed one.
    pub final_step: u64,
    /// Number of runs executed.
    pub runs: usize,
    /// Every series collected during the session.
    pub progress: ProgressStore,
}

/// Batch arguments, some of them driven by controllers.
struct BatchKwargsDriver {
    fixed: BatchKwargs,
    controlled: Vec<(String, Controller)>,
}

impl BatchKwargsDriver {
    fn new(kwargs: &BatchKwargs, store: &ProgressStore) -> Result<Self> {
        let mut fixed = BatchKwargs::new();
        let mut controlled = Vec::new();
        for (key, arg) in kwargs {
            match arg {
                Value::Object(spec) if spec.contains_key("type") => {
                    controlled.push((key.clone(), Controller::from_value(arg, store)?));
                }
                _ => {
                    fixed.insert(key.clone(), arg.clone());
                }
            }
        }
        Ok(Self { fixed, controlled })
    }

    fn specs(&self) -> Vec<ControllerSpec> {
        self.controlled
            .iter()
            .map(|(_, controller)| controller.spec().clone())
            .collect()
    }

    fn build(&mut self, store: &ProgressStore) -> BatchKwargs {
        let mut kwargs = self.fixed.clone();
        for (key, controller) in &mut self.controlled {
            kwargs.insert(key.clone(), controller.evaluate(store).into());
        }
        kwargs
    }
}

/// The controllers driving one run.
struct RunControllers {
    learning_rate: Controller,
    additions: Vec<(String, Controller)>,
    should_continue: Controller,
    validation_due: Controller,
    checkpoint_due: Controller,
    batch_size: Controller,
    batch_size_changed: Controller,
    debug: Controller,
    batch_kwargs: BatchKwargsDriver,
    batch_kwargs_changed: Controller,
}

impl RunControllers {
    fn new(train: &TrainSpecs, schedule: &ScheduleSpecs, store: &ProgressStore) -> Result<Self> {
        let validation = match schedule.to_be_collected_while_training.valid_period() {
            Some(period) => ControllerSpec::new(Policy::PeriodicTruth { period }),
            None => ControllerSpec::never(),
        };
        let batch_kwargs = BatchKwargsDriver::new(&train.train_batch_kwargs, store)?;
        let batch_kwargs_changed =
            Controller::new(ControllerSpec::changes_tracker(batch_kwargs.specs()), store)?;

        Ok(Self {
            learning_rate: Controller::new(train.learning_rate.clone(), store)?,
            additions: train
                .feed_additions()?
                .into_iter()
                .map(|(placeholder, spec)| {
                    Controller::new(spec, store).map(|controller| (placeholder, controller))
                })
                .collect::<Result<_>>()?,
            should_continue: Controller::new(train.stop.clone(), store)?,
            validation_due: Controller::new(validation, store)?,
            checkpoint_due: Controller::new(
                train.checkpoint_steps.clone().unwrap_or_else(ControllerSpec::never),
                store,
            )?,
            batch_size: Controller::new(train.batch_size.clone(), store)?,
            batch_size_changed: Controller::new(
                ControllerSpec::changes_tracker(vec![train.batch_size.clone()]),
                store,
            )?,
            debug: Controller::new(
                train.debug.clone().unwrap_or_else(ControllerSpec::never),
                store,
            )?,
            batch_kwargs,
            batch_kwargs_changed,
        })
    }

    fn batch_size(&mut self, store: &ProgressStore) -> Result<usize> {
        let value = self.batch_size.evaluate(store);
        value.as_usize().ok_or_else(|| {
            HarnessError::InvalidConfig(format!("batch size {value} is not a count"))
        })
    }

    fn params(&mut self, store: &ProgressStore) -> Vec<(String, ControlValue)> {
        self.additions
            .iter_mut()
            .map(|(placeholder, controller)| (placeholder.clone(), controller.evaluate(store)))
            .collect()
    }

    /// Current values of every displayable controller.
    fn readings(&mut self, store: &ProgressStore) -> Vec<(String, ControlValue)> {
        let mut readings = Vec::new();
        let mut read = |controller: &mut Controller, fallback: &str| {
            let name = controller.name().unwrap_or(fallback).to_string();
            readings.push((name, controller.evaluate(store)));
        };

        read(&mut self.learning_rate, "learning_rate");
        for (placeholder, controller) in &mut self.additions {
            read(controller, placeholder.as_str());
        }
        read(&mut self.batch_size, "batch_size");
        for (key, controller) in &mut self.batch_kwargs.controlled {
            read(controller, key.as_str());
        }
        readings
    }
}

/// A training session: resolved runs driven one step at a time.
///
/// The session owns the progress store and the result sink; the execution
/// context and the feed factory are borrowed for its lifetime.
pub struct Session<'a> {
    ctx: &'a mut dyn ExecutionContext,
    feeds: &'a mut dyn FeedFactory,
    store: ProgressStore,
    sink: ResultSink,
    scheduler: OutputScheduler,
    save_path: Option<PathBuf>,
    runs: Vec<RunSpecs>,
    launch_log: Option<LaunchLog>,
}

impl<'a> Session<'a> {
    /// Creates a new `Session`.
    ///
    /// Every override is resolved and checked before any file is opened.
    ///
    /// # Arguments
    /// * `ctx` - Runs the planned outputs.
    /// * `feeds` - Opens the train and validation datasets.
    /// * `overrides` - One partial override per run.
    ///
    /// # Errors
    /// Returns a configuration error naming the offending key or value, or an
    /// io error if the result files, launch log or restored checkpoint fail.
    pub fn new(
        ctx: &'a mut dyn ExecutionContext,
        feeds: &'a mut dyn FeedFactory,
        overrides: &[Value],
    ) -> Result<Self> {
        let defaults = train_defaults();
        let resolved = resolve_session(overrides, &defaults, RUN_BRANCH)?;
        let start = StartSpecs::from_value(&resolved.start)?;
        let runs = resolved
            .runs
            .iter()
            .map(RunSpecs::from_value)
            .collect::<Result<Vec<_>>>()?;

        let scheduler = OutputScheduler::new(&start.result_types);
        let kinds = scheduler.result_kinds().to_vec();
        let train_basic = Regime::Train.basic_aliases(&kinds);
        let validation_basic = Regime::Validation.basic_aliases(&kinds);
        let scheduled = runs.iter().flat_map(|run| {
            run.schedule
                .train_tensor_schedule
                .aliases()
                .chain(run.schedule.validation_tensor_schedule.aliases())
        });
        let aliases: Vec<&str> = train_basic
            .iter()
            .chain(&validation_basic)
            .map(String::as_str)
            .chain(scheduled)
            .collect();
        ctx.hooks_mut().fill_missing(aliases);

        let mut store = ProgressStore::new();
        let save_path = start.save_path.clone();
        let sink = ResultSink::new(save_path.as_deref(), &kinds, &mut store)?;

        let launch_log = match &save_path {
            Some(dir) => Some(LaunchLog::create(
                dir,
                "train",
                &ctx.build_parameters(),
                &Value::Array(overrides.to_vec()),
                &defaults,
            )?),
            None => None,
        };

        if let Some(path) = &start.restore_path {
            ctx.restore_checkpoint(path)?;
            log::info!("restored weights from {}", path.display());
        }

        Ok(Self {
            ctx,
            feeds,
            store,
            sink,
            scheduler,
            save_path,
            runs,
            launch_log,
        })
    }

    /// Sends operator reports to `report` instead of stdout.
    pub fn with_report(mut self, report: Box<dyn Write>) -> Self {
        self.sink = self.sink.with_report(report);
        self
    }

    /// Runs every resolved run in order, then writes the final checkpoint.
    ///
    /// # Errors
    /// Returns the first error raised by a collaborator or a sink.
    pub fn run(mut self) -> Result<TrainReport> {
        let runs = std::mem::take(&mut self.runs);
        let count = runs.len();

        let mut step = 0;
        for (index, run) in runs.into_iter().enumerate() {
            log::info!("run {index} starts at step {step}");
            let first = step;
            step = self.train_run(run, step)?;
            log::info!("run {index} finished, steps {first}..{step}");
        }

        self.checkpoint("final")?;
        self.sink.close()?;
        if let Some(launch_log) = &self.launch_log {
            launch_log.finish()?;
        }
        log::info!("session finished at step {step}");

        Ok(TrainReport {
            final_step: step,
            runs: count,
            progress: self.store,
        })
    }

    fn train_run(&mut self, mut run: RunSpecs, init_step: u64) -> Result<u64> {
        run.train_specs.offset_by(init_step)?;
        let RunSpecs {
            train_specs: train,
            schedule,
        } = run;

        self.store.set_step(init_step);
        let mut controllers = RunControllers::new(&train, &schedule, &self.store)?;

        self.sink.set_new_run_schedule(&schedule);
        self.sink
            .switch_datasets(&train.validation_datasets, &mut self.store)?;

        let dataset = train
            .train_dataset
            .as_deref()
            .ok_or_else(|| HarnessError::InvalidConfig("no train dataset given".into()))?;
        let batch_size = controllers.batch_size(&self.store)?;
        let kwargs = controllers.batch_kwargs.build(&self.store);
        let mut batches = self.feeds.open(dataset, batch_size, &kwargs)?;

        let mut step = init_step;
        while controllers.should_continue.fires(&self.store) {
            if controllers.debug.fires(&self.store) {
                log::info!("debugging enabled on step {step}");
                self.ctx.enable_debugging();
            }
            if controllers.batch_size_changed.fires(&self.store) {
                let batch_size = controllers.batch_size(&self.store)?;
                log::debug!("step {step}: batch size changed to {batch_size}");
                batches.change_batch_size(batch_size);
            }
            if controllers.batch_kwargs_changed.fires(&self.store) {
                let kwargs = controllers.batch_kwargs.build(&self.store);
                log::debug!("step {step}: batch kwargs changed to {kwargs:?}");
                batches.change_specs(&kwargs);
            }
            if controllers.checkpoint_due.fires(&self.store) {
                self.checkpoint(&step.to_string())?;
            }

            let feed = Feed {
                batch: batches.next(),
                learning_rate: controllers.learning_rate.evaluate(&self.store).as_f64(),
                params: controllers.params(&self.store),
            };
            let plan = self.scheduler.build_plan(
                self.ctx.hooks(),
                Regime::Train,
                &schedule.train_tensor_schedule,
                step,
            );
            let results = self.execute(&plan, &feed)?;
            let readings = controllers.readings(&self.store);
            self.sink
                .emit(step, Regime::Train, &results, &readings, &mut self.store)?;

            if controllers.validation_due.fires(&self.store) {
                for dataset in &train.validation_datasets {
                    self.validate(dataset, &train, &schedule, step, &feed.params)?;
                }
            }

            step += 1;
            self.store.set_step(step);
        }
        Ok(step)
    }

    /// Runs one full pass over a validation dataset.
    fn validate(
        &mut self,
        dataset: &str,
        train: &TrainSpecs,
        schedule: &ScheduleSpecs,
        training_step: u64,
        params: &[(String, ControlValue)],
    ) -> Result<()> {
        if let Some(outputs) = self.ctx.hooks().outputs(RESET_VALIDATION_STATE) {
            if !outputs.is_empty() {
                let feed = Feed {
                    batch: Batch::default(),
                    learning_rate: None,
                    params: Vec::new(),
                };
                self.ctx.execute(&outputs, &feed)?;
            }
        }

        let mut batches: Box<dyn DataFeed> =
            self.feeds
                .open(dataset, train.validation_batch_size, &train.valid_batch_kwargs)?;
        let length = batches.dataset_length();
        log::debug!("validating on '{dataset}', {length} batch(es)");

        self.sink.start_accumulation(dataset, Some(training_step))?;
        for local_step in 0..length as u64 {
            let feed = Feed {
                batch: batches.next(),
                learning_rate: None,
                params: params.to_vec(),
            };
            let plan = self.scheduler.build_plan(
                self.ctx.hooks(),
                Regime::Validation,
                &schedule.validation_tensor_schedule,
                local_step,
            );
            let results = self.execute(&plan, &feed)?;
            self.sink.emit(
                training_step,
                Regime::Validation,
                &results,
                &[],
                &mut self.store,
            )?;
        }
        self.sink.stop_accumulation(&mut self.store)?;
        Ok(())
    }

    /// Executes `plan` and splits the results back into its categories.
    fn execute(&mut self, plan: &Plan, feed: &Feed) -> Result<Demuxed> {
        let executed = self.ctx.execute(&plan.outputs(), feed)?;
        let results = realign(&plan.requests, executed)?;
        extract(plan, &results, self.ctx.hooks())
    }

    fn checkpoint(&mut self, label: &str) -> Result<()> {
        let Some(dir) = &self.save_path else {
            log::warn!("no save_path given, checkpoint '{label}' skipped");
            return Ok(());
        };

        let dir = dir.join("checkpoints");
        fs::create_dir_all(&dir)?;
        let path = dir.join(label);
        self.ctx.save_checkpoint(&path)?;
        log::info!("checkpoint written to {}", path.display());
        Ok(())
    }
}
