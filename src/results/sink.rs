use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, LineWriter, Write},
    path::{Path, PathBuf},
};

use crate::{
    configs::ScheduleSpecs,
    controller::ControlValue,
    error::{HarnessError, Result},
    progress::ProgressStore,
    schedule::{Regime, ResultKind},
};

use super::Demuxed;

/// Storage group of the training results.
pub const TRAIN_GROUP: &str = "train";
/// Key of the collected steps inside the training group.
pub const STEPS_KEY: &str = "steps";

type KindFiles = BTreeMap<ResultKind, LineWriter<File>>;

/// Explicit per-call choices; `None` keeps the configured flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkOptions {
    pub save_to_file: Option<bool>,
    pub save_to_storage: Option<bool>,
    pub print_results: Option<bool>,
}

#[derive(Debug)]
struct Accumulation {
    dataset: String,
    step: Option<u64>,
    samples: BTreeMap<ResultKind, Vec<f64>>,
}

/// Routes step results to the report stream, result files and the progress store.
pub struct ResultSink {
    save_path: Option<PathBuf>,
    result_kinds: Vec<ResultKind>,
    report: Box<dyn Write>,
    train_files: KindFiles,
    validation_files: BTreeMap<String, KindFiles>,
    collect_interval: Option<u64>,
    print_period: Option<u64>,
    printed_result_types: Vec<ResultKind>,
    printed_controllers: Vec<String>,
    save_to_file: bool,
    save_to_storage: bool,
    print_results: bool,
    accumulation: Option<Accumulation>,
}

impl ResultSink {
    /// Creates a new `ResultSink` reporting to stdout.
    ///
    /// # Arguments
    /// * `save_path` - Directory of the result files. `None` disables them.
    /// * `result_kinds` - The kinds collected on every step.
    /// * `store` - The session's progress store, where the train series are created.
    ///
    /// # Errors
    /// Returns an io error if the directory or a train file cannot be created.
    pub fn new(
        save_path: Option<&Path>,
        result_kinds: &[ResultKind],
        store: &mut ProgressStore,
    ) -> Result<Self> {
        let result_kinds = ResultKind::in_canonical_order(result_kinds);

        let train_files = match save_path {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                open_kind_files(dir, &result_kinds, "train")?
            }
            None => KindFiles::new(),
        };

        store.init_series(
            TRAIN_GROUP,
            std::iter::once(STEPS_KEY).chain(result_kinds.iter().map(ResultKind::as_str)),
        );

        Ok(Self {
            save_path: save_path.map(Path::to_path_buf),
            result_kinds,
            report: Box::new(io::stdout()),
            train_files,
            validation_files: BTreeMap::new(),
            collect_interval: None,
            print_period: None,
            printed_result_types: Vec::new(),
            printed_controllers: Vec::new(),
            save_to_file: false,
            save_to_storage: false,
            print_results: false,
            accumulation: None,
        })
    }

    /// Sends reports to `report` instead of stdout.
    pub fn with_report(mut self, report: Box<dyn Write>) -> Self {
        self.report = report;
        self
    }

    /// Applies the collection settings of a new run.
    pub fn set_new_run_schedule(&mut self, schedule: &ScheduleSpecs) {
        let collect = &schedule.to_be_collected_while_training;
        self.collect_interval = collect.results_collect_interval.filter(|interval| *interval > 0);
        self.print_period = self
            .collect_interval
            .and_then(|interval| interval.checked_mul(collect.print_per_collected.max(1)));
        self.printed_result_types = schedule.printed_result_types.clone();
        self.printed_controllers = schedule.printed_controllers.clone();

        self.save_to_file = self.collect_interval.is_some() && !self.result_kinds.is_empty();
        self.save_to_storage = self.save_to_file;
        self.print_results = !self.printed_result_types.is_empty();
    }

    /// Makes `datasets` the active validation datasets.
    ///
    /// Files of new datasets are opened, files of dropped ones are closed.
    ///
    /// # Errors
    /// Returns an io error if a result file cannot be opened.
    pub fn switch_datasets(&mut self, datasets: &[String], store: &mut ProgressStore) -> Result<()> {
        self.validation_files.retain(|dataset, _| {
            let keep = datasets.contains(dataset);
            if !keep {
                log::info!("closing result files of dataset '{dataset}'");
            }
            keep
        });

        for dataset in datasets {
            self.open_dataset(dataset)?;
            store.init_series(dataset, self.result_kinds.iter().map(ResultKind::as_str));
        }
        Ok(())
    }

    fn open_dataset(&mut self, dataset: &str) -> Result<()> {
        let Some(dir) = &self.save_path else {
            return Ok(());
        };
        if !self.validation_files.contains_key(dataset) {
            let files = open_kind_files(dir, &self.result_kinds, &format!("validation_{dataset}"))?;
            log::info!("opened result files of dataset '{dataset}'");
            self.validation_files.insert(dataset.to_string(), files);
        }
        Ok(())
    }

    /// Routes the results of one step.
    ///
    /// Training results are printed every `collect_interval * print_per_collected`
    /// steps and saved every `collect_interval` steps. Validation results are
    /// accumulated. Non-basic categories are printed whenever they hold results.
    ///
    /// # Arguments
    /// * `step` - The training step the results belong to.
    /// * `regime` - Whether `results` come from a training or a validation plan.
    /// * `results` - The demultiplexed results of the step.
    /// * `readings` - Current controller values, filtered for printing.
    /// * `store` - The session's progress store.
    ///
    /// # Errors
    /// Returns `AccumulationNotStarted` for validation results outside a pass,
    /// or an io error if a sink cannot be written.
    pub fn emit(
        &mut self,
        step: u64,
        regime: Regime,
        results: &Demuxed,
        readings: &[(String, ControlValue)],
        store: &mut ProgressStore,
    ) -> Result<()> {
        let values: Vec<(ResultKind, Option<f64>)> = self
            .result_kinds
            .iter()
            .map(|kind| (*kind, results.basic_scalar(&regime.kind_alias(*kind))))
            .collect();

        match regime {
            Regime::Train => self.process_train(step, &values, readings, store)?,
            Regime::Validation => {
                for (kind, value) in values {
                    self.accumulate(kind, value)?;
                }
            }
        }

        for (category, aliases) in results.extra_categories() {
            writeln!(self.report, "{category} on step {step}:")?;
            for (alias, extracted) in aliases {
                writeln!(self.report, "    {alias}: {extracted}")?;
            }
        }
        Ok(())
    }

    fn process_train(
        &mut self,
        step: u64,
        values: &[(ResultKind, Option<f64>)],
        readings: &[(String, ControlValue)],
        store: &mut ProgressStore,
    ) -> Result<()> {
        let Some(interval) = self.collect_interval else {
            return Ok(());
        };

        let print_due = self.print_period.is_some_and(|period| step % period == 0);
        if self.print_results && print_due {
            writeln!(self.report)?;
            writeln!(self.report)?;
            writeln!(self.report, "step: {step}")?;
            for (name, value) in readings {
                if self.printed_controllers.contains(name) {
                    writeln!(self.report, "{name}: {value}")?;
                }
            }
            writeln!(self.report, "results on train dataset")?;
            self.print_kinds(values.iter().filter_map(|(k, v)| v.map(|v| (*k, v))))?;
        }

        if step % interval == 0 {
            if self.save_to_file {
                for (kind, value) in values {
                    if let (Some(value), Some(file)) = (value, self.train_files.get_mut(kind)) {
                        writeln!(file, "{step} {value}")?;
                    }
                }
            }
            if self.save_to_storage {
                store.append(TRAIN_GROUP, STEPS_KEY, step as f64);
                for (kind, value) in values {
                    if let Some(value) = value {
                        store.append(TRAIN_GROUP, kind.as_str(), *value);
                    }
                }
            }
        }
        Ok(())
    }

    fn print_kinds<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (ResultKind, f64)>,
    {
        for (kind, value) in values {
            if self.printed_result_types.contains(&kind) {
                writeln!(self.report, "{kind}: {value}")?;
            }
        }
        Ok(())
    }

    /// Starts a validation pass over `dataset`, discarding any unfinished one.
    ///
    /// # Errors
    /// Returns an io error if the dataset's result files cannot be opened.
    pub fn start_accumulation(&mut self, dataset: &str, step: Option<u64>) -> Result<()> {
        self.open_dataset(dataset)?;
        self.accumulation = Some(Accumulation {
            dataset: dataset.to_string(),
            step,
            samples: self
                .result_kinds
                .iter()
                .map(|kind| (*kind, Vec::new()))
                .collect(),
        });
        Ok(())
    }

    /// Adds a sample of `kind` to the current pass; missing samples are skipped.
    ///
    /// # Errors
    /// Returns `AccumulationNotStarted` outside a pass.
    pub fn accumulate(&mut self, kind: ResultKind, value: Option<f64>) -> Result<()> {
        let accumulation = self
            .accumulation
            .as_mut()
            .ok_or(HarnessError::AccumulationNotStarted)?;
        if let Some(value) = value {
            accumulation.samples.entry(kind).or_default().push(value);
        }
        Ok(())
    }

    /// Ends the current pass using the configured flags.
    pub fn stop_accumulation(
        &mut self,
        store: &mut ProgressStore,
    ) -> Result<BTreeMap<ResultKind, f64>> {
        self.stop_accumulation_with(SinkOptions::default(), store)
    }

    /// Ends the current pass and returns the mean of every kind.
    ///
    /// Negative samples are excluded; a kind with no sample left has mean 0.
    ///
    /// # Errors
    /// Returns `AccumulationNotStarted` outside a pass, or an io error if a sink
    /// cannot be written.
    pub fn stop_accumulation_with(
        &mut self,
        options: SinkOptions,
        store: &mut ProgressStore,
    ) -> Result<BTreeMap<ResultKind, f64>> {
        let Accumulation {
            dataset,
            step,
            samples,
        } = self
            .accumulation
            .take()
            .ok_or(HarnessError::AccumulationNotStarted)?;

        let save_to_file = options.save_to_file.unwrap_or(self.save_to_file);
        let save_to_storage = options.save_to_storage.unwrap_or(self.save_to_storage);
        let print_results = options.print_results.unwrap_or(self.print_results);

        let means: BTreeMap<ResultKind, f64> = samples
            .iter()
            .map(|(kind, values)| (*kind, filtered_mean(values)))
            .collect();

        if save_to_file {
            if let Some(files) = self.validation_files.get_mut(&dataset) {
                for (kind, mean) in &means {
                    let Some(file) = files.get_mut(kind) else {
                        continue;
                    };
                    match step {
                        Some(step) => writeln!(file, "{step} {mean}")?,
                        None => writeln!(file, "{mean}")?,
                    }
                }
            }
        }
        if save_to_storage {
            for (kind, mean) in &means {
                store.append(&dataset, kind.as_str(), *mean);
            }
        }
        if print_results {
            writeln!(self.report, "results on validation dataset {dataset}")?;
            self.print_kinds(means.iter().map(|(k, v)| (*k, *v)))?;
        }

        log::debug!("validation on '{dataset}' finished: {means:?}");
        Ok(means)
    }

    /// Flushes and closes every result file.
    ///
    /// # Errors
    /// Returns an io error if a pending line cannot be flushed.
    pub fn close(&mut self) -> Result<()> {
        for file in self
            .train_files
            .values_mut()
            .chain(self.validation_files.values_mut().flat_map(|files| files.values_mut()))
        {
            file.flush()?;
        }
        self.report.flush()?;
        self.train_files.clear();
        self.validation_files.clear();
        Ok(())
    }
}

/// Mean over the non-negative samples, 0 when there are none.
pub fn filtered_mean(samples: &[f64]) -> f64 {
    let (sum, count) = samples
        .iter()
        .filter(|value| **value >= 0.0)
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn open_kind_files(dir: &Path, kinds: &[ResultKind], suffix: &str) -> io::Result<KindFiles> {
    kinds
        .iter()
        .map(|kind| -> io::Result<(ResultKind, LineWriter<File>)> {
            let path = dir.join(format!("{kind}_{suffix}.txt"));
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok((*kind, LineWriter::new(file)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use serde_json::json;

    use super::*;
    use crate::configs::{resolve_session, train_defaults, RunSpecs, RUN_BRANCH};

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    fn schedule(overrides: serde_json::Value) -> ScheduleSpecs {
        let mut overrides = overrides;
        overrides["train_dataset"] = json!("train");
        let session = resolve_session(&[overrides], &train_defaults(), RUN_BRANCH).unwrap();
        RunSpecs::from_value(&session.runs[0]).unwrap().schedule
    }

    #[test]
    fn filtered_mean_skips_negative_samples() {
        assert_eq!(filtered_mean(&[-1.0, 2.0, 4.0]), 3.0);
        assert_eq!(filtered_mean(&[-1.0, -5.0]), 0.0);
        assert_eq!(filtered_mean(&[]), 0.0);
    }

    #[test]
    fn accumulation_requires_a_started_pass() {
        let mut store = ProgressStore::new();
        let mut sink = ResultSink::new(None, &[ResultKind::Loss], &mut store).unwrap();

        assert!(matches!(
            sink.accumulate(ResultKind::Loss, Some(1.0)),
            Err(HarnessError::AccumulationNotStarted)
        ));
        assert!(matches!(
            sink.stop_accumulation(&mut store),
            Err(HarnessError::AccumulationNotStarted)
        ));
    }

    #[test]
    fn validation_means_go_to_files_storage_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = SharedBuf::default();
        let mut store = ProgressStore::new();
        let mut sink = ResultSink::new(
            Some(dir.path()),
            &[ResultKind::Accuracy, ResultKind::Loss],
            &mut store,
        )
        .unwrap()
        .with_report(Box::new(report.clone()));
        sink.set_new_run_schedule(&schedule(json!({"results_collect_interval": 1})));
        sink.switch_datasets(&["valid".to_string()], &mut store).unwrap();

        sink.start_accumulation("valid", Some(7)).unwrap();
        for value in [-1.0, 2.0, 4.0] {
            sink.accumulate(ResultKind::Loss, Some(value)).unwrap();
            sink.accumulate(ResultKind::Accuracy, None).unwrap();
        }
        let means = sink.stop_accumulation(&mut store).unwrap();
        sink.close().unwrap();

        assert_eq!(means[&ResultKind::Loss], 3.0);
        assert_eq!(means[&ResultKind::Accuracy], 0.0);
        assert_eq!(store.series("valid", "loss"), Some(&[3.0][..]));

        let lines = fs::read_to_string(dir.path().join("loss_validation_valid.txt")).unwrap();
        assert_eq!(lines, "7 3\n");
        assert_eq!(report.text(), "results on validation dataset valid\nloss: 3\n");
    }

    #[test]
    fn explicit_options_beat_configured_flags() {
        let dir = tempfile::tempdir().unwrap();
        let report = SharedBuf::default();
        let mut store = ProgressStore::new();
        let mut sink = ResultSink::new(Some(dir.path()), &[ResultKind::Loss], &mut store)
            .unwrap()
            .with_report(Box::new(report.clone()));
        sink.set_new_run_schedule(&schedule(json!({"results_collect_interval": 1})));

        sink.start_accumulation("test", None).unwrap();
        sink.accumulate(ResultKind::Loss, Some(1.5)).unwrap();
        let options = SinkOptions {
            save_to_storage: Some(false),
            print_results: Some(false),
            ..SinkOptions::default()
        };
        sink.stop_accumulation_with(options, &mut store).unwrap();
        sink.close().unwrap();

        let lines = fs::read_to_string(dir.path().join("loss_validation_test.txt")).unwrap();
        assert_eq!(lines, "1.5\n");
        assert!(!store.contains("test", "loss"));
        assert!(report.text().is_empty());
    }

    #[test]
    fn train_results_follow_collect_and_print_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let report = SharedBuf::default();
        let mut store = ProgressStore::new();
        let mut sink = ResultSink::new(Some(dir.path()), &[ResultKind::Loss], &mut store)
            .unwrap()
            .with_report(Box::new(report.clone()));
        sink.set_new_run_schedule(&schedule(json!({
            "results_collect_interval": 2,
            "print_per_collected": 2
        })));

        let readings = [
            ("learning_rate".to_string(), ControlValue::Float(0.5)),
            ("batch_size".to_string(), ControlValue::Int(8)),
        ];
        for step in 0..5u64 {
            let values = [(ResultKind::Loss, Some(step as f64))];
            sink.process_train(step, &values, &readings, &mut store).unwrap();
        }
        sink.close().unwrap();

        assert_eq!(store.series(TRAIN_GROUP, STEPS_KEY), Some(&[0.0, 2.0, 4.0][..]));
        let lines = fs::read_to_string(dir.path().join("loss_train.txt")).unwrap();
        assert_eq!(lines, "0 0\n2 2\n4 4\n");

        let text = report.text();
        assert_eq!(text.matches("results on train dataset").count(), 2);
        assert!(text.contains("step: 4\nlearning_rate: 0.5\nresults on train dataset\nloss: 4\n"));
        assert!(!text.contains("batch_size"));
    }

    #[test]
    fn a_stopped_pass_must_be_restarted() {
        let mut store = ProgressStore::new();
        let mut sink = ResultSink::new(None, &[ResultKind::Loss], &mut store).unwrap();

        sink.start_accumulation("valid", None).unwrap();
        sink.accumulate(ResultKind::Loss, Some(1.0)).unwrap();
        sink.stop_accumulation(&mut store).unwrap();

        assert!(matches!(
            sink.accumulate(ResultKind::Loss, Some(2.0)),
            Err(HarnessError::AccumulationNotStarted)
        ));
        assert!(matches!(
            sink.stop_accumulation(&mut store),
            Err(HarnessError::AccumulationNotStarted)
        ));
    }

    #[test]
    fn result_files_are_appended_across_sinks() {
        let dir = tempfile::tempdir().unwrap();
        for value in [1.0, 2.0] {
            let mut store = ProgressStore::new();
            let mut sink = ResultSink::new(Some(dir.path()), &[ResultKind::Loss], &mut store)
                .unwrap()
                .with_report(Box::new(SharedBuf::default()));
            sink.set_new_run_schedule(&schedule(json!({"results_collect_interval": 1})));
            sink.switch_datasets(&["valid".to_string()], &mut store).unwrap();

            sink.process_train(0, &[(ResultKind::Loss, Some(value))], &[], &mut store)
                .unwrap();
            sink.start_accumulation("valid", Some(0)).unwrap();
            sink.accumulate(ResultKind::Loss, Some(value)).unwrap();
            sink.stop_accumulation(&mut store).unwrap();
            sink.close().unwrap();
        }

        let train = fs::read_to_string(dir.path().join("loss_train.txt")).unwrap();
        assert_eq!(train, "0 1\n0 2\n");
        let valid = fs::read_to_string(dir.path().join("loss_validation_valid.txt")).unwrap();
        assert_eq!(valid, "0 1\n0 2\n");
    }

    #[test]
    fn unchecked_zero_interval_collects_nothing() {
        let mut raw = train_defaults()[RUN_BRANCH]["schedule"].clone();
        raw["to_be_collected_while_training"]["results_collect_interval"] = json!(0);
        let schedule: ScheduleSpecs = serde_json::from_value(raw).unwrap();

        let mut store = ProgressStore::new();
        let mut sink = ResultSink::new(None, &[ResultKind::Loss], &mut store)
            .unwrap()
            .with_report(Box::new(SharedBuf::default()));
        sink.set_new_run_schedule(&schedule);

        for step in 0..3 {
            sink.process_train(step, &[(ResultKind::Loss, Some(1.0))], &[], &mut store)
                .unwrap();
        }
        assert_eq!(store.series(TRAIN_GROUP, "loss"), Some(&[][..]));
    }

    #[test]
    fn nothing_is_collected_without_an_interval() {
        let mut store = ProgressStore::new();
        let mut sink = ResultSink::new(None, &[ResultKind::Loss], &mut store).unwrap();
        sink.set_new_run_schedule(&schedule(json!({"results_collect_interval": null})));

        sink.process_train(0, &[(ResultKind::Loss, Some(1.0))], &[], &mut store)
            .unwrap();
        assert_eq!(store.series(TRAIN_GROUP, "loss"), Some(&[][..]));
    }
}
