use std::collections::BTreeMap;

/// Shared progress of a training session.
///
/// Holds the current step, read by every controller, and the collected series
/// (one per group and key, e.g. `train`/`loss` or `<dataset>`/`accuracy`).
/// Keys are added lazily and never removed during a session.
#[derive(Debug, Default, Clone)]
pub struct ProgressStore {
    step: u64,
    series: BTreeMap<String, BTreeMap<String, Vec<f64>>>,
}

impl ProgressStore {
    /// Creates a new `ProgressStore` positioned at step 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current step.
    #[inline]
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Moves the store to `step`. Only the training loop is expected to call this.
    #[inline]
    pub fn set_step(&mut self, step: u64) {
        self.step = step;
    }

    /// Makes sure every key of `keys` has a series under `group`.
    ///
    /// Existing series are left untouched.
    pub fn init_series<I, S>(&mut self, group: &str, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let group = self.series.entry(group.to_string()).or_default();
        for key in keys {
            group.entry(key.into()).or_default();
        }
    }

    /// Appends `value` to the `group`/`key` series, creating it if needed.
    pub fn append(&mut self, group: &str, key: &str, value: f64) {
        self.series
            .entry(group.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(value);
    }

    /// Returns the `group`/`key` series, if it exists.
    pub fn series(&self, group: &str, key: &str) -> Option<&[f64]> {
        self.series
            .get(group)
            .and_then(|g| g.get(key))
            .map(Vec::as_slice)
    }

    /// Returns true if the `group`/`key` series exists.
    pub fn contains(&self, group: &str, key: &str) -> bool {
        self.series(group, key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_series_keeps_existing_values() {
        let mut store = ProgressStore::new();
        store.append("valid", "loss", 1.5);
        store.init_series("valid", ["loss", "accuracy"]);

        assert_eq!(store.series("valid", "loss"), Some(&[1.5][..]));
        assert_eq!(store.series("valid", "accuracy"), Some(&[][..]));
        assert!(!store.contains("valid", "bpc"));
    }

    #[test]
    fn step_moves_only_when_set() {
        let mut store = ProgressStore::new();
        assert_eq!(store.step(), 0);
        store.set_step(42);
        assert_eq!(store.step(), 42);
        assert!(!store.contains("train", "steps"));
    }
}
