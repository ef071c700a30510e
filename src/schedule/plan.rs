use std::ops::Range;

use super::{HookRegistry, Regime, ResultKind, TensorSchedule};

/// Name of the always-present category heading every plan.
pub const BASIC: &str = "basic";

/// One slot of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// A named output of the execution context.
    Output(String),
    /// A slot the harness fills with a zero scalar itself.
    Placeholder,
}

/// Where a category's results live in the flat result vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryRange {
    /// Half-open range of every included alias, in inclusion order.
    pub aliases: Vec<(String, Range<usize>)>,
    /// Range covering the whole category. Empty if nothing was included.
    pub borders: Range<usize>,
}

impl CategoryRange {
    pub fn alias(&self, alias: &str) -> Option<&Range<usize>> {
        self.aliases
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, range)| range)
    }

    pub fn is_empty(&self) -> bool {
        self.borders.is_empty()
    }
}

/// The index map of one plan: every category's ranges, basic category first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOrder {
    pub categories: Vec<(String, CategoryRange)>,
}

impl RunOrder {
    pub fn category(&self, name: &str) -> Option<&CategoryRange> {
        self.categories
            .iter()
            .find(|(category, _)| category == name)
            .map(|(_, range)| range)
    }
}

/// The outputs to execute on one step and where each alias lands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub requests: Vec<Request>,
    pub order: RunOrder,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// The named outputs the execution context has to run, placeholders left out.
    pub fn outputs(&self) -> Vec<String> {
        self.requests
            .iter()
            .filter_map(|request| match request {
                Request::Output(name) => Some(name.clone()),
                Request::Placeholder => None,
            })
            .collect()
    }
}

/// Builds per-step plans from declarative schedules.
///
/// Plans are a pure function of the registry, the result kinds, the schedule
/// and the step, so the same ranges can later be sliced out of the results.
#[derive(Debug, Clone)]
pub struct OutputScheduler {
    result_kinds: Vec<ResultKind>,
}

impl OutputScheduler {
    /// Creates a new `OutputScheduler` reporting `result_kinds` on every step.
    pub fn new(result_kinds: &[ResultKind]) -> Self {
        Self {
            result_kinds: ResultKind::in_canonical_order(result_kinds),
        }
    }

    pub fn result_kinds(&self) -> &[ResultKind] {
        &self.result_kinds
    }

    /// Builds the plan of `step`.
    ///
    /// # Arguments
    /// * `registry` - The alias registry of the execution context.
    /// * `regime` - Selects the basic category's aliases.
    /// * `schedule` - The declarative categories that follow the basic one.
    /// * `step` - The step the schedule is evaluated at.
    ///
    /// # Returns
    /// The ordered requests together with the range each alias occupies.
    pub fn build_plan(
        &self,
        registry: &HookRegistry,
        regime: Regime,
        schedule: &TensorSchedule,
        step: u64,
    ) -> Plan {
        let mut requests = Vec::new();
        let mut categories = Vec::with_capacity(schedule.categories().len() + 1);

        let basic = regime.basic_aliases(&self.result_kinds);
        categories.push((
            BASIC.to_string(),
            Self::allocate(registry, basic.iter().map(String::as_str), &mut requests),
        ));

        for (category, category_schedule) in schedule.categories() {
            let due = category_schedule.due(step);
            categories.push((
                category.clone(),
                Self::allocate(registry, due, &mut requests),
            ));
        }

        log::debug!("step {step}: {} output(s) planned", requests.len());
        Plan {
            requests,
            order: RunOrder { categories },
        }
    }

    fn allocate<'a, I>(registry: &HookRegistry, aliases: I, requests: &mut Vec<Request>) -> CategoryRange
    where
        I: IntoIterator<Item = &'a str>,
    {
        let start = requests.len();
        let aliases = aliases
            .into_iter()
            .map(|alias| {
                let from = requests.len();
                let size = registry.expand_into(alias, requests);
                (alias.to_string(), from..from + size)
            })
            .collect();

        CategoryRange {
            aliases,
            borders: start..requests.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schedule::Hook;

    fn registry() -> HookRegistry {
        HookRegistry::new()
            .with("train_op", Hook::Single("op".into()))
            .with("loss", Hook::Single("loss:0".into()))
            .with("accuracy", Hook::Single("acc:0".into()))
            .with("grads", Hook::Flat(vec!["g0".into(), "g1".into()]))
            .with(
                "states",
                Hook::Nested(vec![vec!["h0".into(), "c0".into()], vec!["h1".into()]]),
            )
    }

    fn schedule() -> TensorSchedule {
        TensorSchedule::from_value(&json!({
            "print": {"grads": 2, "states": [3]},
            "always": ["loss"]
        }))
        .unwrap()
    }

    #[test]
    fn basic_category_is_the_prefix() {
        let scheduler = OutputScheduler::new(&[ResultKind::Accuracy, ResultKind::Loss]);
        let plan = scheduler.build_plan(&registry(), Regime::Train, &schedule(), 1);

        let (name, basic) = &plan.order.categories[0];
        assert_eq!(name, BASIC);
        assert_eq!(basic.borders, 0..3);
        assert_eq!(basic.alias("loss"), Some(&(1..2)));
        assert_eq!(basic.alias("accuracy"), Some(&(2..3)));
        assert_eq!(
            plan.outputs()[..3],
            ["op".to_string(), "loss:0".to_string(), "acc:0".to_string()]
        );
    }

    #[test]
    fn ranges_are_contiguous_in_schedule_order() {
        let scheduler = OutputScheduler::new(&[ResultKind::Loss]);
        let plan = scheduler.build_plan(&registry(), Regime::Train, &schedule(), 6);

        let print = plan.order.category("print").unwrap();
        assert_eq!(print.alias("grads"), Some(&(2..4)));
        assert_eq!(print.alias("states"), None);
        assert_eq!(print.borders, 2..4);

        let always = plan.order.category("always").unwrap();
        assert_eq!(always.alias("loss"), Some(&(4..5)));
        assert_eq!(plan.len(), 5);
    }

    #[test]
    fn empty_categories_are_recorded_as_empty() {
        let scheduler = OutputScheduler::new(&[ResultKind::Loss]);
        let plan = scheduler.build_plan(&registry(), Regime::Train, &schedule(), 1);

        let print = plan.order.category("print").unwrap();
        assert!(print.is_empty());
        assert_eq!(print.borders, 2..2);
    }

    #[test]
    fn plans_are_deterministic_and_sized_by_expansions() {
        let scheduler = OutputScheduler::new(&[ResultKind::Loss, ResultKind::Accuracy]);
        let registry = registry();
        let schedule = schedule();

        for step in 0..12 {
            let first = scheduler.build_plan(&registry, Regime::Train, &schedule, step);
            let second = scheduler.build_plan(&registry, Regime::Train, &schedule, step);
            assert_eq!(first, second);

            let included: usize = schedule
                .categories()
                .iter()
                .flat_map(|(_, category)| category.due(step))
                .map(|alias| registry.shape(alias).map_or(1, |shape| shape.size()))
                .sum();
            assert_eq!(first.len(), 3 + included, "step {step}");
        }
    }

    #[test]
    fn placeholders_never_reach_the_context() {
        let mut registry = registry();
        registry.fill_missing(["validation_predictions", "validation_loss"]);
        let scheduler = OutputScheduler::new(&[ResultKind::Loss]);
        let plan = scheduler.build_plan(
            &registry,
            Regime::Validation,
            &TensorSchedule::default(),
            0,
        );

        assert_eq!(plan.requests, vec![Request::Placeholder, Request::Placeholder]);
        assert!(plan.outputs().is_empty());
    }
}
