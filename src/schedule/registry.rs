use std::collections::BTreeMap;

use super::Request;

/// The named outputs an alias stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum Hook {
    Single(String),
    Flat(Vec<String>),
    Nested(Vec<Vec<String>>),
    /// Stand-in for an alias the execution context does not provide.
    Placeholder,
}

/// How many result slots an alias occupies and how they are grouped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Flat(usize),
    Nested(Vec<usize>),
}

impl Shape {
    /// Number of slots in the flat result vector.
    pub fn size(&self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Flat(n) => *n,
            Self::Nested(lens) => lens.iter().sum(),
        }
    }
}

impl Hook {
    fn shape(&self) -> Shape {
        match self {
            Self::Single(_) | Self::Placeholder => Shape::Scalar,
            Self::Flat(outputs) => Shape::Flat(outputs.len()),
            Self::Nested(rows) => Shape::Nested(rows.iter().map(Vec::len).collect()),
        }
    }
}

/// The alias registry of an execution context.
///
/// Shapes are computed once, when an alias is registered.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<String, (Hook, Shape)>,
}

impl HookRegistry {
    /// Creates a new, empty `HookRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hook` under `alias`, replacing any previous entry.
    pub fn register(&mut self, alias: impl Into<String>, hook: Hook) {
        let shape = hook.shape();
        self.hooks.insert(alias.into(), (hook, shape));
    }

    /// Builder form of [`HookRegistry::register`].
    pub fn with(mut self, alias: impl Into<String>, hook: Hook) -> Self {
        self.register(alias, hook);
        self
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.hooks.contains_key(alias)
    }

    pub fn get(&self, alias: &str) -> Option<&Hook> {
        self.hooks.get(alias).map(|(hook, _)| hook)
    }

    pub fn shape(&self, alias: &str) -> Option<&Shape> {
        self.hooks.get(alias).map(|(_, shape)| shape)
    }

    /// The named outputs of `alias`, flattened. Placeholders have none.
    pub fn outputs(&self, alias: &str) -> Option<Vec<String>> {
        self.get(alias).map(|hook| match hook {
            Hook::Single(output) => vec![output.clone()],
            Hook::Flat(outputs) => outputs.clone(),
            Hook::Nested(rows) => rows.iter().flatten().cloned().collect(),
            Hook::Placeholder => Vec::new(),
        })
    }

    /// Registers a placeholder for every alias of `aliases` missing from the registry.
    ///
    /// # Returns
    /// The aliases that had to be substituted, in the order given.
    pub fn fill_missing<'a, I>(&mut self, aliases: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut missing = Vec::new();
        for alias in aliases {
            if !self.contains(alias) {
                log::warn!("**********************************************************");
                log::warn!("alias '{alias}' is not provided by the execution context");
                log::warn!("a zero valued placeholder will be reported in its place");
                log::warn!("**********************************************************");
                self.register(alias, Hook::Placeholder);
                missing.push(alias.to_string());
            }
        }
        missing
    }

    /// Appends the requests `alias` expands to and returns how many were added.
    ///
    /// Unknown aliases expand to a single placeholder.
    pub(super) fn expand_into(&self, alias: &str, requests: &mut Vec<Request>) -> usize {
        let before = requests.len();
        match self.get(alias) {
            Some(Hook::Single(output)) => requests.push(Request::Output(output.clone())),
            Some(Hook::Flat(outputs)) => {
                requests.extend(outputs.iter().cloned().map(Request::Output));
            }
            Some(Hook::Nested(rows)) => {
                requests.extend(rows.iter().flatten().cloned().map(Request::Output));
            }
            Some(Hook::Placeholder) | None => requests.push(Request::Placeholder),
        }
        requests.len() - before
    }
}
