use std::fmt;

use crate::{
    error::{HarnessError, Result},
    schedule::{HookRegistry, Plan, Request, Shape, BASIC},
};

/// A single result slot returned by the execution context.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// The result of a side-effecting output, e.g. the train op.
    Empty,
    Scalar(f64),
    Array(Vec<f64>),
}

impl Output {
    /// The slot read as a single number, if it holds one.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(x) => Some(*x),
            Self::Array(values) if values.len() == 1 => Some(values[0]),
            _ => None,
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("-"),
            Self::Scalar(x) => write!(f, "{x}"),
            Self::Array(values) => write!(f, "{values:?}"),
        }
    }
}

/// The results of one alias, regrouped after its shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Single(Output),
    List(Vec<Output>),
    Nested(Vec<Vec<Output>>),
}

impl Extracted {
    /// Regroups the `slots` of an alias following its `shape`.
    pub fn from_slots(shape: &Shape, slots: &[Output]) -> Self {
        match shape {
            Shape::Scalar => Self::Single(slots.first().cloned().unwrap_or(Output::Empty)),
            Shape::Flat(_) => Self::List(slots.to_vec()),
            Shape::Nested(lens) => {
                let mut rows = Vec::with_capacity(lens.len());
                let mut pointer = 0;
                for len in lens {
                    let end = (pointer + len).min(slots.len());
                    rows.push(slots[pointer.min(end)..end].to_vec());
                    pointer += len;
                }
                Self::Nested(rows)
            }
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Single(output) => output.as_scalar(),
            _ => None,
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, outputs: &[Output]) -> fmt::Result {
    f.write_str("[")?;
    for (i, output) in outputs.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{output}")?;
    }
    f.write_str("]")
}

impl fmt::Display for Extracted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(output) => write!(f, "{output}"),
            Self::List(outputs) => write_list(f, outputs),
            Self::Nested(rows) => {
                f.write_str("[")?;
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_list(f, row)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// The results of one step, split back into categories and aliases.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Demuxed {
    pub categories: Vec<(String, Vec<(String, Extracted)>)>,
}

impl Demuxed {
    pub fn category(&self, name: &str) -> Option<&[(String, Extracted)]> {
        self.categories
            .iter()
            .find(|(category, _)| category == name)
            .map(|(_, aliases)| aliases.as_slice())
    }

    /// The scalar result of `alias` in the basic category.
    pub fn basic_scalar(&self, alias: &str) -> Option<f64> {
        self.category(BASIC)?
            .iter()
            .find(|(name, _)| name == alias)
            .and_then(|(_, extracted)| extracted.as_scalar())
    }

    /// Non-basic categories that produced at least one result.
    pub fn extra_categories(&self) -> impl Iterator<Item = &(String, Vec<(String, Extracted)>)> {
        self.categories
            .iter()
            .filter(|(category, aliases)| category != BASIC && !aliases.is_empty())
    }
}

/// Puts the context's results back in plan order, filling placeholder slots with zeros.
///
/// # Errors
/// Returns `ResultLengthMismatch` if `executed` does not hold one result per
/// requested output.
pub fn realign(requests: &[Request], executed: Vec<Output>) -> Result<Vec<Output>> {
    let expected = requests
        .iter()
        .filter(|request| matches!(request, Request::Output(_)))
        .count();
    if executed.len() != expected {
        return Err(HarnessError::ResultLengthMismatch {
            expected,
            got: executed.len(),
        });
    }

    let mut executed = executed.into_iter();
    Ok(requests
        .iter()
        .map(|request| match request {
            Request::Output(_) => executed.next().unwrap_or(Output::Empty),
            Request::Placeholder => Output::Scalar(0.0),
        })
        .collect())
}

/// Slices every alias of `plan` out of `results`.
///
/// # Errors
/// Returns `ResultLengthMismatch` if `results` is not aligned with the plan.
pub fn extract(plan: &Plan, results: &[Output], registry: &HookRegistry) -> Result<Demuxed> {
    if results.len() != plan.len() {
        return Err(HarnessError::ResultLengthMismatch {
            expected: plan.len(),
            got: results.len(),
        });
    }

    let categories = plan
        .order
        .categories
        .iter()
        .map(|(category, range)| {
            let aliases = range
                .aliases
                .iter()
                .map(|(alias, slots)| {
                    let shape = registry.shape(alias).cloned().unwrap_or(Shape::Scalar);
                    let extracted = Extracted::from_slots(&shape, &results[slots.clone()]);
                    (alias.clone(), extracted)
                })
                .collect();
            (category.clone(), aliases)
        })
        .collect();

    Ok(Demuxed { categories })
}
