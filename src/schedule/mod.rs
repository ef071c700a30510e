mod plan;
mod registry;
mod tensors;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use plan::{CategoryRange, OutputScheduler, Plan, Request, RunOrder, BASIC};
pub use registry::{Hook, HookRegistry, Shape};
pub use tensors::{AliasSchedule, CategorySchedule, TensorSchedule};

/// The result kinds the harness knows how to collect, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Loss,
    Perplexity,
    Accuracy,
    Bpc,
}

impl ResultKind {
    /// The kind's name as written in configs, files and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loss => "loss",
            Self::Perplexity => "perplexity",
            Self::Accuracy => "accuracy",
            Self::Bpc => "bpc",
        }
    }

    /// Sorts `kinds` into canonical order, dropping duplicates.
    pub fn in_canonical_order(kinds: &[ResultKind]) -> Vec<ResultKind> {
        let mut kinds = kinds.to_vec();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a plan is built for a training step or a validation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Train,
    Validation,
}

impl Regime {
    /// The alias of the side-effecting output that heads every plan.
    pub fn op_alias(&self) -> &'static str {
        match self {
            Self::Train => "train_op",
            Self::Validation => "validation_predictions",
        }
    }

    /// The alias a result kind is registered under in this regime.
    pub fn kind_alias(&self, kind: ResultKind) -> String {
        match self {
            Self::Train => kind.as_str().to_string(),
            Self::Validation => format!("validation_{kind}"),
        }
    }

    /// Every alias of the basic category, in plan order.
    pub fn basic_aliases(&self, kinds: &[ResultKind]) -> Vec<String> {
        std::iter::once(self.op_alias().to_string())
            .chain(kinds.iter().map(|kind| self.kind_alias(*kind)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_sorted_canonically() {
        use ResultKind::*;
        assert_eq!(
            ResultKind::in_canonical_order(&[Bpc, Loss, Accuracy, Loss]),
            vec![Loss, Accuracy, Bpc]
        );
    }

    #[test]
    fn basic_aliases_per_regime() {
        let kinds = [ResultKind::Loss, ResultKind::Accuracy];
        assert_eq!(
            Regime::Train.basic_aliases(&kinds),
            vec!["train_op", "loss", "accuracy"]
        );
        assert_eq!(
            Regime::Validation.basic_aliases(&kinds),
            vec!["validation_predictions", "validation_loss", "validation_accuracy"]
        );
    }
}
