pub mod configs;
pub mod context;
pub mod controller;
pub mod error;
pub mod progress;
pub mod results;
pub mod schedule;
pub mod session;

use serde_json::Value;

pub use context::{Batch, BatchKwargs, DataFeed, ExecutionContext, Feed, FeedFactory};
pub use error::{HarnessError, Result};
pub use results::Output;
pub use schedule::{Hook, HookRegistry};
pub use session::{LaunchLog, Session, TrainReport};

/// Trains through one run per override and returns the collected progress.
///
/// # Arguments
/// * `ctx` - The execution context running the planned outputs.
/// * `feeds` - Opens the train and validation datasets by name.
/// * `overrides` - One partial override tree per run, later runs carrying
///   forward whatever they omit.
///
/// # Errors
/// Returns a `HarnessError` if the overrides do not resolve, or if a
/// collaborator or a result sink fails during the session.
pub fn train(
    ctx: &mut dyn ExecutionContext,
    feeds: &mut dyn FeedFactory,
    overrides: &[Value],
) -> Result<TrainReport> {
    log::info!("resolving {} override(s)", overrides.len());
    let session = Session::new(ctx, feeds, overrides)?;
    session.run()
}
