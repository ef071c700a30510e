pub mod defaults;
pub mod resolver;
pub mod shorthand;
pub mod training;
pub mod tree;

pub use defaults::{train_defaults, RUN_BRANCH};
pub use resolver::{resolve, resolve_session, ResolvedSession};
pub use training::{CollectSpecs, RunSpecs, ScheduleSpecs, StartSpecs, TrainSpecs};
