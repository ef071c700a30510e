mod extract;
mod sink;

pub use extract::{extract, realign, Demuxed, Extracted, Output};
pub use sink::{filtered_mean, ResultSink, SinkOptions, STEPS_KEY, TRAIN_GROUP};
