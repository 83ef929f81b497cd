//! tabnet-rs: TabNet for tabular data on burn, with self-supervised
//! pretraining and supervised training.

pub mod tabnet;

pub use tabnet::architectures::base::config::{ModelParams, SaveParams, TrainParams};
pub use tabnet::architectures::base::data::{LabeledTable, TabularInput, TargetInput};
pub use tabnet::architectures::estimator::{
    CpuAutodiffBackend, CpuBackend, FitReport, Predictions, ProbabilityTable, TabNet,
};
pub use tabnet::error::{CheckpointError, TabNetError, TabNetResult};
pub use tabnet::settings::{settings, Settings};

/// Synthetic datasets for tests, benchmarks and the demo binary
pub mod test_utils;
