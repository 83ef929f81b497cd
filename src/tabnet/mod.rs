//! TabNet training engine

pub mod architectures;
pub mod error;
pub mod metrics;
pub mod settings;
