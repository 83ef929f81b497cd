//! Model architectures and the estimator built on them

pub mod base;
pub mod estimator;
