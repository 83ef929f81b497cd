//! Base architecture modules

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod early_stopping;
pub mod layer;
pub mod loss_utils;
pub mod masking;
pub mod model;
pub mod train;
pub mod validation;
