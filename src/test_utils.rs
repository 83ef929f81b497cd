// Synthetic datasets and small configurations.
//
// Used by the integration tests, the masking benchmark and the demo binary.
// Everything here is seeded so repeated calls return identical data.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::tabnet::architectures::base::config::{ModelParams, TrainParams};
use crate::tabnet::architectures::base::data::LabeledTable;

/// Soil types of the synthetic cover table
pub const SOIL_TYPES: [&str; 3] = ["clay", "loam", "sand"];

/// Cover labels of the synthetic cover table
pub const COVER_TYPES: [&str; 3] = ["aspen", "fir", "pine"];

/// Table with continuous `elevation`, categorical `soil` and continuous `slope`
/// columns, labelled with one of [`COVER_TYPES`].
///
/// The label follows the soil type, shifted by one when elevation is high, so
/// the target is learnable from both kinds of column.
pub fn cover_table(n_rows: usize, seed: u64) -> (LabeledTable, Vec<String>) {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut elevation = Vec::with_capacity(n_rows);
    let mut soil = Vec::with_capacity(n_rows);
    let mut slope = Vec::with_capacity(n_rows);
    let mut labels = Vec::with_capacity(n_rows);
    for row in 0..n_rows {
        let soil_idx = row % SOIL_TYPES.len();
        let e: f64 = rng.sample(StandardNormal);
        elevation.push(e);
        soil.push(SOIL_TYPES[soil_idx]);
        slope.push(rng.gen_range(0.0..1.0));
        let shift = usize::from(e > 0.5);
        labels.push(COVER_TYPES[(soil_idx + shift) % COVER_TYPES.len()].to_string());
    }

    let table = LabeledTable::new()
        .with_numeric("elevation", elevation)
        .with_text("soil", soil)
        .with_numeric("slope", slope);
    (table, labels)
}

/// Plain numeric array with `n_cols` columns and a linear target
pub fn regression_array(n_rows: usize, n_cols: usize, seed: u64) -> (Array2<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((n_rows, n_cols), |_| rng.sample::<f64, _>(StandardNormal));
    let y = x
        .rows()
        .into_iter()
        .map(|row| row.iter().enumerate().map(|(j, v)| v * (j + 1) as f64).sum::<f64>())
        .collect();
    (x, y)
}

/// Small network that trains in milliseconds on the CPU backend
pub fn small_model_params(discrete_outputs: bool, categorical_variables: &[&str]) -> ModelParams {
    ModelParams {
        n_steps: 2,
        n_dims_d: 4,
        n_dims_a: 4,
        dropout_p: 0.0,
        discrete_outputs,
        categorical_variables: categorical_variables.iter().map(|s| s.to_string()).collect(),
        seed: 7,
        ..ModelParams::default()
    }
}

/// Supervised-only training with small batches and no periodic checkpoints
pub fn quick_train_params(max_epochs: usize) -> TrainParams {
    TrainParams {
        batch_size: 16,
        validation_batch_size: 16,
        max_epochs_supervised: max_epochs,
        max_epochs_self_supervised: max_epochs,
        epoch_save_frequency: 0,
        early_stopping: false,
        seed: 11,
        ..TrainParams::default()
    }
}
