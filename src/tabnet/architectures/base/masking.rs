//! Stochastic feature masks for self-supervised training.
//!
//! A mask has one slot per embedded input feature. Continuous columns occupy
//! one slot each, in column-index order; each categorical column then occupies
//! `embedding_dim` consecutive slots in registration order. All slots of a
//! categorical block share a single Bernoulli draw, so a categorical feature is
//! either fully visible or fully hidden.

use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::ModelParams;

/// Column positions needed to expand per-column draws into embedded-width masks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskLayout {
    continuous: Vec<usize>,
    categorical: Vec<usize>,
    embedding_dim: usize,
}

impl MaskLayout {
    pub fn new(n_original_input_dims: usize, categorical_idx: Vec<usize>, embedding_dim: usize) -> Self {
        let continuous = (0..n_original_input_dims)
            .filter(|idx| !categorical_idx.contains(idx))
            .collect();
        Self {
            continuous,
            categorical: categorical_idx,
            embedding_dim,
        }
    }

    pub fn from_params(params: &ModelParams) -> Self {
        Self::new(
            params.n_original_input_dims,
            params.categorical_config.iter().map(|c| c.idx).collect(),
            params.embedding_dim,
        )
    }

    pub fn n_original(&self) -> usize {
        self.continuous.len() + self.categorical.len()
    }

    /// Width of the mask, equal to the model's embedded input width
    pub fn width(&self) -> usize {
        self.continuous.len() + self.categorical.len() * self.embedding_dim
    }

    /// Expand one row of per-column keep flags into embedded layout.
    fn expand_row(&self, keep: &[bool], out: &mut Vec<f32>) {
        let flag = |idx: usize| if keep[idx] { 1.0 } else { 0.0 };
        out.extend(self.continuous.iter().map(|&idx| flag(idx)));
        for &idx in &self.categorical {
            out.extend(std::iter::repeat(flag(idx)).take(self.embedding_dim));
        }
    }
}

/// Draws feature masks from a seeded generator.
#[derive(Debug, Clone)]
pub struct FeatureMasker {
    layout: MaskLayout,
    rng: StdRng,
}

impl FeatureMasker {
    pub fn new(layout: MaskLayout, seed: u64) -> Self {
        Self {
            layout,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn layout(&self) -> &MaskLayout {
        &self.layout
    }

    /// `[batch_size, width]` mask whose entries are 1 (keep) with probability `1 - p`.
    ///
    /// `p` must lie in `[0, 1]`; `TrainParams::validate` enforces this before training.
    /// `p == 0` yields all ones without consuming randomness.
    pub fn generate_mask<B: Backend>(&mut self, p: f64, batch_size: usize, device: &B::Device) -> Tensor<B, 2> {
        let width = self.layout.width();
        if p <= 0.0 {
            return Tensor::ones([batch_size, width], device);
        }

        let keep_probability = (1.0 - p).clamp(0.0, 1.0);
        let n_original = self.layout.n_original();
        let mut values = Vec::with_capacity(batch_size * width);
        let mut keep = vec![true; n_original];
        for _ in 0..batch_size {
            for flag in keep.iter_mut() {
                *flag = self.rng.gen_bool(keep_probability);
            }
            self.layout.expand_row(&keep, &mut values);
        }

        Tensor::from_data(TensorData::new(values, [batch_size, width]), device)
    }
}

/// `[batch_size, width]` all-ones mask used by the supervised phase and inference.
pub fn ones_mask<B: Backend>(batch_size: usize, width: usize, device: &B::Device) -> Tensor<B, 2> {
    Tensor::ones([batch_size, width], device)
}
