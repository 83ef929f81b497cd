//! Loss terms of the two training regimes.

use burn::{
    nn::loss::{CrossEntropyLossConfig, MseLoss, Reduction},
    tensor::{backend::Backend, Tensor},
};

use super::data::TargetBatch;
use super::model::TabNetOutput;

/// Masked, standardised reconstruction error.
///
/// Each embedded feature is scaled by its sample standard deviation over the
/// batch (computed without gradient; zero or undefined deviations become 1).
/// Only positions hidden by `feature_mask` contribute. Returns the Frobenius
/// norm of the scaled error over the whole batch as a one-element tensor.
pub fn reconstruction_loss<B: Backend>(
    embedded: Tensor<B, 2>,
    reconstruction: Tensor<B, 2>,
    feature_mask: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let std = embedded.clone().detach().var(0).sqrt();
    let std = std.clone().mask_fill(std.is_nan(), 1.0);
    let std = std.clone().mask_fill(std.equal_elem(0.0), 1.0);

    let hidden = feature_mask.neg().add_scalar(1.0);
    let scaled = hidden.mul(reconstruction.sub(embedded)).div(std);

    // The epsilon keeps the gradient of the norm finite when nothing is hidden.
    scaled.powf_scalar(2.0).sum().add_scalar(1e-12).sqrt()
}

/// Cross-entropy on class ordinals or mean squared error on values.
pub fn task_loss<B: Backend>(logits: Tensor<B, 2>, targets: TargetBatch<B>) -> Tensor<B, 1> {
    match targets {
        TargetBatch::Classes(classes) => CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits, classes),
        TargetBatch::Values(values) => MseLoss::new().forward(logits, values, Reduction::Mean),
    }
}

/// Mean entropy of the step attention masks.
///
/// For every step: entropy summed over features, averaged over the batch.
/// The result is averaged over steps: zero for one-hot masks, `ln(D)` for
/// uniform masks over `D` features.
pub fn sparsity_loss<B: Backend>(step_masks: &[Tensor<B, 2>], epsilon: f64) -> Tensor<B, 1> {
    let per_step: Vec<Tensor<B, 1>> = step_masks
        .iter()
        .map(|mask| {
            mask.clone()
                .mul(mask.clone().add_scalar(epsilon).log())
                .sum_dim(1)
                .mean()
        })
        .collect();
    Tensor::cat(per_step, 0).mean().neg()
}

/// Loss of one batch split into its terms
#[derive(Debug, Clone)]
pub struct LossBreakdown<B: Backend> {
    pub total: Tensor<B, 1>,
    /// Reconstruction loss or task loss, depending on the regime
    pub primary: Tensor<B, 1>,
    pub sparsity: Tensor<B, 1>,
}

/// Combines the primary loss of a regime with the weighted sparsity term
#[derive(Debug, Clone, Copy)]
pub struct LossComposer {
    pub sparsity_weight: f64,
    pub epsilon: f64,
}

impl LossComposer {
    pub fn new(sparsity_weight: f64, epsilon: f64) -> Self {
        Self {
            sparsity_weight,
            epsilon,
        }
    }

    pub fn self_supervised<B: Backend>(&self, output: TabNetOutput<B>, feature_mask: Tensor<B, 2>) -> LossBreakdown<B> {
        let sparsity = sparsity_loss(&output.step_masks, self.epsilon);
        let primary = reconstruction_loss(output.embedded, output.reconstruction, feature_mask);
        self.combine(primary, sparsity)
    }

    pub fn supervised<B: Backend>(&self, output: TabNetOutput<B>, targets: TargetBatch<B>) -> LossBreakdown<B> {
        let sparsity = sparsity_loss(&output.step_masks, self.epsilon);
        let primary = task_loss(output.logits, targets);
        self.combine(primary, sparsity)
    }

    fn combine<B: Backend>(&self, primary: Tensor<B, 1>, sparsity: Tensor<B, 1>) -> LossBreakdown<B> {
        let total = sparsity.clone().mul_scalar(self.sparsity_weight).add(primary.clone());
        LossBreakdown {
            total,
            primary,
            sparsity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Int, TensorData};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_data().to_vec::<f32>().unwrap()[0]
    }

    #[test]
    fn test_reconstruction_loss_ignores_visible_positions() {
        let device = Default::default();
        let embedded = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);
        let reconstruction = Tensor::<TestBackend, 2>::from_floats([[9.0, 9.0], [9.0, 9.0]], &device);
        let ones = Tensor::<TestBackend, 2>::ones([2, 2], &device);

        let loss = scalar(reconstruction_loss(embedded, reconstruction, ones));
        assert!(loss.abs() < 1e-4);
    }

    #[test]
    fn test_reconstruction_loss_standardises_by_column_std() {
        let device = Default::default();
        // column 0 std = sqrt(2), column 1 constant so its std becomes 1
        let embedded = Tensor::<TestBackend, 2>::from_floats([[1.0, 5.0], [3.0, 5.0]], &device);
        let reconstruction = Tensor::<TestBackend, 2>::from_floats([[1.0, 7.0], [3.0 + 2.0f32.sqrt(), 5.0]], &device);
        let hidden = Tensor::<TestBackend, 2>::zeros([2, 2], &device);

        // errors: (0, 2) and (1, 0) after scaling -> norm sqrt(5)
        let loss = scalar(reconstruction_loss(embedded, reconstruction, hidden));
        assert!((loss - 5.0f32.sqrt()).abs() < 1e-4, "loss {loss}");
    }

    #[test]
    fn test_reconstruction_loss_single_row_batch_is_finite() {
        let device = Default::default();
        let embedded = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0]], &device);
        let reconstruction = Tensor::<TestBackend, 2>::from_floats([[4.0, 6.0]], &device);
        let hidden = Tensor::<TestBackend, 2>::zeros([1, 2], &device);

        let loss = scalar(reconstruction_loss(embedded, reconstruction, hidden));
        assert!((loss - 5.0).abs() < 1e-4, "loss {loss}");
    }

    #[test]
    fn test_sparsity_loss_bounds() {
        let device = Default::default();
        let one_hot = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]], &device);
        let uniform = Tensor::<TestBackend, 2>::ones([2, 4], &device).div_scalar(4.0);

        let zero = scalar(sparsity_loss(&[one_hot.clone(), one_hot], 1e-7));
        assert!(zero.abs() < 1e-4);

        let max = scalar(sparsity_loss(&[uniform], 1e-7));
        assert!((max - 4.0f32.ln()).abs() < 1e-4);
    }

    #[test]
    fn test_task_loss_regression_is_mse() {
        let device = Default::default();
        let predictions = Tensor::<TestBackend, 2>::from_floats([[1.0], [3.0]], &device);
        let targets = TargetBatch::Values(Tensor::from_floats([[2.0], [5.0]], &device));
        let loss = scalar(task_loss(predictions, targets));
        assert!((loss - 2.5).abs() < 1e-5);
    }

    #[test]
    fn test_task_loss_classification_is_cross_entropy() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::zeros([2, 4], &device);
        let classes = Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![0i64, 3], [2]), &device);
        let loss = scalar(task_loss(logits, TargetBatch::Classes(classes)));
        assert!((loss - 4.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_composer_weights_sparsity() {
        let device = Default::default();
        let composer = LossComposer::new(0.5, 1e-7);
        let primary = Tensor::<TestBackend, 1>::from_floats([2.0], &device);
        let sparsity = Tensor::<TestBackend, 1>::from_floats([1.0], &device);
        let breakdown = composer.combine(primary, sparsity);
        assert!((scalar(breakdown.total) - 2.5).abs() < 1e-6);
    }
}
