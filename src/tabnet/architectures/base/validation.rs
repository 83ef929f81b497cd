//! Inference-mode evaluation of a model on a validation dataset.
//!
//! Callers pass `model.valid()`: the inner backend tracks no gradients,
//! dropout is inactive and batch norm reads its running statistics, while the
//! autodiff model being trained stays in training mode.

use burn::tensor::{activation, backend::Backend, ElementConversion, Int, Tensor};

use super::data::{TargetBatch, TrainingDataset};
use super::loss_utils::{reconstruction_loss, task_loss};
use super::masking::{ones_mask, FeatureMasker};
use super::model::TabNetModel;

/// Secondary metric reported alongside the validation criterion
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationMetric {
    Accuracy(f64),
    Mse(f64),
}

impl ValidationMetric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accuracy(_) => "validation accuracy",
            Self::Mse(_) => "validation mse",
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            Self::Accuracy(v) | Self::Mse(v) => *v,
        }
    }
}

/// Supervised validation result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisedValidation {
    /// Task loss over the whole validation set
    pub criterion: f64,
    pub metric: ValidationMetric,
}

/// Predictions paired with targets of the same kind
#[derive(Debug, Clone)]
pub enum PredictedTargets<B: Backend> {
    /// Argmax of the softmax against the true class ordinals
    Classes {
        predicted: Tensor<B, 1, Int>,
        actual: Tensor<B, 1, Int>,
    },
    /// Raw network outputs against the true values, both `[n, 1]`
    Values {
        predicted: Tensor<B, 2>,
        actual: Tensor<B, 2>,
    },
}

impl<B: Backend> PredictedTargets<B> {
    pub fn targets(&self) -> TargetBatch<B> {
        match self {
            Self::Classes { actual, .. } => TargetBatch::Classes(actual.clone()),
            Self::Values { actual, .. } => TargetBatch::Values(actual.clone()),
        }
    }
}

/// Concatenated outputs of a supervised validation pass
#[derive(Debug, Clone)]
pub struct ValidationPredictions<B: Backend> {
    pub outputs: PredictedTargets<B>,
    pub logits: Tensor<B, 2>,
}

/// Mean reconstruction loss over validation batches.
///
/// Every batch draws a fresh mask at `p_mask`, as in training, so the value
/// varies with the masker's random stream.
pub fn validation_reconstruct_loss<B: Backend>(
    model: &TabNetModel<B>,
    dataset: &TrainingDataset,
    batch_size: usize,
    masker: &mut FeatureMasker,
    p_mask: f64,
    device: &B::Device,
) -> f64 {
    let losses: Vec<f64> = dataset
        .batches::<B>(batch_size, None, device)
        .map(|batch| {
            let mask = masker.generate_mask::<B>(p_mask, batch.len(), device);
            let output = model.forward(batch.continuous, batch.categorical, mask.clone(), true);
            reconstruction_loss(output.embedded, output.reconstruction, mask)
                .into_scalar()
                .elem::<f64>()
        })
        .collect();

    if losses.is_empty() {
        return f64::NAN;
    }
    losses.iter().sum::<f64>() / losses.len() as f64
}

/// Predict every validation row with an all-ones mask.
///
/// Class or value predictions follow how the dataset encodes its targets.
pub fn validation_predict<B: Backend>(
    model: &TabNetModel<B>,
    dataset: &TrainingDataset,
    batch_size: usize,
    device: &B::Device,
) -> Option<ValidationPredictions<B>> {
    let mut predicted_classes: Vec<Tensor<B, 1, Int>> = Vec::new();
    let mut actual_classes: Vec<Tensor<B, 1, Int>> = Vec::new();
    let mut predicted_values: Vec<Tensor<B, 2>> = Vec::new();
    let mut actual_values: Vec<Tensor<B, 2>> = Vec::new();
    let mut logits = Vec::new();

    for batch in dataset.batches::<B>(batch_size, None, device) {
        let n = batch.len();
        let output = model.forward(
            batch.continuous,
            batch.categorical,
            ones_mask::<B>(n, model.n_input_dims(), device),
            false,
        );
        match batch.targets {
            TargetBatch::Classes(actual) => {
                predicted_classes.push(activation::softmax(output.logits.clone(), 1).argmax(1).reshape([n]));
                actual_classes.push(actual);
            }
            TargetBatch::Values(actual) => {
                predicted_values.push(output.logits.clone());
                actual_values.push(actual);
            }
        }
        logits.push(output.logits);
    }

    if logits.is_empty() {
        return None;
    }
    let outputs = if dataset.is_classification() {
        PredictedTargets::Classes {
            predicted: Tensor::cat(predicted_classes, 0),
            actual: Tensor::cat(actual_classes, 0),
        }
    } else {
        PredictedTargets::Values {
            predicted: Tensor::cat(predicted_values, 0),
            actual: Tensor::cat(actual_values, 0),
        }
    };

    Some(ValidationPredictions {
        outputs,
        logits: Tensor::cat(logits, 0),
    })
}

/// Criterion (task loss) plus accuracy or MSE on the validation set.
pub fn evaluate_supervised<B: Backend>(
    model: &TabNetModel<B>,
    dataset: &TrainingDataset,
    batch_size: usize,
    device: &B::Device,
) -> SupervisedValidation {
    let Some(predictions) = validation_predict(model, dataset, batch_size, device) else {
        return SupervisedValidation {
            criterion: f64::NAN,
            metric: if dataset.is_classification() {
                ValidationMetric::Accuracy(f64::NAN)
            } else {
                ValidationMetric::Mse(f64::NAN)
            },
        };
    };

    let metric = match &predictions.outputs {
        PredictedTargets::Classes { predicted, actual } => {
            let correct = predicted
                .clone()
                .equal(actual.clone())
                .int()
                .sum()
                .into_scalar()
                .elem::<f64>();
            ValidationMetric::Accuracy(correct / actual.dims()[0] as f64)
        }
        PredictedTargets::Values { predicted, actual } => ValidationMetric::Mse(
            predicted
                .clone()
                .sub(actual.clone())
                .powf_scalar(2.0)
                .mean()
                .into_scalar()
                .elem::<f64>(),
        ),
    };

    let criterion = task_loss(predictions.logits, predictions.outputs.targets())
        .into_scalar()
        .elem::<f64>();

    SupervisedValidation { criterion, metric }
}
