//! TabNet estimator: the public entry point for training and inference.
//!
//! Wraps model parameters, the (optional) trained network and the device it
//! lives on. Model parameters are derived from the training data on the first
//! `fit` and frozen afterwards; later fits continue training the same network.

use burn::{
    module::{AutodiffModule, Module},
    tensor::{activation, backend::AutodiffBackend, backend::Backend, Tensor},
};
use burn_ndarray::NdArray;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::base::{
    checkpoint,
    config::{ModelParams, SaveParams, TrainParams},
    data::{derive_categorical_config, derive_target_mapping, Frame, InferenceDataset, TabularInput, TargetInput, TrainingDataset},
    masking::ones_mask,
    model::TabNetModel,
    train::{EpochReport, PhaseSummary, Trainer, TrainingSession},
};
use crate::tabnet::error::{TabNetError, TabNetResult};
use crate::tabnet::metrics::{MetricSink, TracingMetricSink};

/// CPU inference backend
pub type CpuBackend = NdArray<f32>;

/// CPU training backend with autodiff support
pub type CpuAutodiffBackend = burn::backend::Autodiff<CpuBackend>;

/// Outcome of a `fit` call
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    /// One entry per phase that ran, in order
    pub phases: Vec<PhaseSummary>,
    /// Optimizer steps taken across all phases
    pub global_step: usize,
    pub history: Vec<EpochReport>,
}

/// Output of [`TabNet::predict`]
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    /// Class labels, for classification models
    Labels(Vec<String>),
    /// Predicted values, for regression models
    Values(Vec<f32>),
}

/// Class probabilities, one column per target category in ordinal order
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityTable {
    pub columns: Vec<String>,
    pub values: Array2<f32>,
}

/// TabNet estimator generic over the training backend
pub struct TabNet<B: AutodiffBackend> {
    model_params: ModelParams,
    model: Option<TabNetModel<B>>,
    device: B::Device,
    metrics: Box<dyn MetricSink>,
    last_checkpoint: Option<PathBuf>,
}

impl<B: AutodiffBackend> TabNet<B> {
    /// Create an untrained estimator; the network is built on the first `fit`.
    pub fn new(model_params: ModelParams, device: B::Device) -> Self {
        Self {
            model_params,
            model: None,
            device,
            metrics: Box::new(TracingMetricSink),
            last_checkpoint: None,
        }
    }

    /// Restore an estimator from a checkpoint file.
    ///
    /// A missing or unreadable checkpoint is logged and the estimator starts
    /// fresh from `model_params`.
    pub fn from_checkpoint(model_params: ModelParams, device: B::Device, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match checkpoint::load::<B>(path, &device) {
            Ok((params, model)) => {
                info!(path = %path.display(), "Loaded model from checkpoint");
                Self {
                    model_params: params,
                    model: Some(model),
                    device,
                    metrics: Box::new(TracingMetricSink),
                    last_checkpoint: Some(path.to_path_buf()),
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Run `fit` to configure a new model");
                Self::new(model_params, device)
            }
        }
    }

    /// Send per-epoch metrics to `sink` instead of the tracing log
    pub fn with_metric_sink(mut self, sink: impl MetricSink + 'static) -> Self {
        self.metrics = Box::new(sink);
        self
    }

    pub fn model_params(&self) -> &ModelParams {
        &self.model_params
    }

    pub fn model(&self) -> Option<&TabNetModel<B>> {
        self.model.as_ref()
    }

    /// Path of the most recent checkpoint written or loaded
    pub fn last_checkpoint(&self) -> Option<&Path> {
        self.last_checkpoint.as_deref()
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Train on `x_train`/`y_train`, optionally validating on `validation`.
    ///
    /// All configuration checks run before any state changes.
    pub fn fit(
        &mut self,
        x_train: &TabularInput,
        y_train: &TargetInput,
        validation: Option<(&TabularInput, &TargetInput)>,
        train_params: &TrainParams,
        save_params: &SaveParams,
    ) -> TabNetResult<FitReport> {
        train_params.validate()?;
        self.model_params.validate()?;
        if let Some((x_val, y_val)) = validation {
            if x_val.kind() != x_train.kind() || y_val.kind() != y_train.kind() {
                return Err(TabNetError::config(
                    "Training and validation datasets should have same type",
                ));
            }
            if x_val.column_names() != x_train.column_names() {
                return Err(TabNetError::config(
                    "Training and validation datasets have differing columns",
                ));
            }
        }

        let train_frame = Frame::from_input(x_train)?;
        if train_frame.n_rows() == 0 {
            return Err(TabNetError::data("training data has no rows"));
        }

        let mut params = self.model_params.clone();
        let first_fit = !params.is_fitted();
        if first_fit {
            if params.discrete_outputs {
                params.discrete_target_mapping = Some(derive_target_mapping(y_train));
            }
            params.categorical_config = derive_categorical_config(&train_frame, &params.categorical_variables)?;
            params.column_index_map = train_frame.column_index_map().clone();
        } else if train_frame.column_index_map() != &params.column_index_map {
            return Err(TabNetError::config(
                "training columns differ from the columns the model was fitted on",
            ));
        }

        let output_mapping = match (params.discrete_outputs, params.discrete_target_mapping.as_ref()) {
            (true, Some(mapping)) => Some(mapping),
            (true, None) => {
                return Err(TabNetError::config(
                    "classification model has no target mapping",
                ))
            }
            (false, _) => None,
        };
        let train_data = TrainingDataset::new(
            &train_frame,
            y_train,
            output_mapping,
            &params.categorical_config,
            &params.column_index_map,
        )?;
        let validation_data = validation
            .map(|(x_val, y_val)| {
                let frame = Frame::from_input(x_val)?;
                if frame.n_rows() == 0 {
                    return Err(TabNetError::data("validation data has no rows"));
                }
                TrainingDataset::new(
                    &frame,
                    y_val,
                    output_mapping,
                    &params.categorical_config,
                    &params.column_index_map,
                )
            })
            .transpose()?;

        if first_fit {
            params.derive_dimensions(train_frame.n_columns(), train_data.n_output_dims());
            info!(
                n_input_dims = params.n_input_dims,
                n_continuous_input_dims = params.n_continuous_input_dims,
                n_output_dims = params.n_output_dims,
                "Derived model dimensions"
            );
        }

        let model = match self.model.as_ref() {
            Some(model) => detached_copy(model, &params, &self.device),
            None => TabNetModel::<B>::new(&params, &self.device),
        };
        check_forward_shapes(&model, &params, &train_data, train_params, &self.device)?;

        self.model_params = params;
        self.model = Some(detached_copy(&model, &self.model_params, &self.device));

        info!("Starting training");
        let mut session = TrainingSession::new();
        let mut trainer = Trainer::new(
            &self.model_params,
            train_params,
            save_params,
            &train_data,
            validation_data.as_ref(),
            self.metrics.as_mut(),
            &self.device,
        );
        let (model, phases) = trainer.run(&mut session, model)?;

        self.model = Some(model);
        if let Some(last) = phases.last() {
            self.last_checkpoint = Some(last.final_checkpoint.clone());
        }

        Ok(FitReport {
            phases,
            global_step: session.global_step(),
            history: session.into_history(),
        })
    }

    /// Class labels (classification) or values (regression) for every row of `x`.
    pub fn predict(&self, x: &TabularInput, batch_size: usize) -> TabNetResult<Predictions> {
        let outputs = self.predict_outputs(x, batch_size)?;
        if !self.model_params.discrete_outputs {
            return Ok(Predictions::Values(outputs.column(0).to_vec()));
        }

        let mapping = self
            .model_params
            .discrete_target_mapping
            .as_ref()
            .ok_or_else(|| TabNetError::config("classification model has no target mapping"))?;
        let labels = outputs
            .rows()
            .into_iter()
            .map(|row| {
                let ordinal = argmax(row.iter().copied());
                mapping
                    .category(ordinal)
                    .map(str::to_string)
                    .ok_or_else(|| TabNetError::data(format!("predicted class {ordinal} has no label")))
            })
            .collect::<TabNetResult<Vec<_>>>()?;
        Ok(Predictions::Labels(labels))
    }

    /// Class probabilities for every row of `x`. Classification models only.
    pub fn predict_proba(&self, x: &TabularInput, batch_size: usize) -> TabNetResult<ProbabilityTable> {
        if !self.model_params.discrete_outputs {
            return Err(TabNetError::config(
                "`predict_proba` not available for regression models",
            ));
        }
        let values = self.predict_outputs(x, batch_size)?;
        let columns = self
            .model_params
            .discrete_target_mapping
            .as_ref()
            .map(|mapping| mapping.categories())
            .unwrap_or_default();
        Ok(ProbabilityTable { columns, values })
    }

    /// Softmax probabilities or raw regression outputs, `[rows, n_output_dims]`
    fn predict_outputs(&self, x: &TabularInput, batch_size: usize) -> TabNetResult<Array2<f32>> {
        let model = self.model.as_ref().ok_or_else(|| {
            TabNetError::config("Model not yet initialized. Run `fit` to fit a model to an input dataset")
        })?;
        if batch_size == 0 {
            return Err(TabNetError::config("batch size must be positive"));
        }

        let frame = Frame::from_input(x)?;
        if frame.n_columns() != self.model_params.n_original_input_dims {
            return Err(TabNetError::config(format!(
                "input has {} columns, the model was fitted on {}",
                frame.n_columns(),
                self.model_params.n_original_input_dims
            )));
        }
        let data = InferenceDataset::new(
            &frame,
            &self.model_params.categorical_config,
            &self.model_params.column_index_map,
        )?;

        let inference = model.valid();
        let discrete = self.model_params.discrete_outputs;
        let outputs: Vec<Tensor<B::InnerBackend, 2>> = data
            .batches::<B::InnerBackend>(batch_size, &self.device)
            .map(|(continuous, categorical)| {
                let n = continuous.dims()[0];
                let mask = ones_mask::<B::InnerBackend>(n, inference.n_input_dims(), &self.device);
                let logits = inference.forward(continuous, categorical, mask, false).logits;
                if discrete {
                    activation::softmax(logits, 1)
                } else {
                    logits
                }
            })
            .collect();

        let width = self.model_params.n_output_dims.max(1);
        if outputs.is_empty() {
            return Ok(Array2::zeros((0, width)));
        }
        tensor_to_array(Tensor::cat(outputs, 0))
    }
}

/// Run one inference-mode forward pass on a random batch and check the output shapes.
fn check_forward_shapes<B: AutodiffBackend>(
    model: &TabNetModel<B>,
    params: &ModelParams,
    train_data: &TrainingDataset,
    train_params: &TrainParams,
    device: &B::Device,
) -> TabNetResult<()> {
    let mut rng = StdRng::seed_from_u64(train_params.seed);
    let inference = model.valid();
    let probe = train_data.random_batch::<B::InnerBackend>(train_params.batch_size, &mut rng, device);
    let n = probe.len();
    let mask = ones_mask::<B::InnerBackend>(n, params.n_input_dims, device);
    let output = inference.forward(probe.continuous, probe.categorical, mask, false);

    if output.embedded.dims() != [n, params.n_input_dims] {
        return Err(TabNetError::config(format!(
            "embedded input has shape {:?}, expected [{n}, {}]",
            output.embedded.dims(),
            params.n_input_dims
        )));
    }
    if output.logits.dims() != [n, params.n_output_dims] {
        return Err(TabNetError::config(format!(
            "model output has shape {:?}, expected [{n}, {}]",
            output.logits.dims(),
            params.n_output_dims
        )));
    }
    Ok(())
}

/// Copy of `model` with its own running-statistics storage.
///
/// `Module::clone` shares batch-norm running state with the original, so a
/// training pass on one would move the other's statistics.
fn detached_copy<B: Backend>(model: &TabNetModel<B>, params: &ModelParams, device: &B::Device) -> TabNetModel<B> {
    TabNetModel::new(params, device).load_record(model.clone().into_record())
}

fn tensor_to_array<B: Backend>(tensor: Tensor<B, 2>) -> TabNetResult<Array2<f32>> {
    let [rows, cols] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TabNetError::data(format!("cannot read model output: {e:?}")))?;
    Array2::from_shape_vec((rows, cols), values).map_err(|e| TabNetError::data(e.to_string()))
}

fn argmax(values: impl Iterator<Item = f32>) -> usize {
    values
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best_idx, best), (idx, v)| {
            if v > best {
                (idx, v)
            } else {
                (best_idx, best)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{regression_array, small_model_params};

    #[test]
    fn test_argmax_prefers_first_maximum() {
        assert_eq!(argmax([0.1, 0.7, 0.2].into_iter()), 1);
        assert_eq!(argmax([0.5, 0.5].into_iter()), 0);
    }

    #[test]
    fn test_predict_before_fit_is_a_config_error() {
        let estimator = TabNet::<CpuAutodiffBackend>::new(ModelParams::default(), Default::default());
        let x = TabularInput::Array(Array2::zeros((2, 3)));
        let err = estimator.predict(&x, 16).unwrap_err();
        assert!(matches!(err, TabNetError::Config(_)));
        assert!(estimator.model().is_none());
    }

    #[test]
    fn test_predict_proba_on_regression_model_is_rejected() {
        let estimator = TabNet::<CpuAutodiffBackend>::new(ModelParams::default(), Default::default());
        let x = TabularInput::Array(Array2::zeros((2, 3)));
        let err = estimator.predict_proba(&x, 16).unwrap_err();
        assert!(err.to_string().contains("predict_proba"));
    }

    #[test]
    fn test_detached_copy_keeps_its_own_running_statistics() {
        let device = Default::default();
        let (x, y) = regression_array(16, 3, 4);
        let frame = Frame::from_input(&TabularInput::Array(x)).unwrap();
        let mut params = small_model_params(false, &[]);
        params.column_index_map = frame.column_index_map().clone();
        let dataset =
            TrainingDataset::new(&frame, &TargetInput::Values(y), None, &[], &params.column_index_map).unwrap();
        params.derive_dimensions(frame.n_columns(), dataset.n_output_dims());

        let indices: Vec<usize> = (0..16).collect();
        let inference_logits = |model: &TabNetModel<CpuAutodiffBackend>| {
            let batch = dataset.batch::<CpuBackend>(&indices, &device);
            let mask = ones_mask::<CpuBackend>(16, model.n_input_dims(), &device);
            model
                .valid()
                .forward(batch.continuous, batch.categorical, mask, false)
                .logits
                .into_data()
                .to_vec::<f32>()
                .unwrap()
        };

        let model = TabNetModel::<CpuAutodiffBackend>::new(&params, &device);
        let copy = detached_copy(&model, &params, &device);
        let before = inference_logits(&copy);
        assert_eq!(before, inference_logits(&model));

        // Training-mode pass on the original updates its batch-norm estimates
        let batch = dataset.batch::<CpuAutodiffBackend>(&indices, &device);
        let mask = ones_mask::<CpuAutodiffBackend>(16, model.n_input_dims(), &device);
        model.forward(batch.continuous, batch.categorical, mask, false);

        assert_ne!(inference_logits(&model), before);
        assert_eq!(inference_logits(&copy), before);
    }
}
