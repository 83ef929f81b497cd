//! Persisting and restoring `(ModelParams, weights)` pairs.
//!
//! A checkpoint is a single bincode-encoded envelope holding the model
//! parameters as JSON (so unknown keys survive), the shape of every weight
//! tensor, and the model record encoded by burn's `BinBytesRecorder` at full
//! precision. Files are named
//! `<unix_timestamp>_<model_name>_<phase_stub>_<label>.bin` and never deleted.

use burn::{
    module::{Module, ModuleVisitor, ParamId},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Int, Tensor},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::config::{ModelParams, SaveParams};
use super::model::TabNetModel;
use super::train::TrainingPhase;
use crate::tabnet::error::CheckpointError;

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointEnvelope {
    format_version: u32,
    model_params: String,
    weight_shapes: Vec<Vec<usize>>,
    weights: Vec<u8>,
}

/// Collects tensor shapes in module visiting order
#[derive(Default)]
struct ShapeCollector {
    shapes: Vec<Vec<usize>>,
}

impl<B: Backend> ModuleVisitor<B> for ShapeCollector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.shapes.push(tensor.dims().to_vec());
    }

    fn visit_int<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D, Int>) {
        self.shapes.push(tensor.dims().to_vec());
    }
}

/// Shapes of every tensor held by `model`
pub fn weight_shapes<B: Backend>(model: &TabNetModel<B>) -> Vec<Vec<usize>> {
    let mut collector = ShapeCollector::default();
    model.visit(&mut collector);
    collector.shapes
}

/// Suffix distinguishing periodic checkpoints from the end-of-phase one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLabel {
    Epoch(usize),
    Final,
}

impl fmt::Display for CheckpointLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epoch(epoch) => write!(f, "epoch_{epoch}"),
            Self::Final => write!(f, "final"),
        }
    }
}

/// File name for a checkpoint written at `timestamp`
pub fn checkpoint_file_name(
    timestamp: u64,
    model_name: &str,
    phase: TrainingPhase,
    label: CheckpointLabel,
) -> String {
    format!("{timestamp}_{model_name}_{}_{label}.bin", phase.checkpoint_stub())
}

/// Write `model` and its parameters under `save_params.save_folder`.
///
/// Creates the folder when missing. Any failure here is fatal to the caller.
pub fn save<B: Backend>(
    save_params: &SaveParams,
    model_params: &ModelParams,
    model: &TabNetModel<B>,
    phase: TrainingPhase,
    label: CheckpointLabel,
) -> Result<PathBuf> {
    let folder = &save_params.save_folder;
    std::fs::create_dir_all(folder).map_err(|e| CheckpointError::Io {
        path: folder.clone(),
        source: e,
    })?;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = folder.join(checkpoint_file_name(
        timestamp,
        &save_params.model_name,
        phase,
        label,
    ));
    tracing::info!(path = %path.display(), %phase, %label, "Saving checkpoint");

    let weights = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.clone().into_record(), ())
        .map_err(|e| CheckpointError::Encode(e.to_string()))?;
    let envelope = CheckpointEnvelope {
        format_version: FORMAT_VERSION,
        model_params: serde_json::to_string(model_params)
            .map_err(|e| CheckpointError::Encode(e.to_string()))?,
        weight_shapes: weight_shapes(model),
        weights,
    };
    let bytes = bincode::serialize(&envelope).map_err(|e| CheckpointError::Encode(e.to_string()))?;

    std::fs::write(&path, &bytes).map_err(|e| CheckpointError::Io {
        path: path.clone(),
        source: e,
    })?;
    tracing::debug!(path = %path.display(), size = bytes.len(), "Checkpoint saved");

    Ok(path)
}

/// Read a checkpoint and rebuild the model on `device`.
///
/// Missing files are `NotFound`; truncated, foreign or inconsistent files are `Corrupt`.
pub fn load<B: Backend>(path: &Path, device: &B::Device) -> Result<(ModelParams, TabNetModel<B>)> {
    tracing::info!(path = %path.display(), "Restoring checkpoint");

    if !path.is_file() {
        return Err(CheckpointError::NotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path).map_err(|e| CheckpointError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let envelope: CheckpointEnvelope =
        bincode::deserialize(&bytes).map_err(|e| CheckpointError::corrupt(path, e))?;
    if envelope.format_version != FORMAT_VERSION {
        return Err(CheckpointError::corrupt(
            path,
            format!("unsupported format version {}", envelope.format_version),
        ));
    }

    let model_params: ModelParams =
        serde_json::from_str(&envelope.model_params).map_err(|e| CheckpointError::corrupt(path, e))?;
    if !model_params.is_fitted() {
        return Err(CheckpointError::corrupt(
            path,
            "model parameters carry no input dimensions",
        ));
    }

    // burn loads records without shape checks, so params and weights must agree up front
    let model = TabNetModel::<B>::new(&model_params, device);
    let expected = weight_shapes(&model);
    if expected != envelope.weight_shapes {
        return Err(CheckpointError::corrupt(
            path,
            "weights do not fit the architecture described by the model parameters",
        ));
    }
    let record: <TabNetModel<B> as Module<B>>::Record = BinBytesRecorder::<FullPrecisionSettings>::default()
        .load(envelope.weights, device)
        .map_err(|e| CheckpointError::corrupt(path, e))?;
    let model = model.load_record(record);
    if weight_shapes(&model) != expected {
        return Err(CheckpointError::corrupt(
            path,
            "stored weights disagree with their recorded shapes",
        ));
    }

    tracing::info!(
        path = %path.display(),
        n_steps = model_params.n_steps,
        n_input_dims = model_params.n_input_dims,
        "Checkpoint restored"
    );
    Ok((model_params, model))
}
