//! Tabular input containers and the datasets that feed the training loop.
//!
//! Caller data arrives as a [`TabularInput`] and a [`TargetInput`], is
//! converted once into a [`Frame`], and is then encoded against the frozen
//! [`ModelParams`] layout: continuous columns as `f32`, categorical columns as
//! ordinal codes, targets as class ordinals or values. Encoded data stays on
//! the host; tensors are built per batch.

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;

use super::config::{CategoricalColumnConfig, CategoryMap};
use crate::tabnet::error::{TabNetError, TabNetResult};

/// Values of one named column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(values) => values.len(),
            Self::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Category key of every cell. Integral numbers are keyed without a fractional part.
    pub fn category_keys(&self) -> Vec<String> {
        match self {
            Self::Numeric(values) => values.iter().map(|v| numeric_key(*v)).collect(),
            Self::Text(values) => values.clone(),
        }
    }
}

pub(crate) fn numeric_key(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Column-oriented table with named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledTable {
    names: Vec<String>,
    columns: Vec<ColumnData>,
}

impl LabeledTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_numeric(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.names.push(name.into());
        self.columns.push(ColumnData::Numeric(values));
        self
    }

    pub fn with_text<S: Into<String>>(mut self, name: impl Into<String>, values: Vec<S>) -> Self {
        self.names.push(name.into());
        self.columns
            .push(ColumnData::Text(values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Feature container accepted by `fit`, `predict` and `predict_proba`
#[derive(Debug, Clone, PartialEq)]
pub enum TabularInput {
    /// Named columns; categorical columns may hold text
    Table(LabeledTable),
    /// Unnamed numeric columns, addressed as `"0"`, `"1"`, ...
    Array(Array2<f64>),
}

impl TabularInput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Table(_) => "table",
            Self::Array(_) => "array",
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        match self {
            Self::Table(table) => table.names.clone(),
            Self::Array(array) => (0..array.ncols()).map(|i| i.to_string()).collect(),
        }
    }
}

impl From<LabeledTable> for TabularInput {
    fn from(table: LabeledTable) -> Self {
        Self::Table(table)
    }
}

impl From<Array2<f64>> for TabularInput {
    fn from(array: Array2<f64>) -> Self {
        Self::Array(array)
    }
}

/// Target container
#[derive(Debug, Clone, PartialEq)]
pub enum TargetInput {
    Labels(Vec<String>),
    Values(Vec<f64>),
}

impl TargetInput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Labels(_) => "labels",
            Self::Values(_) => "values",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Labels(labels) => labels.len(),
            Self::Values(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn category_keys(&self) -> Vec<String> {
        match self {
            Self::Labels(labels) => labels.clone(),
            Self::Values(values) => values.iter().map(|v| numeric_key(*v)).collect(),
        }
    }
}

/// Input converted to a uniform column-oriented form
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    columns: Vec<ColumnData>,
    column_index_map: BTreeMap<String, usize>,
    n_rows: usize,
}

impl Frame {
    pub fn from_input(input: &TabularInput) -> TabNetResult<Self> {
        let names = input.column_names();
        let columns: Vec<ColumnData> = match input {
            TabularInput::Table(table) => table.columns.clone(),
            TabularInput::Array(array) => array
                .columns()
                .into_iter()
                .map(|column| ColumnData::Numeric(column.to_vec()))
                .collect(),
        };

        let n_rows = columns.first().map(ColumnData::len).unwrap_or(0);
        if let Some((name, column)) = names.iter().zip(&columns).find(|(_, c)| c.len() != n_rows) {
            return Err(TabNetError::data(format!(
                "column `{name}` has {} rows, expected {n_rows}",
                column.len()
            )));
        }

        let mut column_index_map = BTreeMap::new();
        for (idx, name) in names.into_iter().enumerate() {
            if column_index_map.insert(name.clone(), idx).is_some() {
                return Err(TabNetError::data(format!("duplicate column `{name}`")));
            }
        }

        Ok(Self {
            columns,
            column_index_map,
            n_rows,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index_map(&self) -> &BTreeMap<String, usize> {
        &self.column_index_map
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.column_index_map.get(name).map(|&idx| &self.columns[idx])
    }
}

/// Ordinal maps for the named categorical columns, in the order given.
pub fn derive_categorical_config(
    frame: &Frame,
    categorical_variables: &[String],
) -> TabNetResult<Vec<CategoricalColumnConfig>> {
    categorical_variables
        .iter()
        .map(|name| {
            let idx = *frame.column_index_map().get(name).ok_or_else(|| {
                TabNetError::config(format!("categorical variable `{name}` is not a column of the training data"))
            })?;
            let map = CategoryMap::from_values(frame.columns[idx].category_keys());
            Ok(CategoricalColumnConfig {
                identifier: name.clone(),
                idx,
                n_dims: map.len(),
                map,
            })
        })
        .collect()
}

/// Ordinal map over the distinct target values.
pub fn derive_target_mapping(targets: &TargetInput) -> CategoryMap {
    CategoryMap::from_values(targets.category_keys())
}

/// Host-side encoded features, row-major
#[derive(Debug, Clone)]
struct EncodedFeatures {
    continuous: Vec<f32>,
    categorical: Vec<i64>,
    n_continuous: usize,
    n_categorical: usize,
    n_rows: usize,
}

impl EncodedFeatures {
    fn encode(
        frame: &Frame,
        categorical_config: &[CategoricalColumnConfig],
        columns: &BTreeMap<String, usize>,
    ) -> TabNetResult<Self> {
        let mut continuous_names: Vec<(&String, &usize)> = columns
            .iter()
            .filter(|(name, _)| !categorical_config.iter().any(|c| &c.identifier == *name))
            .collect();
        continuous_names.sort_by_key(|(_, idx)| **idx);

        let lookup = |name: &str| {
            frame
                .column(name)
                .ok_or_else(|| TabNetError::config(format!("input is missing column `{name}`")))
        };

        let n_rows = frame.n_rows();
        let n_continuous = continuous_names.len();
        let n_categorical = categorical_config.len();

        let mut continuous = vec![0f32; n_rows * n_continuous];
        for (j, (name, _)) in continuous_names.iter().enumerate() {
            match lookup(name)? {
                ColumnData::Numeric(values) => {
                    for (row, value) in values.iter().enumerate() {
                        continuous[row * n_continuous + j] = *value as f32;
                    }
                }
                ColumnData::Text(values) => {
                    for (row, value) in values.iter().enumerate() {
                        let parsed = value.trim().parse::<f64>().map_err(|_| {
                            TabNetError::data(format!(
                                "non-numeric value `{value}` in continuous column `{name}`"
                            ))
                        })?;
                        continuous[row * n_continuous + j] = parsed as f32;
                    }
                }
            }
        }

        let mut categorical = vec![0i64; n_rows * n_categorical];
        for (j, config) in categorical_config.iter().enumerate() {
            let keys = lookup(&config.identifier)?.category_keys();
            for (row, key) in keys.iter().enumerate() {
                let ordinal = config.map.ordinal(key).ok_or_else(|| {
                    TabNetError::data(format!(
                        "unseen category `{key}` in column `{}`",
                        config.identifier
                    ))
                })?;
                categorical[row * n_categorical + j] = ordinal as i64;
            }
        }

        Ok(Self {
            continuous,
            categorical,
            n_continuous,
            n_categorical,
            n_rows,
        })
    }

    fn gather<B: Backend>(&self, indices: &[usize], device: &B::Device) -> (Tensor<B, 2>, Tensor<B, 2, Int>) {
        let k = indices.len();
        let mut continuous = Vec::with_capacity(k * self.n_continuous);
        let mut categorical = Vec::with_capacity(k * self.n_categorical);
        for &row in indices {
            continuous.extend_from_slice(&self.continuous[row * self.n_continuous..(row + 1) * self.n_continuous]);
            categorical.extend_from_slice(&self.categorical[row * self.n_categorical..(row + 1) * self.n_categorical]);
        }
        (
            Tensor::from_data(TensorData::new(continuous, [k, self.n_continuous]), device),
            Tensor::from_data(TensorData::new(categorical, [k, self.n_categorical]), device),
        )
    }
}

#[derive(Debug, Clone)]
enum EncodedTargets {
    Classes(Vec<i64>),
    Values(Vec<f32>),
}

impl EncodedTargets {
    fn encode(targets: &TargetInput, output_mapping: Option<&CategoryMap>) -> TabNetResult<Self> {
        match output_mapping {
            Some(mapping) => targets
                .category_keys()
                .iter()
                .map(|key| {
                    mapping
                        .ordinal(key)
                        .map(|o| o as i64)
                        .ok_or_else(|| TabNetError::data(format!("unseen target category `{key}`")))
                })
                .collect::<TabNetResult<Vec<_>>>()
                .map(Self::Classes),
            None => match targets {
                TargetInput::Values(values) => Ok(Self::Values(values.iter().map(|v| *v as f32).collect())),
                TargetInput::Labels(labels) => labels
                    .iter()
                    .map(|label| {
                        label.trim().parse::<f32>().map_err(|_| {
                            TabNetError::data(format!("non-numeric regression target `{label}`"))
                        })
                    })
                    .collect::<TabNetResult<Vec<_>>>()
                    .map(Self::Values),
            },
        }
    }

    fn gather<B: Backend>(&self, indices: &[usize], device: &B::Device) -> TargetBatch<B> {
        match self {
            Self::Classes(classes) => {
                let picked: Vec<i64> = indices.iter().map(|&i| classes[i]).collect();
                TargetBatch::Classes(Tensor::from_data(TensorData::new(picked, [indices.len()]), device))
            }
            Self::Values(values) => {
                let picked: Vec<f32> = indices.iter().map(|&i| values[i]).collect();
                TargetBatch::Values(Tensor::from_data(TensorData::new(picked, [indices.len(), 1]), device))
            }
        }
    }
}

/// Targets of one batch
#[derive(Debug, Clone)]
pub enum TargetBatch<B: Backend> {
    /// `[batch]` class ordinals
    Classes(Tensor<B, 1, Int>),
    /// `[batch, 1]` regression values
    Values(Tensor<B, 2>),
}

impl<B: Backend> TargetBatch<B> {
    pub fn len(&self) -> usize {
        match self {
            Self::Classes(t) => t.dims()[0],
            Self::Values(t) => t.dims()[0],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One training batch
#[derive(Debug, Clone)]
pub struct TabularBatch<B: Backend> {
    pub continuous: Tensor<B, 2>,
    pub categorical: Tensor<B, 2, Int>,
    pub targets: TargetBatch<B>,
}

impl<B: Backend> TabularBatch<B> {
    pub fn len(&self) -> usize {
        self.continuous.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn batch_order(n_rows: usize, batch_size: usize, shuffle: Option<&mut StdRng>) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..n_rows).collect();
    if let Some(rng) = shuffle {
        order.shuffle(rng);
    }
    order.chunks(batch_size.max(1)).map(|c| c.to_vec()).collect()
}

fn sample_rows(n_rows: usize, n: usize, rng: &mut StdRng) -> Vec<usize> {
    rand::seq::index::sample(rng, n_rows, n.min(n_rows)).into_vec()
}

/// Features and targets encoded for training or validation
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    features: EncodedFeatures,
    targets: EncodedTargets,
    n_output_dims: usize,
}

impl TrainingDataset {
    /// Encode `frame` and `targets`. `output_mapping` is `Some` for classification.
    pub fn new(
        frame: &Frame,
        targets: &TargetInput,
        output_mapping: Option<&CategoryMap>,
        categorical_config: &[CategoricalColumnConfig],
        columns: &BTreeMap<String, usize>,
    ) -> TabNetResult<Self> {
        if targets.len() != frame.n_rows() {
            return Err(TabNetError::data(format!(
                "features have {} rows but targets have {}",
                frame.n_rows(),
                targets.len()
            )));
        }
        let features = EncodedFeatures::encode(frame, categorical_config, columns)?;
        let targets = EncodedTargets::encode(targets, output_mapping)?;
        let n_output_dims = output_mapping.map(CategoryMap::len).unwrap_or(1);

        Ok(Self {
            features,
            targets,
            n_output_dims,
        })
    }

    pub fn len(&self) -> usize {
        self.features.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether targets are encoded as class ordinals
    pub fn is_classification(&self) -> bool {
        matches!(self.targets, EncodedTargets::Classes(_))
    }

    /// Number of classes for classification, 1 for regression
    pub fn n_output_dims(&self) -> usize {
        self.n_output_dims
    }

    pub fn batch<B: Backend>(&self, indices: &[usize], device: &B::Device) -> TabularBatch<B> {
        let (continuous, categorical) = self.features.gather(indices, device);
        TabularBatch {
            continuous,
            categorical,
            targets: self.targets.gather(indices, device),
        }
    }

    /// Batches covering every row once; shuffled when an rng is given.
    pub fn batches<'a, B: Backend>(
        &'a self,
        batch_size: usize,
        shuffle: Option<&mut StdRng>,
        device: &B::Device,
    ) -> impl Iterator<Item = TabularBatch<B>> + 'a {
        let device = device.clone();
        batch_order(self.len(), batch_size, shuffle)
            .into_iter()
            .map(move |indices| self.batch(&indices, &device))
    }

    /// Up to `n` distinct rows drawn at random
    pub fn random_batch<B: Backend>(&self, n: usize, rng: &mut StdRng, device: &B::Device) -> TabularBatch<B> {
        self.batch(&sample_rows(self.len(), n, rng), device)
    }
}

/// Features encoded for prediction
#[derive(Debug, Clone)]
pub struct InferenceDataset {
    features: EncodedFeatures,
}

impl InferenceDataset {
    pub fn new(
        frame: &Frame,
        categorical_config: &[CategoricalColumnConfig],
        columns: &BTreeMap<String, usize>,
    ) -> TabNetResult<Self> {
        Ok(Self {
            features: EncodedFeatures::encode(frame, categorical_config, columns)?,
        })
    }

    pub fn len(&self) -> usize {
        self.features.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(continuous, categorical)` batches in row order
    pub fn batches<'a, B: Backend>(
        &'a self,
        batch_size: usize,
        device: &B::Device,
    ) -> impl Iterator<Item = (Tensor<B, 2>, Tensor<B, 2, Int>)> + 'a {
        let device = device.clone();
        batch_order(self.len(), batch_size, None)
            .into_iter()
            .map(move |indices| self.features.gather(&indices, &device))
    }

    pub fn random_batch<B: Backend>(
        &self,
        n: usize,
        rng: &mut StdRng,
        device: &B::Device,
    ) -> (Tensor<B, 2>, Tensor<B, 2, Int>) {
        self.features.gather(&sample_rows(self.len(), n, rng), device)
    }
}
