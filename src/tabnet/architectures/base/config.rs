use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::tabnet::error::{TabNetError, TabNetResult};
use crate::tabnet::settings::settings;

/// Normalisation applied to the attentive transformer output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskActivation {
    Sparsemax,
    Softmax,
}

impl Default for MaskActivation {
    fn default() -> Self {
        Self::Sparsemax
    }
}

/// Category value to ordinal mapping.
///
/// Ordinals follow the sorted order of the distinct values: numeric order when
/// every value parses as a number, lexicographic order otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryMap {
    ordinals: BTreeMap<String, usize>,
}

impl CategoryMap {
    /// Build a map from the distinct values of a column.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut distinct: Vec<String> = values
            .into_iter()
            .map(|v| v.as_ref().to_string())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        let numeric: Option<Vec<f64>> = distinct.iter().map(|v| v.parse::<f64>().ok()).collect();
        if let Some(numbers) = numeric {
            let mut paired: Vec<(f64, String)> = numbers.into_iter().zip(distinct).collect();
            paired.sort_by(|a, b| a.0.total_cmp(&b.0));
            distinct = paired.into_iter().map(|(_, v)| v).collect();
        }

        let ordinals = distinct
            .into_iter()
            .enumerate()
            .map(|(ordinal, value)| (value, ordinal))
            .collect();
        Self { ordinals }
    }

    pub fn ordinal(&self, value: &str) -> Option<usize> {
        self.ordinals.get(value).copied()
    }

    /// Categories in ordinal order.
    pub fn categories(&self) -> Vec<String> {
        let mut ordered: Vec<(&String, &usize)> = self.ordinals.iter().collect();
        ordered.sort_by_key(|(_, ordinal)| **ordinal);
        ordered.into_iter().map(|(value, _)| value.clone()).collect()
    }

    pub fn category(&self, ordinal: usize) -> Option<&str> {
        self.ordinals
            .iter()
            .find(|(_, o)| **o == ordinal)
            .map(|(value, _)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }
}

/// Encoding of one categorical input column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalColumnConfig {
    /// Column name as supplied by the caller
    pub identifier: String,
    /// Position of the column in the raw input
    pub idx: usize,
    /// Cardinality, i.e. the number of embedding rows
    pub n_dims: usize,
    pub map: CategoryMap,
}

/// Architecture and data-layout parameters of a TabNet model.
///
/// The user-facing fields are supplied at construction; the derived fields are
/// filled in by the first `fit` and never change afterwards. The whole struct
/// is stored in every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Number of decision steps
    #[serde(default = "default_n_steps")]
    pub n_steps: usize,

    /// Width of the decision output of each step
    #[serde(default = "default_n_dims")]
    pub n_dims_d: usize,

    /// Width of the attention input of each step
    #[serde(default = "default_n_dims")]
    pub n_dims_a: usize,

    /// Weight kept from the running statistics on every batch-norm update
    #[serde(default = "default_batch_norm_momentum")]
    pub batch_norm_momentum: f64,

    #[serde(default = "default_dropout_p")]
    pub dropout_p: f64,

    /// Relaxation factor controlling how often a feature can be reused across steps
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Classification when true, regression otherwise
    #[serde(default)]
    pub discrete_outputs: bool,

    #[serde(default)]
    pub mask_type: MaskActivation,

    /// Seed for weight initialisation
    #[serde(default)]
    pub seed: u64,

    /// Names of the categorical columns, in registration order
    #[serde(default)]
    pub categorical_variables: Vec<String>,

    // ------ Derived at first fit
    #[serde(default)]
    pub categorical_config: Vec<CategoricalColumnConfig>,

    #[serde(default)]
    pub discrete_target_mapping: Option<CategoryMap>,

    #[serde(default)]
    pub n_input_dims: usize,

    #[serde(default)]
    pub n_original_input_dims: usize,

    #[serde(default)]
    pub n_continuous_input_dims: usize,

    #[serde(default)]
    pub n_output_dims: usize,

    #[serde(default)]
    pub column_index_map: BTreeMap<String, usize>,

    /// Keys this version does not interpret; carried through checkpoints untouched
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_n_steps() -> usize { 5 }
fn default_n_dims() -> usize { 16 }
fn default_batch_norm_momentum() -> f64 { 0.85 }
fn default_dropout_p() -> f64 { 0.3 }
fn default_gamma() -> f64 { 1.5 }
fn default_embedding_dim() -> usize { 2 }

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_steps: default_n_steps(),
            n_dims_d: default_n_dims(),
            n_dims_a: default_n_dims(),
            batch_norm_momentum: default_batch_norm_momentum(),
            dropout_p: default_dropout_p(),
            gamma: default_gamma(),
            embedding_dim: default_embedding_dim(),
            discrete_outputs: false,
            mask_type: MaskActivation::default(),
            seed: 0,
            categorical_variables: Vec::new(),
            categorical_config: Vec::new(),
            discrete_target_mapping: None,
            n_input_dims: 0,
            n_original_input_dims: 0,
            n_continuous_input_dims: 0,
            n_output_dims: 0,
            column_index_map: BTreeMap::new(),
            extra: HashMap::new(),
        }
    }
}

impl ModelParams {
    /// Merge a JSON object of overrides over the defaults.
    pub fn from_overrides(overrides: serde_json::Value) -> TabNetResult<Self> {
        merge_over_defaults(&Self::default(), overrides)
    }

    /// True once the data-derived fields have been filled in by a fit
    pub fn is_fitted(&self) -> bool {
        self.n_input_dims > 0
    }

    pub fn n_categorical(&self) -> usize {
        self.categorical_config.len()
    }

    /// Column names ordered by their index in the raw input
    pub fn column_names(&self) -> Vec<String> {
        let mut columns: Vec<(&String, &usize)> = self.column_index_map.iter().collect();
        columns.sort_by_key(|(_, idx)| **idx);
        columns.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// Fill in the layout-dependent dimensions for `n_columns` raw columns.
    pub fn derive_dimensions(&mut self, n_columns: usize, n_output_dims: usize) {
        let n_categorical = self.categorical_config.len();
        self.n_original_input_dims = n_columns;
        self.n_input_dims = n_columns + n_categorical * self.embedding_dim.saturating_sub(1);
        self.n_continuous_input_dims = n_columns.saturating_sub(n_categorical);
        self.n_output_dims = n_output_dims;
    }

    pub fn validate(&self) -> TabNetResult<()> {
        if self.n_steps == 0 {
            return Err(TabNetError::config("n_steps must be at least 1"));
        }
        if self.n_dims_d == 0 || self.n_dims_a == 0 {
            return Err(TabNetError::config("n_dims_d and n_dims_a must be positive"));
        }
        if self.embedding_dim == 0 {
            return Err(TabNetError::config("embedding_dim must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.dropout_p) {
            return Err(TabNetError::config(format!(
                "dropout_p must lie in [0, 1), got {}",
                self.dropout_p
            )));
        }
        if !(0.0..=1.0).contains(&self.batch_norm_momentum) {
            return Err(TabNetError::config(format!(
                "batch_norm_momentum must lie in [0, 1], got {}",
                self.batch_norm_momentum
            )));
        }
        Ok(())
    }
}

/// Hyperparameters of one `fit` call. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainParams {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_validation_batch_size")]
    pub validation_batch_size: usize,

    #[serde(default)]
    pub run_self_supervised_training: bool,

    #[serde(default = "default_true")]
    pub run_supervised_training: bool,

    #[serde(default = "default_true")]
    pub early_stopping: bool,

    /// Minimum relative improvement, in percent of the best value
    #[serde(default)]
    pub early_stopping_min_delta_pct: f64,

    #[serde(default = "default_patience")]
    pub early_stopping_patience: usize,

    #[serde(default = "default_max_epochs")]
    pub max_epochs_supervised: usize,

    #[serde(default = "default_max_epochs")]
    pub max_epochs_self_supervised: usize,

    #[serde(default = "default_epoch_save_frequency")]
    pub epoch_save_frequency: usize,

    #[serde(default = "default_true")]
    pub train_generator_shuffle: bool,

    /// Stabiliser inside the sparsity entropy term
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_learning_rate_decay_factor")]
    pub learning_rate_decay_factor: f64,

    /// Optimizer steps between two learning-rate decays
    #[serde(default = "default_learning_rate_decay_step_rate")]
    pub learning_rate_decay_step_rate: usize,

    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,

    #[serde(default = "default_sparsity_regularization")]
    pub sparsity_regularization: f64,

    /// Probability of hiding a feature during self-supervised training
    #[serde(default = "default_p_mask")]
    pub p_mask: f64,

    /// Seed for feature masks and batch shuffling
    #[serde(default)]
    pub seed: u64,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_true() -> bool { true }
fn default_batch_size() -> usize { 8192 }
fn default_validation_batch_size() -> usize { 1024 }
fn default_patience() -> usize { 20 }
fn default_max_epochs() -> usize { 500 }
fn default_epoch_save_frequency() -> usize { 100 }
fn default_epsilon() -> f64 { 1e-7 }
fn default_learning_rate() -> f64 { 0.01 }
fn default_learning_rate_decay_factor() -> f64 { 0.95 }
fn default_learning_rate_decay_step_rate() -> usize { 1000 }
fn default_weight_decay() -> f64 { 0.001 }
fn default_sparsity_regularization() -> f64 { 0.0001 }
fn default_p_mask() -> f64 { 0.2 }

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            validation_batch_size: default_validation_batch_size(),
            run_self_supervised_training: false,
            run_supervised_training: true,
            early_stopping: true,
            early_stopping_min_delta_pct: 0.0,
            early_stopping_patience: default_patience(),
            max_epochs_supervised: default_max_epochs(),
            max_epochs_self_supervised: default_max_epochs(),
            epoch_save_frequency: default_epoch_save_frequency(),
            train_generator_shuffle: true,
            epsilon: default_epsilon(),
            learning_rate: default_learning_rate(),
            learning_rate_decay_factor: default_learning_rate_decay_factor(),
            learning_rate_decay_step_rate: default_learning_rate_decay_step_rate(),
            weight_decay: default_weight_decay(),
            sparsity_regularization: default_sparsity_regularization(),
            p_mask: default_p_mask(),
            seed: 0,
            extra: HashMap::new(),
        }
    }
}

impl TrainParams {
    /// Merge a JSON object of overrides over the defaults.
    pub fn from_overrides(overrides: serde_json::Value) -> TabNetResult<Self> {
        merge_over_defaults(&Self::default(), overrides)
    }

    /// Reject parameter combinations that cannot train. Runs before any state changes.
    pub fn validate(&self) -> TabNetResult<()> {
        if !self.run_self_supervised_training && !self.run_supervised_training {
            return Err(TabNetError::config(
                "No training scheme defined: set `run_self_supervised_training` or `run_supervised_training` to true",
            ));
        }
        if !(0.0..=1.0).contains(&self.p_mask) {
            return Err(TabNetError::config(format!(
                "p_mask must lie in [0, 1], got {}",
                self.p_mask
            )));
        }
        if self.batch_size == 0 || self.validation_batch_size == 0 {
            return Err(TabNetError::config("batch sizes must be positive"));
        }
        if self.learning_rate_decay_step_rate == 0 {
            return Err(TabNetError::config(
                "learning_rate_decay_step_rate must be positive",
            ));
        }
        Ok(())
    }
}

/// Where checkpoints go and how they are named
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveParams {
    pub model_name: String,
    pub save_folder: std::path::PathBuf,
}

impl Default for SaveParams {
    fn default() -> Self {
        let checkpoint = &settings().checkpoint;
        Self {
            model_name: checkpoint.model_name.clone(),
            save_folder: checkpoint.save_folder.clone(),
        }
    }
}

impl SaveParams {
    pub fn new(model_name: impl Into<String>, save_folder: impl Into<std::path::PathBuf>) -> Self {
        Self {
            model_name: model_name.into(),
            save_folder: save_folder.into(),
        }
    }
}

fn merge_over_defaults<T>(defaults: &T, overrides: serde_json::Value) -> TabNetResult<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    let mut merged = serde_json::to_value(defaults)
        .map_err(|e| TabNetError::config(format!("cannot serialize defaults: {e}")))?;
    let overrides = match overrides {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            return Err(TabNetError::config(format!(
                "parameter overrides must be a JSON object, got {other}"
            )))
        }
    };
    if let serde_json::Value::Object(target) = &mut merged {
        for (key, value) in overrides {
            target.insert(key, value);
        }
    }
    serde_json::from_value(merged).map_err(|e| TabNetError::config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_model_params() {
        let params = ModelParams::default();
        assert_eq!(params.n_steps, 5);
        assert_eq!(params.n_dims_d, 16);
        assert_eq!(params.n_dims_a, 16);
        assert_eq!(params.batch_norm_momentum, 0.85);
        assert_eq!(params.dropout_p, 0.3);
        assert_eq!(params.gamma, 1.5);
        assert_eq!(params.embedding_dim, 2);
        assert!(!params.discrete_outputs);
        assert_eq!(params.mask_type, MaskActivation::Sparsemax);
        assert!(!params.is_fitted());
    }

    #[test]
    fn test_default_train_params() {
        let params = TrainParams::default();
        assert_eq!(params.batch_size, 8192);
        assert_eq!(params.validation_batch_size, 1024);
        assert!(!params.run_self_supervised_training);
        assert!(params.run_supervised_training);
        assert!(params.early_stopping);
        assert_eq!(params.early_stopping_patience, 20);
        assert_eq!(params.max_epochs_supervised, 500);
        assert_eq!(params.max_epochs_self_supervised, 500);
        assert_eq!(params.epoch_save_frequency, 100);
        assert_eq!(params.learning_rate, 0.01);
        assert_eq!(params.learning_rate_decay_factor, 0.95);
        assert_eq!(params.learning_rate_decay_step_rate, 1000);
        assert_eq!(params.weight_decay, 0.001);
        assert_eq!(params.sparsity_regularization, 0.0001);
        assert_eq!(params.p_mask, 0.2);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_overrides_merge_and_keep_unknown_keys() {
        let params = TrainParams::from_overrides(json!({
            "batch_size": 64,
            "run_self_supervised_training": true,
            "legacy_option": "kept"
        }))
        .unwrap();

        assert_eq!(params.batch_size, 64);
        assert!(params.run_self_supervised_training);
        assert_eq!(params.validation_batch_size, 1024);
        assert_eq!(params.extra.get("legacy_option"), Some(&json!("kept")));

        let model = ModelParams::from_overrides(json!({"n_steps": 3, "mask_type": "softmax"})).unwrap();
        assert_eq!(model.n_steps, 3);
        assert_eq!(model.mask_type, MaskActivation::Softmax);
        assert!(ModelParams::from_overrides(json!([1, 2])).is_err());
    }

    #[test]
    fn test_validate_rejects_untrainable_params() {
        let mut params = TrainParams::default();
        params.run_supervised_training = false;
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("No training scheme defined"));

        let mut params = TrainParams::default();
        params.p_mask = 1.5;
        assert!(params.validate().is_err());

        let mut params = TrainParams::default();
        params.batch_size = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_category_map_orders_numbers_numerically() {
        let map = CategoryMap::from_values(["10", "2", "2", "1"]);
        assert_eq!(map.categories(), vec!["1", "2", "10"]);
        assert_eq!(map.ordinal("10"), Some(2));
        assert_eq!(map.category(1), Some("2"));

        let map = CategoryMap::from_values(["b", "a", "c", "a"]);
        assert_eq!(map.categories(), vec!["a", "b", "c"]);
        assert_eq!(map.ordinal("z"), None);
    }

    #[test]
    fn test_derive_dimensions() {
        let mut params = ModelParams {
            embedding_dim: 3,
            ..Default::default()
        };
        params.categorical_config = vec![CategoricalColumnConfig {
            identifier: "color".to_string(),
            idx: 1,
            n_dims: 4,
            map: CategoryMap::from_values(["r", "g", "b", "y"]),
        }];
        params.derive_dimensions(5, 3);

        assert_eq!(params.n_original_input_dims, 5);
        assert_eq!(params.n_input_dims, 7);
        assert_eq!(params.n_continuous_input_dims, 4);
        assert_eq!(params.n_output_dims, 3);
        assert!(params.is_fitted());
    }

    #[test]
    fn test_model_params_json_roundtrip_keeps_extra() {
        let params = ModelParams::from_overrides(json!({"virtual_batch_size": 128})).unwrap();
        let json = serde_json::to_string(&params).unwrap();
        let restored: ModelParams = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, params);
        assert_eq!(restored.extra.get("virtual_batch_size"), Some(&json!(128)));
    }
}
