/// Checkpoint persistence tests
///
/// A saved (parameters, weights) pair must reload into a model with identical
/// predictions; unreadable files must surface typed errors and leave the
/// estimator on a fresh model.

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::TempDir;

use tabnet_rs::tabnet::architectures::base::checkpoint;
use tabnet_rs::test_utils::{cover_table, quick_train_params, small_model_params};
use tabnet_rs::{CheckpointError, ModelParams, SaveParams, TabNet, TabularInput, TargetInput};

type TestBackend = Autodiff<NdArray<f32>>;

/// On-disk layout of a checkpoint file
#[derive(Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    model_params: String,
    weight_shapes: Vec<Vec<usize>>,
    weights: Vec<u8>,
}

fn fitted_estimator(dir: &TempDir) -> (TabNet<TestBackend>, TabularInput) {
    let (x, y) = cover_table(40, 31);
    let x: TabularInput = x.into();
    let mut estimator = TabNet::<TestBackend>::new(small_model_params(true, &["soil"]), Default::default());
    estimator
        .fit(&x, &TargetInput::Labels(y), None, &quick_train_params(2), &SaveParams::new("roundtrip", dir.path()))
        .unwrap();
    (estimator, x)
}

#[test]
fn test_reloaded_model_predicts_identically() {
    let dir = TempDir::new().unwrap();
    let (estimator, x) = fitted_estimator(&dir);
    let path = estimator.last_checkpoint().expect("final checkpoint").to_path_buf();

    let restored = TabNet::<TestBackend>::from_checkpoint(ModelParams::default(), Default::default(), &path);
    assert!(restored.model().is_some());
    assert_eq!(restored.model_params(), estimator.model_params());
    assert_eq!(restored.last_checkpoint(), Some(path.as_path()));

    let before = estimator.predict_proba(&x, 16).unwrap();
    let after = restored.predict_proba(&x, 16).unwrap();
    assert_eq!(before.columns, after.columns);
    for (a, b) in before.values.iter().zip(after.values.iter()) {
        assert!((a - b).abs() < 1e-6, "{a} != {b}");
    }
    assert_eq!(estimator.predict(&x, 16).unwrap(), restored.predict(&x, 16).unwrap());
}

#[test]
fn test_unknown_parameter_keys_survive_checkpoints() {
    let dir = TempDir::new().unwrap();
    let (x, y) = cover_table(20, 3);
    let mut params = ModelParams::from_overrides(json!({
        "n_steps": 2,
        "n_dims_d": 4,
        "n_dims_a": 4,
        "discrete_outputs": true,
        "categorical_variables": ["soil"],
        "legacy_option": {"enabled": true}
    }))
    .unwrap();
    params.dropout_p = 0.0;
    assert_eq!(params.extra.get("legacy_option"), Some(&json!({"enabled": true})));

    let mut estimator = TabNet::<TestBackend>::new(params, Default::default());
    estimator
        .fit(&x.into(), &TargetInput::Labels(y), None, &quick_train_params(1), &SaveParams::new("extra", dir.path()))
        .unwrap();

    let path = estimator.last_checkpoint().unwrap();
    let (loaded, _) = checkpoint::load::<TestBackend>(path, &Default::default()).unwrap();
    assert_eq!(loaded.extra.get("legacy_option"), Some(&json!({"enabled": true})));
    assert_eq!(loaded.n_steps, 2);
}

#[test]
fn test_missing_checkpoint_is_not_found() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nothing_here.bin");

    let err = checkpoint::load::<TestBackend>(&path, &Default::default()).unwrap_err();
    assert!(matches!(err, CheckpointError::NotFound(_)));
    assert!(err.is_recoverable());

    let fallback = TabNet::<TestBackend>::from_checkpoint(small_model_params(true, &[]), Default::default(), &path);
    assert!(fallback.model().is_none());
    assert!(fallback.last_checkpoint().is_none());
    assert_eq!(fallback.model_params(), &small_model_params(true, &[]));
}

#[test]
fn test_garbage_and_truncated_files_are_corrupt() {
    let dir = TempDir::new().unwrap();
    let garbage = dir.path().join("garbage.bin");
    std::fs::write(&garbage, b"definitely not a checkpoint").unwrap();

    let err = checkpoint::load::<TestBackend>(&garbage, &Default::default()).unwrap_err();
    assert!(matches!(err, CheckpointError::Corrupt { .. }), "{err}");
    assert!(err.to_string().contains("not correctly formatted"));

    let (estimator, _) = fitted_estimator(&dir);
    let bytes = std::fs::read(estimator.last_checkpoint().unwrap()).unwrap();
    let truncated = dir.path().join("truncated.bin");
    std::fs::write(&truncated, &bytes[..bytes.len() / 2]).unwrap();

    let err = checkpoint::load::<TestBackend>(&truncated, &Default::default()).unwrap_err();
    assert!(matches!(err, CheckpointError::Corrupt { .. }), "{err}");

    let fallback = TabNet::<TestBackend>::from_checkpoint(ModelParams::default(), Default::default(), &truncated);
    assert!(fallback.model().is_none());
    assert!(!fallback.model_params().is_fitted());
}

#[test]
fn test_params_that_do_not_fit_the_weights_are_corrupt() {
    let dir = TempDir::new().unwrap();
    let (estimator, x) = fitted_estimator(&dir);
    let bytes = std::fs::read(estimator.last_checkpoint().unwrap()).unwrap();

    let mut envelope: Envelope = bincode::deserialize(&bytes).unwrap();
    let mut params: Value = serde_json::from_str(&envelope.model_params).unwrap();
    params["n_dims_d"] = json!(8);
    params["n_dims_a"] = json!(8);
    envelope.model_params = params.to_string();
    let widened = dir.path().join("widened.bin");
    std::fs::write(&widened, bincode::serialize(&envelope).unwrap()).unwrap();

    let err = checkpoint::load::<TestBackend>(&widened, &Default::default()).unwrap_err();
    assert!(matches!(err, CheckpointError::Corrupt { .. }), "{err}");
    assert!(err.is_recoverable());

    let fallback = TabNet::<TestBackend>::from_checkpoint(ModelParams::default(), Default::default(), &widened);
    assert!(fallback.model().is_none());
    assert!(fallback.last_checkpoint().is_none());
    assert!(fallback.predict(&x, 16).is_err());
}
