/// Learning-rate decay across phases
///
/// The decay counter is the global optimizer step, shared by both phases, so
/// supervised training continues the cadence where pretraining left off even
/// though it starts from the base rate with a fresh optimizer.

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use tempfile::TempDir;

use tabnet_rs::tabnet::architectures::base::train::TrainingPhase;
use tabnet_rs::test_utils::{quick_train_params, regression_array, small_model_params};
use tabnet_rs::{SaveParams, TabNet, TabularInput, TargetInput, TrainParams};

type TestBackend = Autodiff<NdArray<f32>>;

#[test]
fn test_decay_cadence_is_contiguous_across_phases() {
    let dir = TempDir::new().unwrap();
    // 12 rows in batches of 4: three optimizer steps per epoch
    let (x, y) = regression_array(12, 3, 8);
    let (x, y) = (TabularInput::Array(x), TargetInput::Values(y));

    let train_params = TrainParams {
        batch_size: 4,
        run_self_supervised_training: true,
        max_epochs_self_supervised: 1,
        max_epochs_supervised: 1,
        learning_rate: 0.01,
        learning_rate_decay_factor: 0.5,
        learning_rate_decay_step_rate: 2,
        ..quick_train_params(1)
    };
    let mut estimator = TabNet::<TestBackend>::new(small_model_params(false, &[]), Default::default());
    let report = estimator
        .fit(&x, &y, None, &train_params, &SaveParams::new("lr", dir.path()))
        .unwrap();

    assert_eq!(report.global_step, 6);
    assert_eq!(report.history.len(), 2);

    let pretraining = &report.history[0];
    assert_eq!(pretraining.phase, TrainingPhase::SelfSupervised);
    assert_eq!(pretraining.global_step, 3);
    // decayed once, at step 2
    assert!((pretraining.learning_rate - 0.005).abs() < 1e-12);

    let supervised = &report.history[1];
    assert_eq!(supervised.phase, TrainingPhase::Supervised);
    assert_eq!(supervised.global_step, 6);
    // fresh base rate, decayed at global steps 4 and 6
    assert!((supervised.learning_rate - 0.0025).abs() < 1e-12);
}

#[test]
fn test_no_decay_before_first_multiple() {
    let dir = TempDir::new().unwrap();
    let (x, y) = regression_array(8, 2, 2);
    let (x, y) = (TabularInput::Array(x), TargetInput::Values(y));

    let train_params = TrainParams {
        batch_size: 4,
        learning_rate: 0.02,
        learning_rate_decay_step_rate: 1000,
        ..quick_train_params(3)
    };
    let mut estimator = TabNet::<TestBackend>::new(small_model_params(false, &[]), Default::default());
    let report = estimator
        .fit(&x, &y, None, &train_params, &SaveParams::new("lr", dir.path()))
        .unwrap();

    assert!(report.history.iter().all(|epoch| epoch.learning_rate == 0.02));
}
