//! tabnet-rs demo: pretrains and trains a small classifier on a synthetic
//! cover-type table, then prints a few predictions.

use tabnet_rs::tabnet::architectures::estimator::{CpuAutodiffBackend, Predictions, TabNet};
use tabnet_rs::test_utils::{cover_table, small_model_params};
use tabnet_rs::{settings, SaveParams, TabNetResult, TabularInput, TargetInput, TrainParams};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> TabNetResult<()> {
    let config = settings();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .init();

    info!(save_folder = %config.checkpoint.save_folder.display(), "tabnet-rs starting");

    let (x_train, y_train) = cover_table(600, 1);
    let (x_val, y_val) = cover_table(150, 2);
    let (x_train, x_val): (TabularInput, TabularInput) = (x_train.into(), x_val.into());
    let (y_train, y_val) = (TargetInput::Labels(y_train), TargetInput::Labels(y_val));

    let train_params = TrainParams {
        batch_size: 128,
        validation_batch_size: 256,
        run_self_supervised_training: true,
        max_epochs_self_supervised: 5,
        max_epochs_supervised: 20,
        early_stopping_patience: 5,
        learning_rate_decay_step_rate: 50,
        ..TrainParams::default()
    };

    let mut estimator = TabNet::<CpuAutodiffBackend>::new(small_model_params(true, &["soil"]), Default::default());
    let report = estimator.fit(
        &x_train,
        &y_train,
        Some((&x_val, &y_val)),
        &train_params,
        &SaveParams::default(),
    )?;
    for phase in &report.phases {
        info!(
            phase = %phase.phase,
            epochs = phase.epochs_run,
            exit = ?phase.exit,
            best_criterion = phase.best_criterion.unwrap_or(f64::NAN),
            checkpoint = %phase.final_checkpoint.display(),
            "Phase finished"
        );
    }

    if let Predictions::Labels(labels) = estimator.predict(&x_val, 256)? {
        let TargetInput::Labels(truth) = &y_val else {
            return Ok(());
        };
        let correct = labels.iter().zip(truth).filter(|(p, t)| p == t).count();
        info!(
            accuracy = correct as f64 / truth.len() as f64,
            sample = ?&labels[..labels.len().min(5)],
            "Validation predictions"
        );
    }

    Ok(())
}
