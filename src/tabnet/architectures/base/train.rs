//! Two-phase training loop.
//!
//! A [`Trainer`] runs the enabled phases in order on one model: optional
//! self-supervised pretraining (masked feature reconstruction) followed by
//! supervised training. Each phase gets a fresh AdamW optimizer at the base
//! learning rate; the global step counter lives in the [`TrainingSession`] and
//! carries across phases so learning-rate decay stays on a single cadence.

use burn::{
    module::{AutodiffModule, Module},
    optim::{AdamWConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

use super::checkpoint::{self, CheckpointLabel};
use super::config::{ModelParams, SaveParams, TrainParams};
use super::data::TrainingDataset;
use super::early_stopping::{BestModelTracker, EarlyStopping};
use super::loss_utils::LossComposer;
use super::masking::{ones_mask, FeatureMasker, MaskLayout};
use super::model::TabNetModel;
use super::validation::{evaluate_supervised, validation_reconstruct_loss, SupervisedValidation};
use crate::tabnet::error::TabNetResult;
use crate::tabnet::metrics::MetricSink;

/// Training regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrainingPhase {
    /// Reconstruct randomly hidden features
    SelfSupervised,
    /// Predict the target
    Supervised,
}

impl TrainingPhase {
    pub fn checkpoint_stub(&self) -> &'static str {
        match self {
            Self::SelfSupervised => "self_supervised_model",
            Self::Supervised => "predictive_model",
        }
    }

    /// Prefix of every metric emitted during the phase
    pub fn metric_prefix(&self) -> &'static str {
        match self {
            Self::SelfSupervised => "Self-supervised",
            Self::Supervised => "Predictive",
        }
    }

    pub fn max_epochs(&self, params: &TrainParams) -> usize {
        match self {
            Self::SelfSupervised => params.max_epochs_self_supervised,
            Self::Supervised => params.max_epochs_supervised,
        }
    }

    /// Phases enabled by `params`, in execution order
    pub fn enabled(params: &TrainParams) -> Vec<Self> {
        let mut phases = Vec::with_capacity(2);
        if params.run_self_supervised_training {
            phases.push(Self::SelfSupervised);
        }
        if params.run_supervised_training {
            phases.push(Self::Supervised);
        }
        phases
    }
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfSupervised => write!(f, "self_supervised"),
            Self::Supervised => write!(f, "supervised"),
        }
    }
}

/// Multiplicative learning-rate decay on multiples of a global step interval
#[derive(Debug, Clone, Copy)]
pub struct StepDecay {
    lr: f64,
    factor: f64,
    step_rate: usize,
}

impl StepDecay {
    pub fn new(base_lr: f64, factor: f64, step_rate: usize) -> Self {
        Self {
            lr: base_lr,
            factor,
            step_rate,
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Called after the optimizer step numbered `global_step`; returns the new rate when it decayed.
    pub fn on_step(&mut self, global_step: usize) -> Option<f64> {
        if self.step_rate == 0 || global_step % self.step_rate != 0 {
            return None;
        }
        self.lr *= self.factor;
        Some(self.lr)
    }
}

/// Validation outcome of one epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationReport {
    Reconstruction { loss: f64 },
    Supervised(SupervisedValidation),
}

impl ValidationReport {
    /// Value monitored for best-model selection and early stopping
    pub fn criterion(&self) -> f64 {
        match self {
            Self::Reconstruction { loss } => *loss,
            Self::Supervised(v) => v.criterion,
        }
    }
}

/// Summary of one training epoch
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub phase: TrainingPhase,
    pub epoch: usize,
    /// Global step counter after the epoch's last batch
    pub global_step: usize,
    /// Mean total loss over the epoch's batches
    pub train_loss: f64,
    /// Learning rate in effect at the end of the epoch
    pub learning_rate: f64,
    pub validation: Option<ValidationReport>,
}

/// State that outlives a single phase
#[derive(Debug, Clone, Default)]
pub struct TrainingSession {
    global_step: usize,
    history: Vec<EpochReport>,
}

impl TrainingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn history(&self) -> &[EpochReport] {
        &self.history
    }

    pub fn into_history(self) -> Vec<EpochReport> {
        self.history
    }
}

/// Why a phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseExit {
    BudgetExhausted,
    EarlyStopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSummary {
    pub phase: TrainingPhase,
    pub epochs_run: usize,
    pub exit: PhaseExit,
    /// Lowest validation criterion seen, if validation ran
    pub best_criterion: Option<f64>,
    pub final_checkpoint: PathBuf,
}

#[derive(Debug)]
pub struct PhaseOutcome<B: AutodiffBackend> {
    pub model: TabNetModel<B>,
    pub summary: PhaseSummary,
}

/// Drives the phases of one `fit` call.
pub struct Trainer<'a, B: AutodiffBackend> {
    model_params: &'a ModelParams,
    train_params: &'a TrainParams,
    save_params: &'a SaveParams,
    train_data: &'a TrainingDataset,
    validation: Option<&'a TrainingDataset>,
    metrics: &'a mut dyn MetricSink,
    masker: FeatureMasker,
    shuffle_rng: StdRng,
    device: B::Device,
}

impl<'a, B: AutodiffBackend> Trainer<'a, B> {
    pub fn new(
        model_params: &'a ModelParams,
        train_params: &'a TrainParams,
        save_params: &'a SaveParams,
        train_data: &'a TrainingDataset,
        validation: Option<&'a TrainingDataset>,
        metrics: &'a mut dyn MetricSink,
        device: &B::Device,
    ) -> Self {
        Self {
            model_params,
            train_params,
            save_params,
            train_data,
            validation,
            metrics,
            masker: FeatureMasker::new(MaskLayout::from_params(model_params), train_params.seed),
            shuffle_rng: StdRng::seed_from_u64(train_params.seed.wrapping_add(1)),
            device: device.clone(),
        }
    }

    /// Run every enabled phase in order, threading the model through them.
    pub fn run(
        &mut self,
        session: &mut TrainingSession,
        model: TabNetModel<B>,
    ) -> TabNetResult<(TabNetModel<B>, Vec<PhaseSummary>)> {
        let mut model = model;
        let mut summaries = Vec::new();
        for phase in TrainingPhase::enabled(self.train_params) {
            let outcome = self.run_phase(session, model, phase)?;
            model = outcome.model;
            summaries.push(outcome.summary);
        }
        Ok((model, summaries))
    }

    /// Train `model` for one phase.
    ///
    /// With validation data, the weights of the best validation epoch are
    /// restored when early stopping fires and again when the budget runs out.
    /// A `final` checkpoint is written in every case.
    pub fn run_phase(
        &mut self,
        session: &mut TrainingSession,
        model: TabNetModel<B>,
        phase: TrainingPhase,
    ) -> TabNetResult<PhaseOutcome<B>> {
        let params = self.train_params;
        let train_data = self.train_data;
        let device = self.device.clone();
        let max_epochs = phase.max_epochs(params);

        let mut model = model;
        let mut optimizer = AdamWConfig::new()
            .with_weight_decay(params.weight_decay as f32)
            .init::<B, TabNetModel<B>>();
        let mut schedule = StepDecay::new(
            params.learning_rate,
            params.learning_rate_decay_factor,
            params.learning_rate_decay_step_rate,
        );
        let composer = LossComposer::new(params.sparsity_regularization, params.epsilon);
        let mut early_stopping = params.early_stopping.then(|| {
            EarlyStopping::percentage(params.early_stopping_min_delta_pct, params.early_stopping_patience)
        });
        let mut best = BestModelTracker::new();
        let mut exit = PhaseExit::BudgetExhausted;
        let mut epochs_run = 0;

        info!(%phase, max_epochs, rows = train_data.len(), "Starting training phase");

        for epoch in 0..max_epochs {
            let shuffle = params.train_generator_shuffle.then_some(&mut self.shuffle_rng);
            let mut batch_losses = Vec::new();

            for batch in train_data.batches::<B>(params.batch_size, shuffle, &device) {
                session.global_step += 1;
                let n = batch.len();

                let loss = match phase {
                    TrainingPhase::SelfSupervised => {
                        let mask = self.masker.generate_mask::<B>(params.p_mask, n, &device);
                        let output = model.forward(batch.continuous, batch.categorical, mask.clone(), true);
                        composer.self_supervised(output, mask)
                    }
                    TrainingPhase::Supervised => {
                        let mask = ones_mask::<B>(n, model.n_input_dims(), &device);
                        let output = model.forward(batch.continuous, batch.categorical, mask, false);
                        composer.supervised(output, batch.targets)
                    }
                };

                batch_losses.push(loss.total.clone().into_scalar().elem::<f64>());
                let grads = GradientsParams::from_grads(loss.total.backward(), &model);
                model = optimizer.step(schedule.lr(), model, grads);

                if let Some(lr) = schedule.on_step(session.global_step) {
                    info!(step = session.global_step, learning_rate = lr, "Decaying learning rate");
                }
            }
            epochs_run = epoch + 1;

            if epoch > 0 && params.epoch_save_frequency > 0 && epoch % params.epoch_save_frequency == 0 {
                self.checkpoint(&model, phase, CheckpointLabel::Epoch(epoch))?;
            }

            let validation = self.validation.map(|data| self.validate(&model, data, phase));
            let report = EpochReport {
                phase,
                epoch,
                global_step: session.global_step,
                train_loss: mean(&batch_losses),
                learning_rate: schedule.lr(),
                validation,
            };
            self.log_epoch(&report);
            session.history.push(report);

            let Some(validation) = validation else {
                continue;
            };
            let criterion = validation.criterion();
            if best.observe(criterion, epoch, || model.clone().into_record()) {
                debug!(%phase, epoch, criterion, "New best validation criterion");
            }

            let stop = early_stopping
                .as_mut()
                .map(|tracker| tracker.step(criterion))
                .unwrap_or(false);
            if stop {
                if let Some(record) = best.take_snapshot() {
                    model = model.load_record(record);
                }
                info!(
                    %phase,
                    epoch,
                    best_criterion = best.best_criterion().unwrap_or(f64::NAN),
                    "Early stopping criterion met, using best weights"
                );
                exit = PhaseExit::EarlyStopped;
                break;
            }
        }

        if let Some(record) = best.take_snapshot() {
            model = model.load_record(record);
        }
        let final_checkpoint = self.checkpoint(&model, phase, CheckpointLabel::Final)?;

        Ok(PhaseOutcome {
            model,
            summary: PhaseSummary {
                phase,
                epochs_run,
                exit,
                best_criterion: best.best_criterion(),
                final_checkpoint,
            },
        })
    }

    fn validate(&mut self, model: &TabNetModel<B>, data: &TrainingDataset, phase: TrainingPhase) -> ValidationReport {
        let inference = model.valid();
        let batch_size = self.train_params.validation_batch_size;
        match phase {
            TrainingPhase::SelfSupervised => ValidationReport::Reconstruction {
                loss: validation_reconstruct_loss(
                    &inference,
                    data,
                    batch_size,
                    &mut self.masker,
                    self.train_params.p_mask,
                    &self.device,
                ),
            },
            TrainingPhase::Supervised => ValidationReport::Supervised(evaluate_supervised(
                &inference,
                data,
                batch_size,
                &self.device,
            )),
        }
    }

    fn checkpoint(&self, model: &TabNetModel<B>, phase: TrainingPhase, label: CheckpointLabel) -> TabNetResult<PathBuf> {
        Ok(checkpoint::save(self.save_params, self.model_params, model, phase, label)?)
    }

    fn log_epoch(&mut self, report: &EpochReport) {
        let prefix = report.phase.metric_prefix();
        let step = report.epoch;
        self.metrics.record(&format!("{prefix}/train loss"), step, report.train_loss);
        self.metrics.record(&format!("{prefix}/learning rate"), step, report.learning_rate);

        match report.validation {
            None => info!(
                phase = %report.phase,
                epoch = report.epoch + 1,
                step = report.global_step,
                train_loss = report.train_loss,
                "Epoch complete"
            ),
            Some(ValidationReport::Reconstruction { loss }) => {
                self.metrics.record(&format!("{prefix}/validation reconstruction loss"), step, loss);
                info!(
                    phase = %report.phase,
                    epoch = report.epoch + 1,
                    step = report.global_step,
                    train_loss = report.train_loss,
                    validation_reconstruction_loss = loss,
                    "Epoch complete"
                );
            }
            Some(ValidationReport::Supervised(validation)) => {
                self.metrics.record(&format!("{prefix}/validation criterion loss"), step, validation.criterion);
                self.metrics.record(
                    &format!("{prefix}/{}", validation.metric.name()),
                    step,
                    validation.metric.value(),
                );
                info!(
                    phase = %report.phase,
                    epoch = report.epoch + 1,
                    step = report.global_step,
                    train_loss = report.train_loss,
                    validation_criterion_loss = validation.criterion,
                    metric = validation.metric.name(),
                    metric_value = validation.metric.value(),
                    "Epoch complete"
                );
            }
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
