//! Validation-driven stopping and best-weights tracking.

use tracing::debug;

/// How `min_delta` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaMode {
    /// `min_delta` is a percentage of the best value
    Percentage,
    /// `min_delta` is an absolute difference
    Absolute,
}

/// Patience-based stopping on a criterion where lower is better.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    min_delta: f64,
    patience: usize,
    mode: DeltaMode,
    best: Option<f64>,
    num_bad_steps: usize,
}

impl EarlyStopping {
    pub fn new(min_delta: f64, patience: usize, mode: DeltaMode) -> Self {
        Self {
            min_delta,
            patience,
            mode,
            best: None,
            num_bad_steps: 0,
        }
    }

    pub fn percentage(min_delta_pct: f64, patience: usize) -> Self {
        Self::new(min_delta_pct, patience, DeltaMode::Percentage)
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    fn is_improvement(&self, value: f64, best: f64) -> bool {
        match self.mode {
            DeltaMode::Percentage => value < best - best.abs() * self.min_delta / 100.0,
            DeltaMode::Absolute => value < best - self.min_delta,
        }
    }

    /// Feed one criterion value; returns true when training should stop.
    ///
    /// The first value only seeds the best. A NaN value stops immediately.
    /// `patience == 0` never stops.
    pub fn step(&mut self, value: f64) -> bool {
        let Some(best) = self.best else {
            self.best = Some(value);
            return false;
        };
        if self.patience == 0 {
            return false;
        }
        if value.is_nan() {
            return true;
        }

        if self.is_improvement(value, best) {
            self.best = Some(value);
            self.num_bad_steps = 0;
        } else {
            self.num_bad_steps += 1;
            debug!(
                bad_steps = self.num_bad_steps,
                patience = self.patience,
                "criterion did not improve"
            );
        }

        self.num_bad_steps >= self.patience
    }
}

/// Keeps the weights of the best validation epoch.
///
/// `R` is the snapshot type, normally the model record. A value replaces the
/// snapshot when it is at most the running best or the running best is NaN;
/// a NaN value never displaces a finite best.
#[derive(Debug)]
pub struct BestModelTracker<R> {
    best_criterion: f64,
    best_epoch: Option<usize>,
    snapshot: Option<R>,
}

impl<R> Default for BestModelTracker<R> {
    fn default() -> Self {
        Self {
            best_criterion: f64::NAN,
            best_epoch: None,
            snapshot: None,
        }
    }
}

impl<R> BestModelTracker<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `criterion` for `epoch`, taking a snapshot when it is a new best.
    pub fn observe(&mut self, criterion: f64, epoch: usize, snapshot: impl FnOnce() -> R) -> bool {
        let improved = self.best_criterion.is_nan() || criterion <= self.best_criterion;
        if improved {
            self.best_criterion = criterion;
            self.best_epoch = Some(epoch);
            self.snapshot = Some(snapshot());
        }
        improved
    }

    /// Best criterion seen, `None` before the first observation
    pub fn best_criterion(&self) -> Option<f64> {
        self.best_epoch.map(|_| self.best_criterion)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Hand over the snapshot for restoring; subsequent calls return `None`.
    pub fn take_snapshot(&mut self) -> Option<R> {
        self.snapshot.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_improving_sequence_never_stops() {
        let mut es = EarlyStopping::percentage(0.0, 2);
        for value in [10.0, 9.0, 8.0, 7.5, 7.0, 1.0] {
            assert!(!es.step(value));
        }
        assert_eq!(es.best(), Some(1.0));
    }

    #[test]
    fn test_flat_sequence_stops_at_patience_plus_one() {
        let patience = 3;
        let mut es = EarlyStopping::percentage(0.0, patience);
        let stops: Vec<bool> = (0..patience + 1).map(|_| es.step(5.0)).collect();
        assert_eq!(stops, vec![false, false, false, true]);
    }

    #[test]
    fn test_percentage_delta() {
        let mut es = EarlyStopping::percentage(10.0, 1);
        assert!(!es.step(100.0));
        // 95 is not below 100 - 10% = 90
        assert!(es.step(95.0));

        let mut es = EarlyStopping::percentage(10.0, 1);
        es.step(100.0);
        assert!(!es.step(89.0));
    }

    #[test]
    fn test_absolute_delta() {
        let mut es = EarlyStopping::new(0.5, 1, DeltaMode::Absolute);
        es.step(2.0);
        assert!(es.step(1.6));
    }

    #[test]
    fn test_nan_stops_and_zero_patience_never_stops() {
        let mut es = EarlyStopping::percentage(0.0, 5);
        es.step(1.0);
        assert!(es.step(f64::NAN));

        let mut es = EarlyStopping::percentage(0.0, 0);
        for _ in 0..10 {
            assert!(!es.step(1.0));
        }
    }

    #[test]
    fn test_best_tracker_keeps_minimum() {
        let mut tracker = BestModelTracker::new();
        assert!(tracker.observe(3.0, 0, || "epoch 0"));
        assert!(!tracker.observe(4.0, 1, || "epoch 1"));
        assert!(tracker.observe(3.0, 2, || "epoch 2"));
        assert!(!tracker.observe(f64::NAN, 3, || "epoch 3"));

        assert_eq!(tracker.best_criterion(), Some(3.0));
        assert_eq!(tracker.best_epoch(), Some(2));
        assert_eq!(tracker.take_snapshot(), Some("epoch 2"));
        assert_eq!(tracker.take_snapshot(), None);
    }

    #[test]
    fn test_best_tracker_replaces_nan_best() {
        let mut tracker = BestModelTracker::new();
        assert!(tracker.observe(f64::NAN, 0, || 0));
        assert!(tracker.observe(7.0, 1, || 1));
        assert_eq!(tracker.best_criterion(), Some(7.0));
    }
}
