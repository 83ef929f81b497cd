//! Metric sinks for per-epoch training scalars.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Receives named scalar metrics keyed by epoch.
pub trait MetricSink: Send {
    fn record(&mut self, name: &str, step: usize, value: f64);
}

/// Emits every metric as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricSink;

impl MetricSink for TracingMetricSink {
    fn record(&mut self, name: &str, step: usize, value: f64) {
        tracing::info!(metric = name, step, value, "metric");
    }
}

/// In-memory metric store. Clones share the same history.
#[derive(Debug, Default, Clone)]
pub struct MetricHistory {
    inner: Arc<Mutex<BTreeMap<String, Vec<(usize, f64)>>>>,
}

impl MetricHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All values recorded under `name`, in recording order.
    pub fn series(&self, name: &str) -> Vec<(usize, f64)> {
        match self.inner.lock() {
            Ok(map) => map.get(name).cloned().unwrap_or_default(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned().unwrap_or_default(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(map) => map.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        }
    }
}

impl MetricSink for MetricHistory {
    fn record(&mut self, name: &str, step: usize, value: f64) {
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(name.to_string()).or_default().push((step, value));
    }
}
