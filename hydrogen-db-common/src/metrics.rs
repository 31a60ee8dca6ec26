//! Minimal in-process metrics sink (SPEC_FULL.md "Metrics (carried, not
//! expanded)"). Grounded on `syncserver-common::Metrics`, but without a
//! statsd wire sink — the spec defines no metrics backend, only the need
//! for call sites to have somewhere to record queue depth and timing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Counters {
    counts: HashMap<String, u64>,
    timings: HashMap<String, Duration>,
}

/// Cheaply `Clone`-able handle shared by the queue, pool, and adapter
/// layers. All mutation goes through an `Arc<Mutex<_>>`, mirroring how the
/// teacher's `Metrics` wraps a shared `StatsdClient`.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<Mutex<Counters>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, label: &str) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        *inner.counts.entry(label.to_owned()).or_insert(0) += 1;
    }

    pub fn record_timing(&self, label: &str, elapsed: Duration) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        inner.timings.insert(label.to_owned(), elapsed);
    }

    pub fn count(&self, label: &str) -> u64 {
        self.inner
            .lock()
            .expect("metrics mutex poisoned")
            .counts
            .get(label)
            .copied()
            .unwrap_or(0)
    }

    pub fn start_timer(&self, label: &str) -> MetricTimerGuard {
        MetricTimerGuard {
            metrics: self.clone(),
            label: label.to_owned(),
            start: Instant::now(),
        }
    }
}

/// Records elapsed time on drop, the way the teacher's `MetricTimer` does
/// via `Metrics`'s `Drop` impl.
pub struct MetricTimerGuard {
    metrics: Metrics,
    label: String,
    start: Instant,
}

impl Drop for MetricTimerGuard {
    fn drop(&mut self) {
        self.metrics.record_timing(&self.label, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incr_accumulates_per_label() {
        let metrics = Metrics::new();
        metrics.incr("queue.dequeue");
        metrics.incr("queue.dequeue");
        metrics.incr("queue.enqueue");
        assert_eq!(metrics.count("queue.dequeue"), 2);
        assert_eq!(metrics.count("queue.enqueue"), 1);
    }
}
