//! Latency metrics
//!
//! Fixed-bucket histograms that can be recorded from any thread without
//! locking. Histograms are registered by name in a shared [`MetricRegistry`];
//! the registry lock is only taken when a handle is created, never on the
//! recording path.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bounds (inclusive) of the histogram buckets. The last slot counts
/// everything above the final bound.
const BUCKET_BOUNDS: [u64; 14] = [
    50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000, 1_000_000,
    10_000_000,
];

/// A lock-free histogram of recorded values.
#[derive(Debug)]
pub struct Histogram {
    name: String,
    counts: [AtomicU64; BUCKET_BOUNDS.len() + 1],
    count: AtomicU64,
    total: AtomicU64,
    max: AtomicU64,
}

/// Point-in-time view of a histogram.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub total: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

impl Histogram {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            total: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records one observation.
    pub fn increment(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
        let idx = BUCKET_BOUNDS
            .iter()
            .position(|upper| value <= *upper)
            .unwrap_or(BUCKET_BOUNDS.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Records an elapsed duration in microseconds.
    pub fn record(&self, elapsed: Duration) {
        self.increment(elapsed.as_micros().min(u64::MAX as u128) as u64);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        let max = self.max.load(Ordering::Relaxed);
        let buckets: Vec<u64> = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();

        HistogramSnapshot {
            count,
            total,
            max,
            mean: if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            },
            p50: percentile(&buckets, 50.0, max),
            p95: percentile(&buckets, 95.0, max),
            p99: percentile(&buckets, 99.0, max),
        }
    }
}

/// Bucketed percentile estimate. Reports the matching bucket's upper bound,
/// capped by the observed maximum.
fn percentile(buckets: &[u64], p: f64, max: u64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }
    let target = ((total as f64) * (p / 100.0)).ceil() as u64;
    let mut cumulative = 0u64;
    for (i, count) in buckets.iter().enumerate() {
        cumulative += *count;
        if cumulative >= target {
            return match BUCKET_BOUNDS.get(i) {
                Some(bound) => (*bound).min(max),
                None => max,
            };
        }
    }
    max
}

/// Named histograms shared between the gateway and its storage client.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the histogram registered under `name`, creating it on first use.
    pub fn histogram(&self, name: &str) -> Arc<Histogram> {
        if let Some(existing) = self.histograms.read().get(name) {
            return Arc::clone(existing);
        }
        let mut histograms = self.histograms.write();
        Arc::clone(
            histograms
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Histogram::new(name))),
        )
    }

    pub fn get(&self, name: &str) -> Option<Arc<Histogram>> {
        self.histograms.read().get(name).cloned()
    }

    /// Snapshots every registered histogram, ordered by name.
    pub fn snapshot(&self) -> Vec<(String, HistogramSnapshot)> {
        self.histograms
            .read()
            .iter()
            .map(|(name, h)| (name.clone(), h.snapshot()))
            .collect()
    }
}

/// Metrics attached to one handled method (a command, or an internal stage).
#[derive(Debug, Clone)]
pub struct MethodMetrics {
    pub handler_latency: Arc<Histogram>,
}

impl MethodMetrics {
    pub fn new(registry: &MetricRegistry, name: &str) -> Self {
        Self {
            handler_latency: registry.histogram(name),
        }
    }
}
