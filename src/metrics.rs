//! Pluggable metrics surface.
//!
//! The core records counters, gauges, and duration histograms for every
//! decision it makes. The registry is a trait so hosts can bind their
//! own metrics system; the crate ships an in-memory implementation for
//! tests and standalone use, and a no-op default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Monotonic counter.
pub trait Counter: Send + Sync {
    fn inc(&self);
    fn add(&self, n: u64);
    fn get(&self) -> u64;
}

/// Settable gauge.
pub trait Gauge: Send + Sync {
    fn set(&self, value: f64);
    fn add(&self, delta: f64);
    fn get(&self) -> f64;
}

/// Duration histogram observed in seconds.
pub trait Histogram: Send + Sync {
    fn observe(&self, seconds: f64);
    fn snapshot(&self) -> HistogramSnapshot;
}

/// Factory for named, labelled instruments. Repeated calls with the
/// same name and labels return the same underlying instrument.
pub trait MetricsRegistry: Send + Sync {
    fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Arc<dyn Counter>;
    fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Arc<dyn Gauge>;
    fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Arc<dyn Histogram>;
}

/// Point-in-time view of a histogram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    /// (upper bound in seconds, observations at or below it), cumulative
    pub buckets: Vec<(f64, u64)>,
}

impl HistogramSnapshot {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Estimate a quantile from the cumulative buckets. Returns the
    /// upper bound of the bucket containing the target rank.
    pub fn quantile(&self, q: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let rank = (q.clamp(0.0, 1.0) * self.count as f64).ceil() as u64;
        for (bound, cumulative) in &self.buckets {
            if *cumulative >= rank {
                return *bound;
            }
        }
        self.buckets.last().map(|(b, _)| *b).unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------

/// Default histogram bucket upper bounds, in seconds.
const DEFAULT_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

struct AtomicCounter(AtomicU64);

impl Counter for AtomicCounter {
    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// f64 gauge stored as bit-cast u64.
struct AtomicGauge(AtomicU64);

impl AtomicGauge {
    fn new() -> Self {
        Self(AtomicU64::new(0f64.to_bits()))
    }
}

impl Gauge for AtomicGauge {
    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
    fn add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

struct HistogramInner {
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

struct MutexHistogram {
    bounds: Vec<f64>,
    inner: Mutex<HistogramInner>,
}

impl MutexHistogram {
    fn new(bounds: Vec<f64>) -> Self {
        let len = bounds.len();
        Self {
            bounds,
            inner: Mutex::new(HistogramInner {
                counts: vec![0; len],
                sum: 0.0,
                count: 0,
            }),
        }
    }
}

impl Histogram for MutexHistogram {
    fn observe(&self, seconds: f64) {
        let mut inner = self.inner.lock().expect("histogram lock");
        inner.sum += seconds;
        inner.count += 1;
        for (i, bound) in self.bounds.iter().enumerate() {
            if seconds <= *bound {
                inner.counts[i] += 1;
            }
        }
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let inner = self.inner.lock().expect("histogram lock");
        HistogramSnapshot {
            count: inner.count,
            sum: inner.sum,
            buckets: self
                .bounds
                .iter()
                .cloned()
                .zip(inner.counts.iter().cloned())
                .collect(),
        }
    }
}

/// In-memory registry backed by atomics and mutex-guarded histograms.
#[derive(Default)]
pub struct InMemoryRegistry {
    counters: Mutex<HashMap<String, Arc<AtomicCounter>>>,
    gauges: Mutex<HashMap<String, Arc<AtomicGauge>>>,
    histograms: Mutex<HashMap<String, Arc<MutexHistogram>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, labels: &[(&str, &str)]) -> String {
        let mut labels: Vec<_> = labels.to_vec();
        labels.sort();
        let rendered: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{name}{{{}}}", rendered.join(","))
    }
}

impl MetricsRegistry for InMemoryRegistry {
    fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Arc<dyn Counter> {
        let key = Self::key(name, labels);
        let mut counters = self.counters.lock().expect("registry lock");
        counters
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicCounter(AtomicU64::new(0))))
            .clone()
    }

    fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Arc<dyn Gauge> {
        let key = Self::key(name, labels);
        let mut gauges = self.gauges.lock().expect("registry lock");
        gauges
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicGauge::new()))
            .clone()
    }

    fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Arc<dyn Histogram> {
        let key = Self::key(name, labels);
        let mut histograms = self.histograms.lock().expect("registry lock");
        histograms
            .entry(key)
            .or_insert_with(|| Arc::new(MutexHistogram::new(DEFAULT_BUCKETS.to_vec())))
            .clone()
    }
}

/// Registry that records nothing.
#[derive(Default)]
pub struct NoopRegistry;

struct NoopCounter;
impl Counter for NoopCounter {
    fn inc(&self) {}
    fn add(&self, _: u64) {}
    fn get(&self) -> u64 {
        0
    }
}

struct NoopGauge;
impl Gauge for NoopGauge {
    fn set(&self, _: f64) {}
    fn add(&self, _: f64) {}
    fn get(&self) -> f64 {
        0.0
    }
}

struct NoopHistogram;
impl Histogram for NoopHistogram {
    fn observe(&self, _: f64) {}
    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: 0,
            sum: 0.0,
            buckets: Vec::new(),
        }
    }
}

impl MetricsRegistry for NoopRegistry {
    fn counter(&self, _: &str, _: &[(&str, &str)]) -> Arc<dyn Counter> {
        Arc::new(NoopCounter)
    }
    fn gauge(&self, _: &str, _: &[(&str, &str)]) -> Arc<dyn Gauge> {
        Arc::new(NoopGauge)
    }
    fn histogram(&self, _: &str, _: &[(&str, &str)]) -> Arc<dyn Histogram> {
        Arc::new(NoopHistogram)
    }
}
