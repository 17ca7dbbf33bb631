//! # Client Metrics
//!
//! Counters for dispatched responses plus a latency histogram of `wait`
//! rounds.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Atomic counters aggregate events cheaply.
//! 2. **Fixed Buckets**: Histogram buckets live in a contiguous array.
//! 3. **Plain Snapshots**: Readers get serializable structs, never live
//!    atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Default wait-latency bucket boundaries in microseconds.
pub const DEFAULT_LATENCY_BUCKETS_US: [u64; 12] =
    [1, 2, 5, 10, 20, 50, 100, 200, 500, 1_000, 2_000, 5_000];

/// Point-in-time view of the client counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Operations handed to the instance through submitted contexts.
    pub scheduled_total: u64,
    /// Response chunks delivered by the instance.
    pub responses_total: u64,
    /// Response chunks carrying a failure status.
    pub errors_total: u64,
    /// Chunks whose cookie matched no registered response.
    pub unmatched_total: u64,
    /// Latency of `wait` rounds.
    pub wait_latency: LatencySnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub bounds_us: Vec<u64>,
    /// Bucket counts, overflow bucket last.
    pub buckets: Vec<u64>,
    pub samples: u64,
    pub sum_us: u64,
}

/// Thread-safe metrics aggregator shared by a client and its dispatcher.
pub struct ClientMetrics {
    scheduled_total: AtomicU64,
    responses_total: AtomicU64,
    errors_total: AtomicU64,
    unmatched_total: AtomicU64,
    wait_latency: LatencyHistogram,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::with_latency_buckets(DEFAULT_LATENCY_BUCKETS_US.to_vec())
    }

    /// `bounds_us` must be sorted ascending.
    pub fn with_latency_buckets(bounds_us: Vec<u64>) -> Self {
        ClientMetrics {
            scheduled_total: AtomicU64::new(0),
            responses_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            unmatched_total: AtomicU64::new(0),
            wait_latency: LatencyHistogram::new(bounds_us),
        }
    }

    pub fn record_scheduled(&self, count: usize) {
        self.scheduled_total.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_response(&self, failed: bool) {
        self.responses_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_unmatched(&self) {
        self.unmatched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait(&self, latency: Duration) {
        self.wait_latency.record(latency);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scheduled_total: self.scheduled_total.load(Ordering::Relaxed),
            responses_total: self.responses_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            unmatched_total: self.unmatched_total.load(Ordering::Relaxed),
            wait_latency: self.wait_latency.snapshot(),
        }
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram with a linear bucket scan.
pub struct LatencyHistogram {
    bounds_us: Vec<u64>,
    buckets: Vec<AtomicU64>,
    sum_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    pub fn new(bounds_us: Vec<u64>) -> Self {
        let buckets = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();
        LatencyHistogram {
            bounds_us,
            buckets,
            sum_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    pub fn record(&self, latency: Duration) {
        let micros = latency.as_micros() as u64;
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);

        let idx = self
            .bounds_us
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(self.bounds_us.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_us: self.bounds_us.clone(),
            buckets: self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect(),
            samples: self.samples.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}
