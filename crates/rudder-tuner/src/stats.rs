//! Per-content-type request statistics over a sliding window
//!
//! Records latency, error, and timeout outcomes per content type and
//! serves percentile snapshots. The window is trimmed on every record.
//! In-memory only.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

/// Outcome of one completed (or failed) generation request
#[derive(Debug, Clone, Copy)]
pub struct RequestOutcome {
    pub success: bool,
    pub latency: Duration,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    latency: Duration,
    success: bool,
    timed_out: bool,
}

/// Aggregated view of one content type's recent window
#[derive(Debug, Clone, Default, Serialize)]
pub struct WindowStats {
    pub sample_count: usize,
    pub error_count: usize,
    pub timeout_count: usize,
    /// Fraction of samples that failed (0.0 to 1.0)
    pub error_rate: f64,
    /// 95th percentile latency, when any samples exist
    pub p95_latency: Option<Duration>,
    /// Mean latency, when any samples exist
    pub avg_latency: Option<Duration>,
}

/// Sliding-window outcome tracker keyed by content type
pub struct StatsTracker {
    windows: DashMap<String, VecDeque<Sample>>,
    window: Duration,
}

impl StatsTracker {
    /// Create a tracker with the given window length
    pub fn new(window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            window,
        }
    }

    /// Record an outcome for a content type
    pub fn record(&self, content_type: &str, outcome: &RequestOutcome) {
        self.record_at(content_type, outcome, Instant::now());
    }

    pub(crate) fn record_at(&self, content_type: &str, outcome: &RequestOutcome, now: Instant) {
        let mut samples = self.windows.entry(content_type.to_owned()).or_default();
        samples.push_back(Sample {
            at: now,
            latency: outcome.latency,
            success: outcome.success,
            timed_out: outcome.timed_out,
        });
        while let Some(front) = samples.front() {
            if now.duration_since(front.at) > self.window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Snapshot a content type's current window
    pub fn snapshot(&self, content_type: &str) -> WindowStats {
        self.snapshot_at(content_type, Instant::now())
    }

    pub(crate) fn snapshot_at(&self, content_type: &str, now: Instant) -> WindowStats {
        let Some(samples) = self.windows.get(content_type) else {
            return WindowStats::default();
        };

        let live: Vec<Sample> = samples
            .iter()
            .filter(|s| now.duration_since(s.at) <= self.window)
            .copied()
            .collect();
        drop(samples);

        aggregate(&live)
    }

    /// Snapshot the union of every content type's window
    pub fn aggregate_snapshot(&self) -> WindowStats {
        let now = Instant::now();
        let mut live: Vec<Sample> = Vec::new();
        for entry in &self.windows {
            live.extend(entry.value().iter().filter(|s| now.duration_since(s.at) <= self.window));
        }
        aggregate(&live)
    }

    /// Content types with at least one recorded sample
    pub fn content_types(&self) -> Vec<String> {
        self.windows.iter().map(|e| e.key().clone()).collect()
    }
}

fn aggregate(samples: &[Sample]) -> WindowStats {
    if samples.is_empty() {
        return WindowStats::default();
    }

    let error_count = samples.iter().filter(|s| !s.success).count();
    let timeout_count = samples.iter().filter(|s| s.timed_out).count();

    let mut latencies: Vec<Duration> = samples.iter().map(|s| s.latency).collect();
    latencies.sort_unstable();
    let total: Duration = latencies.iter().sum();

    WindowStats {
        sample_count: samples.len(),
        error_count,
        timeout_count,
        error_rate: error_count as f64 / samples.len() as f64,
        p95_latency: Some(percentile(&latencies, 0.95)),
        avg_latency: Some(total / samples.len() as u32),
    }
}

/// Nearest-rank percentile from sorted values
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
