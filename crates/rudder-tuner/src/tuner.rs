//! Adaptive timeout and concurrency control
//!
//! Computes per-content-type timeouts from observed latency percentiles
//! and error rates, adapts the shared concurrency ceiling inside [min,
//! max], and gates admission on an in-flight counter. Backpressure is
//! advisory: `can_start_request` reports a boolean, nothing queues or
//! blocks here. Callers must pair `start_request`/`end_request` on every
//! path — including errors — or the ceiling silently starves; the RAII
//! [`InFlightGuard`] exists so error paths cannot forget.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use rudder_config::{TuneMode, TunerConfig};

use crate::batch::BatchQueue;
use crate::stats::{RequestOutcome, StatsTracker, WindowStats};

/// Error rate above which timeouts stretch
const TIMEOUT_STRETCH_ERROR_RATE: f64 = 0.10;

/// Error rate above which the concurrency ceiling steps down
const HIGH_ERROR_RATE: f64 = 0.15;

/// Error rate below which the ceiling may step up
const LOW_ERROR_RATE: f64 = 0.02;

/// Samples required before the ceiling steps up
const RAISE_MIN_SAMPLES: usize = 20;

/// Observed p95 above which the ceiling steps down
const SLOW_P95: Duration = Duration::from_secs(180);

/// Current tuner guidance for one content type
#[derive(Debug, Clone, Serialize)]
pub struct OptimizedSettings {
    /// Deadline the caller should apply to the model call
    pub timeout: Duration,
    /// Current concurrency ceiling
    pub concurrency: usize,
    /// Whether a new request may start right now
    pub can_start_now: bool,
    /// Jobs waiting in the batch queue
    pub queue_size: usize,
    /// The window backing these numbers
    pub stats: WindowStats,
}

/// Outcome of an `auto_tune` pass
#[derive(Debug, Clone, Serialize)]
pub struct TuneReport {
    pub mode: TuneMode,
    pub advisories: Vec<String>,
    /// Ceiling change applied, as (from, to); only the auto mode sets this
    pub adjustment: Option<(usize, usize)>,
}

/// Adaptive timeout/concurrency tuner with request batching
pub struct PerformanceTuner {
    config: TunerConfig,
    stats: StatsTracker,
    concurrency: AtomicUsize,
    in_flight: AtomicUsize,
    queue: Mutex<BatchQueue<String>>,
}

impl PerformanceTuner {
    /// Create a tuner from configuration
    pub fn new(config: TunerConfig) -> Self {
        let concurrency = AtomicUsize::new(config.default_concurrency);
        Self {
            stats: StatsTracker::new(Duration::from_secs(config.window_secs)),
            config,
            concurrency,
            in_flight: AtomicUsize::new(0),
            queue: Mutex::new(BatchQueue::new()),
        }
    }

    /// Record a finished request's outcome
    pub fn record_result(&self, content_type: &str, outcome: &RequestOutcome) {
        self.stats.record(content_type, outcome);
    }

    /// Current guidance for a content type
    ///
    /// Applies the per-window concurrency rules as a side effect, so hosts
    /// that poll settings keep the ceiling adapted without a separate tick.
    pub fn optimized_settings(&self, content_type: &str) -> OptimizedSettings {
        let stats = self.stats.snapshot(content_type);
        self.adjust_concurrency(&stats, content_type);

        OptimizedSettings {
            timeout: self.timeout_for(content_type, &stats),
            concurrency: self.concurrency.load(Ordering::Relaxed),
            can_start_now: self.can_start_request(),
            queue_size: self.queue_len(),
            stats,
        }
    }

    /// Whether the in-flight count is below the current ceiling
    ///
    /// Advisory only: nothing is reserved, and the caller still brackets
    /// the actual call with `start_request`/`end_request`.
    pub fn can_start_request(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) < self.concurrency.load(Ordering::Relaxed)
    }

    /// Mark a request as started
    pub fn start_request(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark a request as finished; must pair every `start_request`
    pub fn end_request(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1)));
    }

    /// Bracket a request with RAII so error paths cannot skip `end_request`
    pub fn track_request(&self) -> InFlightGuard<'_> {
        self.start_request();
        InFlightGuard { tuner: self }
    }

    /// Requests currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Queue a best-effort job; lower priority numbers release first
    pub fn enqueue(&self, priority: u32, job_id: impl Into<String>) {
        self.lock_queue().push(priority, job_id.into());
    }

    /// Release the next batch of queued jobs
    pub fn next_batch(&self) -> Vec<String> {
        self.lock_queue().pop_batch(self.config.batch_size)
    }

    /// Pause the host should apply between batch rounds
    pub const fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.config.batch_delay_ms)
    }

    /// Jobs waiting in the batch queue
    pub fn queue_len(&self) -> usize {
        self.lock_queue().len()
    }

    /// Review aggregate health and, in auto mode only, adjust the ceiling
    pub fn auto_tune(&self) -> TuneReport {
        let agg = self.stats.aggregate_snapshot();
        let current = self.concurrency.load(Ordering::Relaxed);
        let mut advisories = Vec::new();

        let degraded = agg.error_rate > HIGH_ERROR_RATE
            || agg.p95_latency.is_some_and(|p95| p95 > SLOW_P95);
        let healthy = agg.error_rate < LOW_ERROR_RATE && agg.sample_count > RAISE_MIN_SAMPLES;

        if degraded {
            advisories.push(format!(
                "aggregate window degraded ({} samples, {:.0}% errors); lower concurrency",
                agg.sample_count,
                agg.error_rate * 100.0
            ));
        } else if healthy {
            advisories.push(format!(
                "aggregate window healthy over {} samples; concurrency can rise",
                agg.sample_count
            ));
        } else {
            advisories.push("insufficient signal; no change recommended".to_owned());
        }

        match self.config.mode {
            TuneMode::Conservative => {
                advisories.push("conservative mode: prefer the lowest stable concurrency".to_owned());
            }
            TuneMode::Aggressive => {
                advisories.push("aggressive mode: prefer the highest passing concurrency".to_owned());
            }
            TuneMode::Balanced => {}
            TuneMode::Auto => {
                let target = if degraded {
                    current.saturating_sub(1).max(self.config.min_concurrency)
                } else if healthy {
                    (current + 1).min(self.config.max_concurrency)
                } else {
                    current
                };
                if target != current {
                    self.set_concurrency(current, target, "auto_tune aggregate thresholds");
                    return TuneReport {
                        mode: self.config.mode,
                        advisories,
                        adjustment: Some((current, target)),
                    };
                }
            }
        }

        TuneReport {
            mode: self.config.mode,
            advisories,
            adjustment: None,
        }
    }

    fn timeout_for(&self, content_type: &str, stats: &WindowStats) -> Duration {
        let base = self.config.base_timeout(content_type) as f64 * self.config.timeout_multiplier;
        let mut timeout = Duration::from_secs_f64(base.max(0.0));

        if let Some(p95) = stats.p95_latency {
            let raised = p95.mul_f64(1.5);
            if raised > timeout {
                timeout = raised;
            }
        }
        if stats.error_rate > TIMEOUT_STRETCH_ERROR_RATE {
            timeout = timeout.mul_f64(1.3);
        }

        timeout.clamp(
            Duration::from_secs(self.config.min_timeout_secs),
            Duration::from_secs(self.config.max_timeout_secs),
        )
    }

    fn adjust_concurrency(&self, stats: &WindowStats, content_type: &str) {
        if stats.sample_count == 0 {
            return;
        }
        let current = self.concurrency.load(Ordering::Relaxed);

        let degraded = stats.error_rate > HIGH_ERROR_RATE
            || stats.p95_latency.is_some_and(|p95| p95 > SLOW_P95);
        if degraded && current > self.config.min_concurrency {
            self.set_concurrency(
                current,
                current - 1,
                &format!(
                    "{content_type} window degraded ({:.0}% errors)",
                    stats.error_rate * 100.0
                ),
            );
            return;
        }

        if stats.error_rate < LOW_ERROR_RATE
            && stats.sample_count > RAISE_MIN_SAMPLES
            && current < self.config.max_concurrency
        {
            self.set_concurrency(
                current,
                current + 1,
                &format!("{content_type} window healthy over {} samples", stats.sample_count),
            );
        }
    }

    fn set_concurrency(&self, from: usize, to: usize, reason: &str) {
        if self
            .concurrency
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!(from, to, reason, "concurrency ceiling adjusted");
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, BatchQueue<String>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// RAII pairing of `start_request`/`end_request`
pub struct InFlightGuard<'a> {
    tuner: &'a PerformanceTuner,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.tuner.end_request();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuner() -> PerformanceTuner {
        PerformanceTuner::new(TunerConfig::default())
    }

    fn ok(latency: Duration) -> RequestOutcome {
        RequestOutcome {
            success: true,
            latency,
            timed_out: false,
        }
    }

    fn failed() -> RequestOutcome {
        RequestOutcome {
            success: false,
            latency: Duration::from_secs(1),
            timed_out: false,
        }
    }

    #[test]
    fn timeout_defaults_to_base_for_quiet_types() {
        let settings = tuner().optimized_settings("document");
        assert_eq!(settings.timeout, Duration::from_secs(90));

        let settings = tuner().optimized_settings("never-seen");
        assert_eq!(settings.timeout, Duration::from_secs(60));
    }

    #[test]
    fn observed_p95_raises_timeout() {
        let tuner = tuner();
        for _ in 0..10 {
            tuner.record_result("document", &ok(Duration::from_secs(120)));
        }

        let settings = tuner.optimized_settings("document");
        // 1.5 x 120s observed beats the 90s base
        assert_eq!(settings.timeout, Duration::from_secs(180));
    }

    #[test]
    fn error_rate_stretches_timeout() {
        let tuner = tuner();
        for i in 0..10 {
            let outcome = if i < 8 {
                ok(Duration::from_secs(1))
            } else {
                failed()
            };
            tuner.record_result("summary", &outcome);
        }

        let settings = tuner.optimized_settings("summary");
        // 45s base x 1.3, then clamped nowhere
        assert_eq!(settings.timeout, Duration::from_secs_f64(45.0 * 1.3));
    }

    #[test]
    fn timeout_respects_bounds() {
        let tuner = tuner();
        let settings = tuner.optimized_settings("qa");
        assert!(settings.timeout >= Duration::from_secs(30));

        for _ in 0..10 {
            tuner.record_result("qa", &ok(Duration::from_secs(3_000)));
        }
        let settings = tuner.optimized_settings("qa");
        assert_eq!(settings.timeout, Duration::from_secs(600));
    }

    #[test]
    fn degraded_window_steps_concurrency_down() {
        let tuner = tuner();
        for _ in 0..10 {
            tuner.record_result("document", &failed());
        }

        let settings = tuner.optimized_settings("document");
        assert_eq!(settings.concurrency, 3);
    }

    #[test]
    fn healthy_window_steps_concurrency_up() {
        let tuner = tuner();
        let start = tuner.optimized_settings("document").concurrency;
        for _ in 0..25 {
            tuner.record_result("document", &ok(Duration::from_millis(800)));
        }

        let settings = tuner.optimized_settings("document");
        assert!(settings.concurrency >= start);
        assert_eq!(settings.concurrency, start + 1);
    }

    #[test]
    fn concurrency_stays_within_bounds() {
        let tuner = tuner();
        for _ in 0..10 {
            tuner.record_result("document", &failed());
        }
        for _ in 0..20 {
            tuner.optimized_settings("document");
        }
        assert_eq!(tuner.optimized_settings("document").concurrency, 1);
    }

    #[test]
    fn admission_gates_on_in_flight_count() {
        let tuner = tuner();
        assert!(tuner.can_start_request());

        for _ in 0..4 {
            tuner.start_request();
        }
        assert!(!tuner.can_start_request());

        tuner.end_request();
        assert!(tuner.can_start_request());
    }

    #[test]
    fn guard_pairs_start_and_end() {
        let tuner = tuner();
        {
            let _guard = tuner.track_request();
            assert_eq!(tuner.in_flight(), 1);
        }
        assert_eq!(tuner.in_flight(), 0);
    }

    #[test]
    fn end_request_saturates_at_zero() {
        let tuner = tuner();
        tuner.end_request();
        assert_eq!(tuner.in_flight(), 0);
    }

    #[test]
    fn batching_respects_priority_and_size() {
        let tuner = tuner();
        tuner.enqueue(9, "background");
        tuner.enqueue(1, "soon-a");
        tuner.enqueue(1, "soon-b");
        for i in 0..5_u32 {
            tuner.enqueue(5, format!("mid-{i}"));
        }

        let batch = tuner.next_batch();
        assert_eq!(batch.len(), 5);
        assert_eq!(&batch[..2], ["soon-a".to_owned(), "soon-b".to_owned()]);
        assert_eq!(tuner.queue_len(), 3);
    }

    #[test]
    fn balanced_mode_never_mutates_ceiling() {
        let tuner = tuner();
        for _ in 0..30 {
            tuner.record_result("document", &failed());
        }

        let report = tuner.auto_tune();
        assert!(report.adjustment.is_none());
        assert_eq!(tuner.concurrency.load(Ordering::Relaxed), 4);
        assert!(!report.advisories.is_empty());
    }

    #[test]
    fn auto_mode_applies_aggregate_adjustment() {
        let config = TunerConfig {
            mode: TuneMode::Auto,
            ..TunerConfig::default()
        };
        let tuner = PerformanceTuner::new(config);
        for _ in 0..30 {
            tuner.record_result("document", &failed());
        }

        let report = tuner.auto_tune();
        assert_eq!(report.adjustment, Some((4, 3)));

        for _ in 0..300 {
            tuner.record_result("document", &ok(Duration::from_millis(500)));
        }
        // 30 failures over 330 samples: neither degraded nor healthy enough
        let report = tuner.auto_tune();
        assert!(report.adjustment.is_none());
    }
}
