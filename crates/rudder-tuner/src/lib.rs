//! Live performance tuning for rudder
//!
//! Tracks per-content-type request telemetry in a sliding window and turns
//! it into adaptive timeouts, a bounded concurrency ceiling, and advisory
//! admission control, plus a priority batch queue for best-effort work.

#![allow(clippy::must_use_candidate, clippy::cast_precision_loss)]

pub mod batch;
pub mod stats;
pub mod tuner;

pub use batch::{drain_rounds, BatchQueue};
pub use stats::{RequestOutcome, StatsTracker, WindowStats};
pub use tuner::{InFlightGuard, OptimizedSettings, PerformanceTuner, TuneReport};
