//! Budgeted fallback decisions per request id
//!
//! Not a linear state machine: each request id carries three counters
//! (retries, escalations, downgrades) plus an error log, and every failure
//! is answered with a decision object. The manager never sleeps and never
//! raises — callers drive the retry loop, apply the returned delay, and
//! must call `record_success` (or let housekeeping sweep the state) once
//! the attempt chain ends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use strum::Display;

use rudder_config::{FallbackConfig, Tier};
use rudder_routing::ModelCatalog;

use crate::classify::{classify_error, ErrorInfo, ErrorKind};

/// What the caller should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FallbackAction {
    /// Try the same model again after the delay
    Retry,
    /// Move to the next stronger tier
    Escalate,
    /// Move to the next cheaper tier
    Downgrade,
    /// Stop; surface a terminal failure to the user
    Abort,
}

/// A fallback decision for one failed attempt
#[derive(Debug, Clone, Serialize)]
pub struct FallbackDecision {
    pub action: FallbackAction,
    /// Model to use next; `None` on abort
    pub model_id: Option<String>,
    /// How long to wait before the next attempt
    pub delay: Duration,
    /// Why this action was chosen
    pub reasoning: String,
    /// Whether the host should surface this to the user
    pub should_notify: bool,
}

/// One logged failure within an attempt chain
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub model_id: String,
    pub at: Instant,
    pub message: String,
}

/// Mutable per-request-id attempt bookkeeping
#[derive(Debug)]
struct AttemptState {
    retries: u32,
    escalations: u32,
    downgrades: u32,
    models_attempted: Vec<String>,
    errors: Vec<ErrorRecord>,
    last_error_at: Instant,
}

impl AttemptState {
    fn new(now: Instant) -> Self {
        Self {
            retries: 0,
            escalations: 0,
            downgrades: 0,
            models_attempted: Vec::new(),
            errors: Vec::new(),
            last_error_at: now,
        }
    }
}

/// Read-only view of an attempt chain for host introspection
#[derive(Debug, Clone, Serialize)]
pub struct AttemptSnapshot {
    pub retries: u32,
    pub escalations: u32,
    pub downgrades: u32,
    pub models_attempted: Vec<String>,
    pub error_count: usize,
}

/// Extra routing context the caller already holds
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackContext {
    /// Tier of the failing model, as the router resolved it
    pub tier: Option<Tier>,
}

/// Decides retry/escalate/downgrade/abort per failed attempt
pub struct FallbackManager {
    attempts: DashMap<String, AttemptState>,
    catalog: Arc<ModelCatalog>,
    config: FallbackConfig,
    top_tier: Tier,
}

impl FallbackManager {
    /// Create a manager with the full tier ladder available
    pub fn new(config: FallbackConfig, catalog: Arc<ModelCatalog>) -> Self {
        Self {
            attempts: DashMap::new(),
            catalog,
            config,
            top_tier: Tier::Advanced,
        }
    }

    /// Cap escalation below the advanced tier (when the router disables it)
    #[must_use]
    pub fn with_top_tier(mut self, top_tier: Tier) -> Self {
        self.top_tier = top_tier;
        self
    }

    /// Decide the next action for a failed attempt
    ///
    /// Counters for one request id must be advanced in call order by a
    /// single logical caller; different request ids are fully independent.
    pub fn get_fallback(
        &self,
        request_id: &str,
        error: &ErrorInfo,
        current_model_id: &str,
        ctx: &FallbackContext,
    ) -> FallbackDecision {
        self.get_fallback_at(request_id, error, current_model_id, ctx, Instant::now())
    }

    fn get_fallback_at(
        &self,
        request_id: &str,
        error: &ErrorInfo,
        current_model_id: &str,
        ctx: &FallbackContext,
        now: Instant,
    ) -> FallbackDecision {
        let kind = classify_error(error);
        let tier = self.resolve_tier(ctx, current_model_id);

        let mut state = self
            .attempts
            .entry(request_id.to_owned())
            .or_insert_with(|| AttemptState::new(now));

        state.last_error_at = now;
        state.errors.push(ErrorRecord {
            kind,
            model_id: current_model_id.to_owned(),
            at: now,
            message: error.message.clone(),
        });
        if !state.models_attempted.iter().any(|m| m == current_model_id) {
            state.models_attempted.push(current_model_id.to_owned());
        }

        let decision = if self.globally_exhausted(&state) {
            FallbackDecision {
                action: FallbackAction::Abort,
                model_id: None,
                delay: Duration::ZERO,
                reasoning: format!(
                    "all fallback budgets exhausted ({} retries, {} escalations, {} downgrades)",
                    state.retries, state.escalations, state.downgrades
                ),
                should_notify: true,
            }
        } else {
            match kind {
                ErrorKind::Transient | ErrorKind::Timeout | ErrorKind::Unknown | ErrorKind::InvalidResponse => {
                    self.retry_or_escalate(&mut state, kind, tier, current_model_id)
                }
                ErrorKind::RateLimit | ErrorKind::QuotaExceeded => {
                    self.downgrade_path(&mut state, kind, tier, current_model_id)
                }
                ErrorKind::Capability => self.escalate_path(
                    &mut state,
                    tier,
                    Duration::from_millis(self.config.capability_delay_ms),
                    &format!("{kind} error"),
                ),
            }
        };

        drop(state);

        match decision.action {
            FallbackAction::Abort => tracing::warn!(
                request_id,
                error_kind = %kind,
                "fallback aborted: {}",
                decision.reasoning
            ),
            _ => tracing::info!(
                request_id,
                error_kind = %kind,
                action = %decision.action,
                next_model = decision.model_id.as_deref().unwrap_or(""),
                delay_ms = decision.delay.as_millis() as u64,
                "fallback decision"
            ),
        }

        decision
    }

    /// Forget a request id's attempt state after a successful call
    pub fn record_success(&self, request_id: &str) {
        if self.attempts.remove(request_id).is_some() {
            tracing::debug!(request_id, "attempt state cleared after success");
        }
    }

    /// Sweep attempt states idle longer than the configured max age
    ///
    /// Returns the number of states removed. Must be called periodically by
    /// the host; nothing inside the manager runs on a timer.
    pub fn cleanup_old_attempts(&self) -> usize {
        self.cleanup_old_attempts_at(Instant::now())
    }

    fn cleanup_old_attempts_at(&self, now: Instant) -> usize {
        let max_age = Duration::from_secs(self.config.attempt_max_age_secs);
        let before = self.attempts.len();
        self.attempts
            .retain(|_, state| now.duration_since(state.last_error_at) < max_age);
        let removed = before - self.attempts.len();
        if removed > 0 {
            tracing::debug!(removed, "swept stale attempt states");
        }
        removed
    }

    /// Introspect a live attempt chain
    pub fn attempt_snapshot(&self, request_id: &str) -> Option<AttemptSnapshot> {
        self.attempts.get(request_id).map(|state| AttemptSnapshot {
            retries: state.retries,
            escalations: state.escalations,
            downgrades: state.downgrades,
            models_attempted: state.models_attempted.clone(),
            error_count: state.errors.len(),
        })
    }

    /// Number of live attempt states
    pub fn live_attempts(&self) -> usize {
        self.attempts.len()
    }

    fn resolve_tier(&self, ctx: &FallbackContext, model_id: &str) -> Tier {
        if let Some(tier) = ctx.tier {
            return tier;
        }
        self.catalog.tier_of(model_id).unwrap_or_else(|_| {
            tracing::warn!(model_id, "failing model not in catalog; assuming standard tier");
            Tier::Standard
        })
    }

    fn globally_exhausted(&self, state: &AttemptState) -> bool {
        state.retries >= self.config.global_retry_factor * self.config.retry_budgets.max()
            && state.escalations >= self.config.escalation_budget
            && state.downgrades >= self.config.downgrade_budgets.max()
    }

    fn retry_budget(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::Transient => self.config.retry_budgets.transient,
            ErrorKind::Timeout => self.config.retry_budgets.timeout,
            ErrorKind::InvalidResponse => self.config.retry_budgets.invalid_response,
            _ => self.config.retry_budgets.unknown,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .config
            .base_delay_ms
            .saturating_mul(1_u64 << attempt.min(10))
            .min(self.config.max_delay_ms);
        Duration::from_millis(ms)
    }

    fn retry_or_escalate(
        &self,
        state: &mut AttemptState,
        kind: ErrorKind,
        tier: Tier,
        model_id: &str,
    ) -> FallbackDecision {
        let budget = self.retry_budget(kind);
        if state.retries < budget {
            let delay = if kind == ErrorKind::InvalidResponse {
                Duration::ZERO
            } else {
                self.backoff(state.retries)
            };
            state.retries += 1;
            return FallbackDecision {
                action: FallbackAction::Retry,
                model_id: Some(model_id.to_owned()),
                delay,
                reasoning: format!("{kind} error; retry {}/{budget}", state.retries),
                should_notify: false,
            };
        }
        self.escalate_path(
            state,
            tier,
            Duration::from_millis(self.config.base_delay_ms),
            &format!("{kind} retry budget exhausted"),
        )
    }

    fn downgrade_path(
        &self,
        state: &mut AttemptState,
        kind: ErrorKind,
        tier: Tier,
        model_id: &str,
    ) -> FallbackDecision {
        let budget = match kind {
            ErrorKind::QuotaExceeded => self.config.downgrade_budgets.quota_exceeded,
            _ => self.config.downgrade_budgets.rate_limit,
        };
        let notify = kind == ErrorKind::QuotaExceeded;

        if let Some(lower) = tier.next_down() {
            if state.downgrades < budget {
                let first_downgrade = state.downgrades == 0;
                state.downgrades += 1;
                let delay = if kind == ErrorKind::RateLimit && first_downgrade {
                    Duration::from_millis(self.config.rate_limit_delay_ms)
                } else {
                    Duration::from_millis(self.config.base_delay_ms)
                };
                let model_id = self
                    .catalog
                    .default_for_tier(lower)
                    .map(|m| m.id.clone())
                    .ok();
                return FallbackDecision {
                    action: FallbackAction::Downgrade,
                    model_id,
                    delay,
                    reasoning: format!("{kind} error; downgrading {tier} to {lower}"),
                    should_notify: notify,
                };
            }
            // Downgrade budget spent: keep trying before escalating
            if state.retries < self.config.retry_budgets.unknown {
                state.retries += 1;
                return FallbackDecision {
                    action: FallbackAction::Retry,
                    model_id: Some(model_id.to_owned()),
                    delay: self.backoff(state.retries - 1),
                    reasoning: format!("{kind} downgrade budget exhausted; retrying {model_id}"),
                    should_notify: notify,
                };
            }
            return self.escalate_path(
                state,
                tier,
                Duration::from_millis(self.config.base_delay_ms),
                &format!("{kind} downgrade and retry budgets exhausted"),
            );
        }

        // Already at the bottom tier: reissue as a bounded same-model retry
        if state.retries < self.config.bottom_tier_retries {
            let delay = self.backoff(state.retries);
            state.retries += 1;
            return FallbackDecision {
                action: FallbackAction::Retry,
                model_id: Some(model_id.to_owned()),
                delay,
                reasoning: format!("{kind} at bottom tier; retry {}/{} against {model_id}", state.retries, self.config.bottom_tier_retries),
                should_notify: notify,
            };
        }
        self.escalate_path(
            state,
            tier,
            Duration::from_millis(self.config.base_delay_ms),
            &format!("{kind} persists at bottom tier"),
        )
    }

    fn escalate_path(
        &self,
        state: &mut AttemptState,
        tier: Tier,
        delay: Duration,
        cause: &str,
    ) -> FallbackDecision {
        let next = tier.next_up().filter(|t| *t <= self.top_tier);

        if state.escalations >= self.config.escalation_budget || next.is_none() {
            return FallbackDecision {
                action: FallbackAction::Abort,
                model_id: None,
                delay: Duration::ZERO,
                reasoning: if next.is_none() {
                    format!("{cause}; already at top tier {tier}")
                } else {
                    format!("{cause}; escalation budget exhausted")
                },
                should_notify: true,
            };
        }

        let target = next.unwrap_or(self.top_tier);
        state.escalations += 1;
        FallbackDecision {
            action: FallbackAction::Escalate,
            model_id: self.catalog.default_for_tier(target).map(|m| m.id.clone()).ok(),
            delay,
            reasoning: format!("{cause}; escalating {tier} to {target}"),
            should_notify: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_config::RouterConfig;

    const FAST: &str = "claude-haiku-4-5";
    const STANDARD: &str = "claude-sonnet-4-5";
    const ADVANCED: &str = "claude-opus-4-1";

    fn manager() -> FallbackManager {
        let catalog = Arc::new(ModelCatalog::from_config(&RouterConfig::default()).unwrap());
        FallbackManager::new(FallbackConfig::default(), catalog)
    }

    fn transient() -> ErrorInfo {
        ErrorInfo::from_message("connection reset, please try again")
    }

    #[test]
    fn transient_retries_then_escalates_never_aborts_early() {
        let manager = manager();
        let ctx = FallbackContext::default();

        // Budget of 3: three retries with doubling backoff
        for (attempt, expected_ms) in [(1_u32, 1_000_u64), (2, 2_000), (3, 4_000)] {
            let decision = manager.get_fallback("req-1", &transient(), STANDARD, &ctx);
            assert_eq!(decision.action, FallbackAction::Retry, "attempt {attempt}");
            assert_eq!(decision.model_id.as_deref(), Some(STANDARD));
            assert_eq!(decision.delay, Duration::from_millis(expected_ms));
        }

        // Exhausted retries convert to escalation, not abort
        let decision = manager.get_fallback("req-1", &transient(), STANDARD, &ctx);
        assert_eq!(decision.action, FallbackAction::Escalate);
        assert_eq!(decision.model_id.as_deref(), Some(ADVANCED));
    }

    #[test]
    fn backoff_caps_at_sixteen_seconds() {
        let manager = manager();
        assert_eq!(manager.backoff(0), Duration::from_millis(1_000));
        assert_eq!(manager.backoff(4), Duration::from_millis(16_000));
        assert_eq!(manager.backoff(30), Duration::from_millis(16_000));
    }

    #[test]
    fn escalation_budget_exhaustion_aborts() {
        let manager = manager();
        let ctx = FallbackContext {
            tier: Some(Tier::Fast),
        };
        let capability = ErrorInfo::from_message("tool use not supported by this model");

        let first = manager.get_fallback("req-2", &capability, FAST, &ctx);
        assert_eq!(first.action, FallbackAction::Escalate);
        assert_eq!(first.delay, Duration::from_millis(500));
        assert!(!first.should_notify);

        let second = manager.get_fallback("req-2", &capability, STANDARD, &FallbackContext {
            tier: Some(Tier::Standard),
        });
        assert_eq!(second.action, FallbackAction::Escalate);
        assert_eq!(second.model_id.as_deref(), Some(ADVANCED));

        let third = manager.get_fallback("req-2", &capability, ADVANCED, &FallbackContext {
            tier: Some(Tier::Advanced),
        });
        assert_eq!(third.action, FallbackAction::Abort);
        assert!(third.should_notify);
    }

    #[test]
    fn escalation_at_top_tier_aborts() {
        let manager = manager();
        let capability = ErrorInfo::from_message("unsupported request shape");
        let decision = manager.get_fallback("req-3", &capability, ADVANCED, &FallbackContext {
            tier: Some(Tier::Advanced),
        });
        assert_eq!(decision.action, FallbackAction::Abort);
    }

    #[test]
    fn rate_limit_downgrades_with_cooldown_then_base_delay() {
        let manager = manager();
        let rate_limited = ErrorInfo::from_message("429 Too Many Requests");

        let first = manager.get_fallback("req-4", &rate_limited, ADVANCED, &FallbackContext {
            tier: Some(Tier::Advanced),
        });
        assert_eq!(first.action, FallbackAction::Downgrade);
        assert_eq!(first.model_id.as_deref(), Some(STANDARD));
        assert_eq!(first.delay, Duration::from_millis(60_000));
        assert!(!first.should_notify);

        let second = manager.get_fallback("req-4", &rate_limited, STANDARD, &FallbackContext {
            tier: Some(Tier::Standard),
        });
        assert_eq!(second.action, FallbackAction::Downgrade);
        assert_eq!(second.model_id.as_deref(), Some(FAST));
        assert_eq!(second.delay, Duration::from_millis(1_000));
    }

    #[test]
    fn rate_limit_at_bottom_tier_becomes_two_retries() {
        let manager = manager();
        let rate_limited = ErrorInfo::from_message("429 Too Many Requests");
        let ctx = FallbackContext {
            tier: Some(Tier::Fast),
        };

        for attempt in 1..=2_u32 {
            let decision = manager.get_fallback("req-5", &rate_limited, FAST, &ctx);
            assert_eq!(decision.action, FallbackAction::Retry, "attempt {attempt}");
            assert_eq!(decision.model_id.as_deref(), Some(FAST));
        }

        // Third strike leaves retry-land
        let decision = manager.get_fallback("req-5", &rate_limited, FAST, &ctx);
        assert_eq!(decision.action, FallbackAction::Escalate);
    }

    #[test]
    fn quota_downgrade_notifies_and_budget_is_one() {
        let manager = manager();
        let quota = ErrorInfo::from_message("monthly quota exhausted");

        let first = manager.get_fallback("req-6", &quota, ADVANCED, &FallbackContext {
            tier: Some(Tier::Advanced),
        });
        assert_eq!(first.action, FallbackAction::Downgrade);
        assert!(first.should_notify);
        assert_eq!(first.delay, Duration::from_millis(1_000));

        // Budget of 1 spent: converts to a retry before escalation
        let second = manager.get_fallback("req-6", &quota, STANDARD, &FallbackContext {
            tier: Some(Tier::Standard),
        });
        assert_eq!(second.action, FallbackAction::Retry);
    }

    #[test]
    fn global_exhaustion_aborts_every_kind() {
        let manager = manager();
        let now = Instant::now();
        manager.attempts.insert("req-7".to_owned(), AttemptState {
            retries: 6,
            escalations: 2,
            downgrades: 2,
            models_attempted: vec![STANDARD.to_owned()],
            errors: Vec::new(),
            last_error_at: now,
        });

        for error in [
            ErrorInfo::from_message("connection reset"),
            ErrorInfo::from_message("429 Too Many Requests"),
            ErrorInfo::from_message("does not support json"),
            ErrorInfo::from_message("???"),
        ] {
            let decision = manager.get_fallback("req-7", &error, STANDARD, &FallbackContext::default());
            assert_eq!(decision.action, FallbackAction::Abort);
            assert!(decision.should_notify);
            assert!(decision.model_id.is_none());
        }
    }

    #[test]
    fn invalid_response_retries_without_backoff() {
        let manager = manager();
        let invalid = ErrorInfo::from_message("failed to parse completion body");
        let decision = manager.get_fallback("req-8", &invalid, STANDARD, &FallbackContext::default());
        assert_eq!(decision.action, FallbackAction::Retry);
        assert_eq!(decision.delay, Duration::ZERO);
    }

    #[test]
    fn record_success_clears_state() {
        let manager = manager();
        manager.get_fallback("req-9", &transient(), STANDARD, &FallbackContext::default());
        assert!(manager.attempt_snapshot("req-9").is_some());

        manager.record_success("req-9");
        assert!(manager.attempt_snapshot("req-9").is_none());

        // A fresh chain starts from a clean budget
        let decision = manager.get_fallback("req-9", &transient(), STANDARD, &FallbackContext::default());
        assert_eq!(decision.action, FallbackAction::Retry);
        assert_eq!(decision.delay, Duration::from_millis(1_000));
    }

    #[test]
    fn housekeeping_sweeps_stale_states_only() {
        let manager = manager();
        let ctx = FallbackContext::default();
        let base = Instant::now();
        manager.get_fallback_at("stale", &transient(), STANDARD, &ctx, base);
        manager.get_fallback_at("fresh", &transient(), STANDARD, &ctx, base + Duration::from_secs(200));

        // 301s after the stale error, 101s after the fresh one
        let removed = manager.cleanup_old_attempts_at(base + Duration::from_secs(301));
        assert_eq!(removed, 1);
        assert!(manager.attempt_snapshot("stale").is_none());
        assert!(manager.attempt_snapshot("fresh").is_some());
    }

    #[test]
    fn snapshot_tracks_models_and_errors() {
        let manager = manager();
        let ctx = FallbackContext::default();
        manager.get_fallback("req-10", &transient(), STANDARD, &ctx);
        manager.get_fallback("req-10", &transient(), STANDARD, &ctx);

        let snapshot = manager.attempt_snapshot("req-10").unwrap();
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.models_attempted, vec![STANDARD.to_owned()]);
        assert_eq!(snapshot.error_count, 2);
    }

    #[test]
    fn capped_top_tier_aborts_below_advanced() {
        let catalog = Arc::new(ModelCatalog::from_config(&RouterConfig::default()).unwrap());
        let manager = FallbackManager::new(FallbackConfig::default(), catalog).with_top_tier(Tier::Standard);
        let capability = ErrorInfo::from_message("unsupported output mode");

        let decision = manager.get_fallback("req-11", &capability, STANDARD, &FallbackContext {
            tier: Some(Tier::Standard),
        });
        assert_eq!(decision.action, FallbackAction::Abort);
    }
}
