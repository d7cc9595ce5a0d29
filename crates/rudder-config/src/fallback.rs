//! Fallback budgets and delay constants

use serde::Deserialize;

/// Retry budgets per error kind
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryBudgets {
    #[serde(default = "default_transient_retries")]
    pub transient: u32,
    #[serde(default = "default_two")]
    pub timeout: u32,
    #[serde(default = "default_two")]
    pub invalid_response: u32,
    #[serde(default = "default_two")]
    pub unknown: u32,
}

impl Default for RetryBudgets {
    fn default() -> Self {
        Self {
            transient: default_transient_retries(),
            timeout: default_two(),
            invalid_response: default_two(),
            unknown: default_two(),
        }
    }
}

impl RetryBudgets {
    /// The largest configured retry budget, used by the global-exhaustion arm
    pub fn max(&self) -> u32 {
        self.transient
            .max(self.timeout)
            .max(self.invalid_response)
            .max(self.unknown)
    }
}

/// Downgrade budgets per error kind
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DowngradeBudgets {
    #[serde(default = "default_two")]
    pub rate_limit: u32,
    #[serde(default = "default_one")]
    pub quota_exceeded: u32,
}

impl Default for DowngradeBudgets {
    fn default() -> Self {
        Self {
            rate_limit: default_two(),
            quota_exceeded: default_one(),
        }
    }
}

impl DowngradeBudgets {
    /// The largest configured downgrade budget
    pub fn max(&self) -> u32 {
        self.rate_limit.max(self.quota_exceeded)
    }
}

/// Fallback manager configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FallbackConfig {
    /// Retry budgets per retryable error kind
    #[serde(default)]
    pub retry_budgets: RetryBudgets,
    /// Downgrade budgets per downgradeable error kind
    #[serde(default)]
    pub downgrade_budgets: DowngradeBudgets,
    /// Escalations allowed before aborting
    #[serde(default = "default_two")]
    pub escalation_budget: u32,
    /// Exponential backoff base in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Exponential backoff ceiling in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Cooldown before the first rate-limit downgrade takes effect
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
    /// Delay before an escalation triggered by a capability error
    #[serde(default = "default_capability_delay_ms")]
    pub capability_delay_ms: u64,
    /// Attempt states older than this are swept by housekeeping
    #[serde(default = "default_attempt_max_age_secs")]
    pub attempt_max_age_secs: u64,
    /// Bottom-tier downgrades convert to this many same-model retries
    #[serde(default = "default_two")]
    pub bottom_tier_retries: u32,
    /// Multiplier on the largest retry budget in the global-exhaustion arm
    #[serde(default = "default_two")]
    pub global_retry_factor: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            retry_budgets: RetryBudgets::default(),
            downgrade_budgets: DowngradeBudgets::default(),
            escalation_budget: default_two(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            capability_delay_ms: default_capability_delay_ms(),
            attempt_max_age_secs: default_attempt_max_age_secs(),
            bottom_tier_retries: default_two(),
            global_retry_factor: default_two(),
        }
    }
}

const fn default_transient_retries() -> u32 {
    3
}
const fn default_two() -> u32 {
    2
}
const fn default_one() -> u32 {
    1
}
const fn default_base_delay_ms() -> u64 {
    1_000
}
const fn default_max_delay_ms() -> u64 {
    16_000
}
const fn default_rate_limit_delay_ms() -> u64 {
    60_000
}
const fn default_capability_delay_ms() -> u64 {
    500
}
const fn default_attempt_max_age_secs() -> u64 {
    300
}
