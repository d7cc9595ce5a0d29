//! Performance tuner mode, timeout, and concurrency configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::ConfigError;

/// How aggressively the tuner adapts the concurrency ceiling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TuneMode {
    /// Advisories only, biased toward lowering load
    Conservative,
    /// Advisories only
    #[default]
    Balanced,
    /// Advisories only, biased toward raising load
    Aggressive,
    /// Applies aggregate ±1 concurrency adjustments
    Auto,
}

/// Performance tuner configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunerConfig {
    /// Tuning mode for `auto_tune`
    #[serde(default)]
    pub mode: TuneMode,
    /// Base timeout in seconds per content type
    #[serde(default = "default_base_timeout_secs")]
    pub base_timeout_secs: HashMap<String, u64>,
    /// Base timeout for content types without an explicit entry
    #[serde(default = "default_fallback_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Multiplier applied to the base timeout
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: f64,
    /// Timeout floor in seconds
    #[serde(default = "default_min_timeout_secs")]
    pub min_timeout_secs: u64,
    /// Timeout ceiling in seconds
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,
    /// Starting concurrency ceiling
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,
    /// Lowest the ceiling may adapt to
    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: usize,
    /// Highest the ceiling may adapt to
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Jobs released per batch round
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between batch rounds in milliseconds
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Sliding statistics window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            mode: TuneMode::default(),
            base_timeout_secs: default_base_timeout_secs(),
            default_timeout_secs: default_fallback_timeout_secs(),
            timeout_multiplier: default_timeout_multiplier(),
            min_timeout_secs: default_min_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            default_concurrency: default_concurrency(),
            min_concurrency: default_min_concurrency(),
            max_concurrency: default_max_concurrency(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            window_secs: default_window_secs(),
        }
    }
}

impl TunerConfig {
    /// Base timeout in seconds for a content type
    pub fn base_timeout(&self, content_type: &str) -> u64 {
        self.base_timeout_secs
            .get(content_type)
            .copied()
            .unwrap_or(self.default_timeout_secs)
    }

    /// Validate timeout and concurrency bounds
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvertedBounds`] when a floor exceeds its
    /// ceiling or the starting concurrency falls outside its bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_timeout_secs > self.max_timeout_secs {
            return Err(ConfigError::InvertedBounds { what: "tuner timeout" });
        }
        if self.min_concurrency > self.max_concurrency
            || !(self.min_concurrency..=self.max_concurrency).contains(&self.default_concurrency)
        {
            return Err(ConfigError::InvertedBounds {
                what: "tuner concurrency",
            });
        }
        Ok(())
    }
}

fn default_base_timeout_secs() -> HashMap<String, u64> {
    HashMap::from([
        ("document".to_owned(), 90),
        ("report".to_owned(), 120),
        ("roadmap".to_owned(), 120),
        ("slides".to_owned(), 90),
        ("summary".to_owned(), 45),
        ("qa".to_owned(), 30),
    ])
}

const fn default_fallback_timeout_secs() -> u64 {
    60
}

const fn default_timeout_multiplier() -> f64 {
    1.0
}

const fn default_min_timeout_secs() -> u64 {
    30
}

const fn default_max_timeout_secs() -> u64 {
    600
}

const fn default_concurrency() -> usize {
    4
}

const fn default_min_concurrency() -> usize {
    1
}

const fn default_max_concurrency() -> usize {
    8
}

const fn default_batch_size() -> usize {
    5
}

const fn default_batch_delay_ms() -> u64 {
    1_000
}

const fn default_window_secs() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        TunerConfig::default().validate().unwrap();
    }

    #[test]
    fn out_of_bounds_default_concurrency_is_rejected() {
        let mut config = TunerConfig::default();
        config.default_concurrency = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn mode_tokens() {
        assert_eq!("auto".parse::<TuneMode>().unwrap(), TuneMode::Auto);
        assert_eq!(TuneMode::Conservative.to_string(), "conservative");
    }
}
