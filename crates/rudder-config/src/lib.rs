//! Construction-time configuration for the rudder decision layer
//!
//! Every knob is optional and defaulted; the host builds a [`Config`] in
//! memory (or deserializes one from its own settings file) and hands it to
//! the component constructors. This crate performs no file or network I/O.

#![allow(clippy::must_use_candidate)]

pub mod cache;
pub mod classifier;
pub mod fallback;
pub mod model;
pub mod tuner;

use serde::Deserialize;
use thiserror::Error;

pub use cache::{CacheConfig, EvictionPolicy};
pub use classifier::{ClassifierConfig, FactorWeights, LevelThresholds};
pub use fallback::{DowngradeBudgets, FallbackConfig, RetryBudgets};
pub use model::{ModelConfig, RouterConfig, TaskKind, Tier};
pub use tuner::{TuneMode, TunerConfig};

/// Top-level rudder configuration
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Model catalog and routing preferences
    #[serde(default)]
    pub router: RouterConfig,
    /// Complexity classifier weights and thresholds
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Fallback budgets and delay constants
    #[serde(default)]
    pub fallback: FallbackConfig,
    /// Cache bounds, TTL, and eviction policy
    #[serde(default)]
    pub cache: CacheConfig,
    /// Performance tuner mode, timeouts, and concurrency
    #[serde(default)]
    pub tuner: TunerConfig,
}

impl Config {
    /// Validate the full configuration
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found in any section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.router.validate()?;
        self.classifier.validate()?;
        self.cache.validate()?;
        self.tuner.validate()?;
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The model catalog has no entries
    #[error("model catalog is empty")]
    EmptyCatalog,

    /// A tier's default model id is missing from the catalog
    #[error("default model '{id}' for tier '{tier}' is not in the catalog")]
    UnknownTierDefault { tier: Tier, id: String },

    /// A tier has no default model configured
    #[error("no default model configured for tier '{tier}'")]
    MissingTierDefault { tier: Tier },

    /// Classifier factor weights do not sum to 1.0
    #[error("classifier factor weights sum to {sum}, expected 1.0")]
    WeightSum { sum: f64 },

    /// Level thresholds are not strictly increasing in (0, 1)
    #[error("complexity level thresholds must be strictly increasing within (0, 1)")]
    ThresholdOrder,

    /// A numeric bound pair is inverted
    #[error("{what}: lower bound exceeds upper bound")]
    InvertedBounds { what: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn deserializes_from_empty_document() {
        let config: Config = serde_json::from_str("{}").unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn unknown_field_is_rejected() {
        let result: Result<Config, _> = serde_json::from_str(r#"{"transport": {}}"#);
        assert!(result.is_err());
    }
}
