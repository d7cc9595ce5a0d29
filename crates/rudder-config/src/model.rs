//! Model catalog and routing preference configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::ConfigError;

/// Coarse model capability/cost bucket, ordered cheapest to strongest
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tier {
    Fast,
    Standard,
    Advanced,
}

impl Tier {
    /// The next stronger tier, if any
    pub const fn next_up(self) -> Option<Self> {
        match self {
            Self::Fast => Some(Self::Standard),
            Self::Standard => Some(Self::Advanced),
            Self::Advanced => None,
        }
    }

    /// The next cheaper tier, if any
    pub const fn next_down(self) -> Option<Self> {
        match self {
            Self::Advanced => Some(Self::Standard),
            Self::Standard => Some(Self::Fast),
            Self::Fast => None,
        }
    }
}

/// Kind of content-generation task a request represents
///
/// Task tokens arrive as free-form strings from the host; unrecognized
/// tokens behave as [`TaskKind::Document`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TaskKind {
    Document,
    Report,
    Roadmap,
    Slides,
    Summary,
    Qa,
}

impl TaskKind {
    /// Parse a task token, defaulting to `Document` for unknown input
    pub fn parse_token(token: &str) -> Self {
        token.trim().parse().unwrap_or(Self::Document)
    }
}

/// Static pricing/capability profile for one backend model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Model identifier as the transport layer expects it
    pub id: String,
    /// Capability/cost tier
    pub tier: Tier,
    /// Cost per million input tokens (USD)
    pub input_cost_per_mtok: f64,
    /// Cost per million output tokens (USD)
    pub output_cost_per_mtok: f64,
    /// Maximum output tokens the model can produce
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Context window in tokens
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    /// Relative quality score (0.0 to 1.0)
    pub quality_score: f64,
    /// Whether the model supports structured (schema-constrained) output
    #[serde(default)]
    pub supports_structured_output: bool,
}

impl ModelConfig {
    /// Estimate the cost of a request with the given token counts
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_mtok;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_mtok;
        input_cost + output_cost
    }
}

const fn default_max_output_tokens() -> u32 {
    8_192
}

const fn default_context_window() -> u32 {
    200_000
}

/// Model catalog and per-task routing preferences
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// All routable models
    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,
    /// Default model id per tier
    #[serde(default = "default_tier_defaults")]
    pub tier_defaults: HashMap<Tier, String>,
    /// Preferred tier per task kind, used when the caller asks for quality
    #[serde(default = "default_task_tiers")]
    pub task_tiers: HashMap<TaskKind, Tier>,
    /// Whether the advanced tier may be selected at all
    #[serde(default = "default_true")]
    pub enable_advanced_tier: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            tier_defaults: default_tier_defaults(),
            task_tiers: default_task_tiers(),
            enable_advanced_tier: true,
        }
    }
}

impl RouterConfig {
    /// Validate catalog integrity
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the catalog is empty, a tier default is
    /// missing, or a tier default names an id absent from the catalog
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }
        for tier in Tier::iter() {
            let Some(id) = self.tier_defaults.get(&tier) else {
                return Err(ConfigError::MissingTierDefault { tier });
            };
            if !self.models.iter().any(|m| m.id == *id) {
                return Err(ConfigError::UnknownTierDefault {
                    tier,
                    id: id.clone(),
                });
            }
        }
        Ok(())
    }
}

const fn default_true() -> bool {
    true
}

fn default_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig {
            id: "claude-haiku-4-5".to_owned(),
            tier: Tier::Fast,
            input_cost_per_mtok: 1.0,
            output_cost_per_mtok: 5.0,
            max_output_tokens: 8_192,
            context_window: 200_000,
            quality_score: 0.76,
            supports_structured_output: true,
        },
        ModelConfig {
            id: "claude-sonnet-4-5".to_owned(),
            tier: Tier::Standard,
            input_cost_per_mtok: 3.0,
            output_cost_per_mtok: 15.0,
            max_output_tokens: 16_384,
            context_window: 200_000,
            quality_score: 0.90,
            supports_structured_output: true,
        },
        ModelConfig {
            id: "claude-opus-4-1".to_owned(),
            tier: Tier::Advanced,
            input_cost_per_mtok: 15.0,
            output_cost_per_mtok: 75.0,
            max_output_tokens: 32_768,
            context_window: 200_000,
            quality_score: 0.97,
            supports_structured_output: true,
        },
    ]
}

fn default_tier_defaults() -> HashMap<Tier, String> {
    HashMap::from([
        (Tier::Fast, "claude-haiku-4-5".to_owned()),
        (Tier::Standard, "claude-sonnet-4-5".to_owned()),
        (Tier::Advanced, "claude-opus-4-1".to_owned()),
    ])
}

fn default_task_tiers() -> HashMap<TaskKind, Tier> {
    HashMap::from([
        (TaskKind::Qa, Tier::Fast),
        (TaskKind::Summary, Tier::Fast),
        (TaskKind::Document, Tier::Standard),
        (TaskKind::Slides, Tier::Standard),
        (TaskKind::Report, Tier::Advanced),
        (TaskKind::Roadmap, Tier::Advanced),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering() {
        assert!(Tier::Fast < Tier::Standard);
        assert!(Tier::Standard < Tier::Advanced);
        assert_eq!(Tier::Fast.next_up(), Some(Tier::Standard));
        assert_eq!(Tier::Advanced.next_up(), None);
        assert_eq!(Tier::Fast.next_down(), None);
    }

    #[test]
    fn task_token_parsing() {
        assert_eq!(TaskKind::parse_token("qa"), TaskKind::Qa);
        assert_eq!(TaskKind::parse_token("Roadmap"), TaskKind::Roadmap);
        assert_eq!(TaskKind::parse_token("weird-token"), TaskKind::Document);
        assert_eq!(TaskKind::parse_token(""), TaskKind::Document);
    }

    #[test]
    fn estimate_cost_formula() {
        let model = &default_models()[1];
        let cost = model.estimate_cost(1_000_000, 500_000);
        // 1M * 3.0/1M + 0.5M * 15.0/1M = 3.0 + 7.5
        assert!((cost - 10.5).abs() < 1e-9);
    }

    #[test]
    fn default_catalog_validates() {
        RouterConfig::default().validate().unwrap();
    }

    #[test]
    fn missing_tier_default_is_rejected() {
        let mut config = RouterConfig::default();
        config.tier_defaults.remove(&Tier::Advanced);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingTierDefault { tier: Tier::Advanced })
        ));
    }

    #[test]
    fn dangling_tier_default_is_rejected() {
        let mut config = RouterConfig::default();
        config
            .tier_defaults
            .insert(Tier::Fast, "no-such-model".to_owned());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownTierDefault { .. })
        ));
    }
}
