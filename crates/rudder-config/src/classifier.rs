//! Complexity classifier weights, thresholds, and per-task baselines

use std::collections::HashMap;

use serde::Deserialize;

use crate::model::TaskKind;
use crate::ConfigError;

/// Weights for the six complexity factors; must sum to 1.0
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactorWeights {
    #[serde(default = "default_length")]
    pub length: f64,
    #[serde(default = "default_structure")]
    pub structure: f64,
    #[serde(default = "default_entity")]
    pub entity_density: f64,
    #[serde(default = "default_temporal")]
    pub temporal_density: f64,
    #[serde(default = "default_technical")]
    pub technical_density: f64,
    #[serde(default = "default_task")]
    pub task: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            length: default_length(),
            structure: default_structure(),
            entity_density: default_entity(),
            temporal_density: default_temporal(),
            technical_density: default_technical(),
            task: default_task(),
        }
    }
}

impl FactorWeights {
    /// Sum of all six weights
    pub fn sum(&self) -> f64 {
        self.length
            + self.structure
            + self.entity_density
            + self.temporal_density
            + self.technical_density
            + self.task
    }
}

const fn default_length() -> f64 {
    0.25
}
const fn default_structure() -> f64 {
    0.20
}
const fn default_entity() -> f64 {
    0.15
}
const fn default_temporal() -> f64 {
    0.15
}
const fn default_technical() -> f64 {
    0.10
}
const fn default_task() -> f64 {
    0.15
}

/// Score cut points separating the four complexity levels
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelThresholds {
    /// Scores below this are simple
    #[serde(default = "default_simple")]
    pub simple: f64,
    /// Scores below this (and at or above `simple`) are medium
    #[serde(default = "default_medium")]
    pub medium: f64,
    /// Scores below this are complex; at or above, very complex
    #[serde(default = "default_complex")]
    pub complex: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            simple: default_simple(),
            medium: default_medium(),
            complex: default_complex(),
        }
    }
}

const fn default_simple() -> f64 {
    0.3
}
const fn default_medium() -> f64 {
    0.6
}
const fn default_complex() -> f64 {
    0.85
}

/// Complexity classifier configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Factor weights (sum to 1.0)
    #[serde(default)]
    pub weights: FactorWeights,
    /// Level cut points
    #[serde(default)]
    pub thresholds: LevelThresholds,
    /// Inherent complexity baseline per task kind (0.2 to 0.7)
    #[serde(default = "default_task_bases")]
    pub task_bases: HashMap<TaskKind, f64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            thresholds: LevelThresholds::default(),
            task_bases: default_task_bases(),
        }
    }
}

impl ClassifierConfig {
    /// Inherent baseline for a task, defaulting unknown entries to 0.4
    pub fn task_base(&self, task: TaskKind) -> f64 {
        self.task_bases.get(&task).copied().unwrap_or(0.4)
    }

    /// Validate weights and thresholds
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::WeightSum`] when the weights do not sum to 1.0
    /// and [`ConfigError::ThresholdOrder`] when the cut points are not
    /// strictly increasing within (0, 1)
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::WeightSum { sum });
        }
        let t = self.thresholds;
        if !(t.simple > 0.0 && t.simple < t.medium && t.medium < t.complex && t.complex < 1.0) {
            return Err(ConfigError::ThresholdOrder);
        }
        Ok(())
    }
}

fn default_task_bases() -> HashMap<TaskKind, f64> {
    HashMap::from([
        (TaskKind::Qa, 0.2),
        (TaskKind::Summary, 0.3),
        (TaskKind::Document, 0.4),
        (TaskKind::Slides, 0.5),
        (TaskKind::Report, 0.6),
        (TaskKind::Roadmap, 0.7),
    ])
}
