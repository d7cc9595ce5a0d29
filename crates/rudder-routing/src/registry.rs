//! Model catalog keyed by id, with per-tier defaults
//!
//! The catalog is built once from configuration and validated up front:
//! every tier must have a default model and every default must exist. After
//! construction, lookups of ids the catalog handed out cannot fail; lookups
//! of caller-supplied ids surface `UnknownModel` instead of degrading to a
//! zero-cost estimate.

use std::collections::HashMap;

use rudder_config::{ModelConfig, RouterConfig, Tier};

use crate::error::RoutingError;

/// Immutable registry of routable models
#[derive(Debug)]
pub struct ModelCatalog {
    by_id: HashMap<String, ModelConfig>,
    tier_defaults: HashMap<Tier, String>,
}

impl ModelCatalog {
    /// Build a catalog from configuration
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::EmptyCatalog`] for an empty model list and
    /// [`RoutingError::NoTierDefault`] / [`RoutingError::UnknownModel`] when
    /// a tier default is missing or dangling
    pub fn from_config(config: &RouterConfig) -> Result<Self, RoutingError> {
        if config.models.is_empty() {
            return Err(RoutingError::EmptyCatalog);
        }

        let by_id: HashMap<String, ModelConfig> = config
            .models
            .iter()
            .map(|m| (m.id.clone(), m.clone()))
            .collect();

        for tier in [Tier::Fast, Tier::Standard, Tier::Advanced] {
            let id = config
                .tier_defaults
                .get(&tier)
                .ok_or(RoutingError::NoTierDefault { tier })?;
            if !by_id.contains_key(id) {
                return Err(RoutingError::UnknownModel { id: id.clone() });
            }
        }

        Ok(Self {
            by_id,
            tier_defaults: config.tier_defaults.clone(),
        })
    }

    /// Look up a model by id
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::UnknownModel`] for ids outside the catalog —
    /// a misconfigured id is fatal, never a silent zero-cost estimate
    pub fn get(&self, id: &str) -> Result<&ModelConfig, RoutingError> {
        self.by_id.get(id).ok_or_else(|| RoutingError::UnknownModel {
            id: id.to_owned(),
        })
    }

    /// The default model for a tier
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::NoTierDefault`] if the tier has no default
    /// (impossible for catalogs built through `from_config`)
    pub fn default_for_tier(&self, tier: Tier) -> Result<&ModelConfig, RoutingError> {
        let id = self
            .tier_defaults
            .get(&tier)
            .ok_or(RoutingError::NoTierDefault { tier })?;
        self.get(id)
    }

    /// All models in a tier
    pub fn models_in_tier(&self, tier: Tier) -> Vec<&ModelConfig> {
        let mut models: Vec<&ModelConfig> = self.by_id.values().filter(|m| m.tier == tier).collect();
        models.sort_by(|a, b| {
            b.quality_score
                .partial_cmp(&a.quality_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        models
    }

    /// The tier a known model belongs to
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::UnknownModel`] for ids outside the catalog
    pub fn tier_of(&self, id: &str) -> Result<Tier, RoutingError> {
        self.get(id).map(|m| m.tier)
    }
}
