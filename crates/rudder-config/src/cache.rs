//! Artifact cache bounds, TTL, and eviction configuration

use std::collections::HashMap;

use serde::Deserialize;
use strum::{Display, EnumString};

use crate::ConfigError;

/// Which entry to evict when the cache is over its bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently accessed first
    Lru,
    /// Least frequently accessed first
    Lfu,
    /// Oldest insertion first
    Fifo,
    /// Lowest adaptive score first (access count, quality, recency, age)
    #[default]
    Adaptive,
}

/// Artifact cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of live entries
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Maximum tracked bytes across all entries
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,
    /// Eviction policy
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,
    /// Base TTL in seconds per content type
    #[serde(default = "default_base_ttl_secs")]
    pub base_ttl_secs: HashMap<String, u64>,
    /// Base TTL for content types without an explicit entry
    #[serde(default = "default_fallback_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Adaptive TTL floor
    #[serde(default = "default_min_ttl_secs")]
    pub min_ttl_secs: u64,
    /// Adaptive TTL ceiling
    #[serde(default = "default_max_ttl_secs")]
    pub max_ttl_secs: u64,
    /// Jaccard similarity needed for a prompt to enter the candidate set
    #[serde(default = "default_similarity_search")]
    pub similarity_search_threshold: f64,
    /// Jaccard similarity needed for the best candidate to be returned
    #[serde(default = "default_similarity_return")]
    pub similarity_return_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_memory_bytes: default_max_memory_bytes(),
            eviction_policy: EvictionPolicy::default(),
            base_ttl_secs: default_base_ttl_secs(),
            default_ttl_secs: default_fallback_ttl_secs(),
            min_ttl_secs: default_min_ttl_secs(),
            max_ttl_secs: default_max_ttl_secs(),
            similarity_search_threshold: default_similarity_search(),
            similarity_return_threshold: default_similarity_return(),
        }
    }
}

impl CacheConfig {
    /// Base TTL in seconds for a content type
    pub fn base_ttl(&self, content_type: &str) -> u64 {
        self.base_ttl_secs
            .get(content_type)
            .copied()
            .unwrap_or(self.default_ttl_secs)
    }

    /// Validate TTL bounds
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvertedBounds`] when the TTL floor exceeds
    /// the ceiling
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_ttl_secs > self.max_ttl_secs {
            return Err(ConfigError::InvertedBounds { what: "cache ttl" });
        }
        Ok(())
    }
}

const fn default_max_entries() -> usize {
    500
}

const fn default_max_memory_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_base_ttl_secs() -> HashMap<String, u64> {
    HashMap::from([
        ("document".to_owned(), 3_600),
        ("report".to_owned(), 3_600),
        ("roadmap".to_owned(), 7_200),
        ("slides".to_owned(), 3_600),
        ("summary".to_owned(), 1_800),
        ("qa".to_owned(), 900),
    ])
}

const fn default_fallback_ttl_secs() -> u64 {
    3_600
}

const fn default_min_ttl_secs() -> u64 {
    300
}

const fn default_max_ttl_secs() -> u64 {
    86_400
}

const fn default_similarity_search() -> f64 {
    0.85
}

const fn default_similarity_return() -> f64 {
    0.90
}
