//! Tier-based model selection with budget and quality constraints

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use rudder_config::{ClassifierConfig, ModelConfig, RouterConfig, TaskKind, Tier};

use crate::analysis::{recommended_tier, Classifier, ClassifyOptions, ComplexityAnalysis};
use crate::error::RoutingError;
use crate::registry::ModelCatalog;

/// Default output-to-input token ratio when the caller gives no estimate
const DEFAULT_OUTPUT_RATIO: f64 = 0.5;

/// Caller-supplied routing constraints
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteOptions<'a> {
    /// Expected output size in tokens
    pub estimated_output_tokens: Option<u64>,
    /// Per-request budget ceiling in USD
    pub max_cost: Option<f64>,
    /// Prefer the task's tier when it outranks the complexity tier
    pub prefer_quality: bool,
    /// Route to this tier regardless of classification
    pub force_tier: Option<Tier>,
    /// Number of source files attached to the request
    pub file_count: usize,
    /// The user's free-form instruction, if any
    pub user_prompt: Option<&'a str>,
}

/// What another tier would have cost
#[derive(Debug, Clone, Serialize)]
pub struct TierAlternative {
    /// That tier's default model
    pub model_id: String,
    /// Estimated cost with the same token counts
    pub cost: f64,
    /// The model's quality score
    pub quality: f64,
}

/// Result of a routing decision
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    /// Selected model identifier
    pub model_id: String,
    /// Selected tier
    pub tier: Tier,
    /// Full profile of the selected model
    pub model: ModelConfig,
    /// Estimated request cost in USD
    pub estimated_cost: f64,
    /// Why this model was selected
    pub reasoning: String,
    /// Per-tier alternatives for transparency
    pub alternatives: BTreeMap<Tier, TierAlternative>,
    /// The classification that drove the decision
    pub complexity: ComplexityAnalysis,
}

/// Cumulative routing statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterStats {
    pub total_routes: u64,
    pub fast_routes: u64,
    pub standard_routes: u64,
    pub advanced_routes: u64,
    pub total_estimated_cost: f64,
}

/// Routes requests to models by complexity, task preference, and budget
pub struct ModelRouter {
    catalog: Arc<ModelCatalog>,
    classifier: Classifier,
    config: RouterConfig,
    routes: [AtomicU64; 3],
    total_cost: Mutex<f64>,
}

impl ModelRouter {
    /// Create a router over a validated catalog
    pub fn new(config: RouterConfig, classifier_config: ClassifierConfig, catalog: Arc<ModelCatalog>) -> Self {
        Self {
            classifier: Classifier::new(classifier_config, Arc::clone(&catalog)),
            catalog,
            config,
            routes: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            total_cost: Mutex::new(0.0),
        }
    }

    /// The catalog this router consults
    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    /// The classifier this router consults
    pub const fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Select a model for a request
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError`] only for catalog misconfiguration; every
    /// well-formed catalog routes every input
    pub fn route(
        &self,
        content: &str,
        task: TaskKind,
        opts: &RouteOptions,
    ) -> Result<RoutingDecision, RoutingError> {
        let complexity = self.classifier.classify(content, task, &ClassifyOptions {
            file_count: opts.file_count,
            user_prompt: opts.user_prompt,
        });

        let mut reasons: Vec<String> = Vec::new();
        let mut tier = recommended_tier(complexity.level, task);
        reasons.push(format!("{} complexity maps to {tier}", complexity.level));

        // Task preference may only upgrade, and only when asked
        if opts.prefer_quality
            && let Some(&preferred) = self.config.task_tiers.get(&task)
            && preferred > tier
        {
            reasons.push(format!("quality preference raises {task} to {preferred}"));
            tier = preferred;
        }

        let forced = opts.force_tier.is_some();
        if let Some(f) = opts.force_tier {
            reasons.push(format!("tier forced to {f}"));
            tier = f;
        }

        let input_tokens = (content.len() as u64).div_ceil(4);
        let output_tokens = opts
            .estimated_output_tokens
            .unwrap_or((input_tokens as f64 * DEFAULT_OUTPUT_RATIO) as u64);

        let mut model = self.catalog.default_for_tier(tier)?;
        let mut cost = model.estimate_cost(input_tokens, output_tokens);

        // Walk strongest-to-cheapest for the first tier inside budget
        if let Some(max_cost) = opts.max_cost
            && cost > max_cost
            && !forced
        {
            let mut fitted = false;
            for candidate in [Tier::Advanced, Tier::Standard, Tier::Fast] {
                let m = self.catalog.default_for_tier(candidate)?;
                let c = m.estimate_cost(input_tokens, output_tokens);
                if c <= max_cost {
                    tier = candidate;
                    model = m;
                    cost = c;
                    reasons.push(format!("budget ${max_cost:.4} fits {candidate}"));
                    fitted = true;
                    break;
                }
            }
            if !fitted {
                reasons.push(format!("no tier fits budget ${max_cost:.4}; keeping {tier}"));
            }
        }

        // The advanced tier may be disabled wholesale
        if tier == Tier::Advanced && !self.config.enable_advanced_tier {
            tier = Tier::Standard;
            model = self.catalog.default_for_tier(tier)?;
            cost = model.estimate_cost(input_tokens, output_tokens);
            reasons.push("advanced tier disabled; using standard".to_owned());
        }

        let mut alternatives = BTreeMap::new();
        for t in [Tier::Fast, Tier::Standard, Tier::Advanced] {
            let m = self.catalog.default_for_tier(t)?;
            alternatives.insert(t, TierAlternative {
                model_id: m.id.clone(),
                cost: m.estimate_cost(input_tokens, output_tokens),
                quality: m.quality_score,
            });
        }

        self.record_route(tier, cost);

        let decision = RoutingDecision {
            model_id: model.id.clone(),
            tier,
            model: model.clone(),
            estimated_cost: cost,
            reasoning: reasons.join("; "),
            alternatives,
            complexity,
        };

        tracing::info!(
            model = %decision.model_id,
            tier = %decision.tier,
            cost = decision.estimated_cost,
            "routing decision made"
        );

        Ok(decision)
    }

    /// Cheap model selection for low-stakes callers
    ///
    /// Skips cost estimation and alternatives, using only the quick length
    /// heuristic.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError`] only for catalog misconfiguration
    pub fn quick_route(&self, content: &str, task: TaskKind) -> Result<String, RoutingError> {
        let level = self.classifier.quick_classify(content, task);
        let mut tier = recommended_tier(level, task);
        if tier == Tier::Advanced && !self.config.enable_advanced_tier {
            tier = Tier::Standard;
        }
        Ok(self.catalog.default_for_tier(tier)?.id.clone())
    }

    /// Snapshot of cumulative routing statistics
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            total_routes: self.routes.iter().map(|c| c.load(Ordering::Relaxed)).sum(),
            fast_routes: self.routes[0].load(Ordering::Relaxed),
            standard_routes: self.routes[1].load(Ordering::Relaxed),
            advanced_routes: self.routes[2].load(Ordering::Relaxed),
            total_estimated_cost: *self.total_cost.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
        }
    }

    fn record_route(&self, tier: Tier, cost: f64) {
        let slot = match tier {
            Tier::Fast => 0,
            Tier::Standard => 1,
            Tier::Advanced => 2,
        };
        self.routes[slot].fetch_add(1, Ordering::Relaxed);
        let mut total = self
            .total_cost
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *total += cost;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_config::ClassifierConfig;

    fn router_with(config: RouterConfig) -> ModelRouter {
        let catalog = Arc::new(ModelCatalog::from_config(&config).unwrap());
        ModelRouter::new(config, ClassifierConfig::default(), catalog)
    }

    fn router() -> ModelRouter {
        router_with(RouterConfig::default())
    }

    #[test]
    fn simple_qa_routes_to_fast_default() {
        let decision = router()
            .route("short text", TaskKind::Qa, &RouteOptions::default())
            .unwrap();
        assert_eq!(decision.tier, Tier::Fast);
        assert_eq!(decision.model_id, "claude-haiku-4-5");
    }

    #[test]
    fn estimated_cost_matches_documented_formula() {
        let content = "a".repeat(4_000);
        let decision = router()
            .route(content.as_str(), TaskKind::Qa, &RouteOptions {
                estimated_output_tokens: Some(500),
                ..RouteOptions::default()
            })
            .unwrap();

        let input_tokens = 1_000.0; // ceil(4000 / 4)
        let expected = input_tokens / 1e6 * decision.model.input_cost_per_mtok
            + 500.0 / 1e6 * decision.model.output_cost_per_mtok;
        assert!((decision.estimated_cost - expected).abs() < 1e-12);
    }

    #[test]
    fn prefer_quality_upgrades_to_task_tier() {
        let decision = router()
            .route("short text", TaskKind::Roadmap, &RouteOptions {
                prefer_quality: true,
                ..RouteOptions::default()
            })
            .unwrap();
        // Roadmap prefers advanced even though the content is simple
        assert_eq!(decision.tier, Tier::Advanced);
    }

    #[test]
    fn force_tier_overrides_classification() {
        let decision = router()
            .route("short text", TaskKind::Qa, &RouteOptions {
                force_tier: Some(Tier::Advanced),
                ..RouteOptions::default()
            })
            .unwrap();
        assert_eq!(decision.tier, Tier::Advanced);
        // Classification is still reported
        assert_eq!(decision.complexity.level.to_string(), "simple");
    }

    #[test]
    fn budget_walk_picks_first_fitting_tier() {
        let content = "a".repeat(40_000);
        let decision = router()
            .route(content.as_str(), TaskKind::Report, &RouteOptions {
                prefer_quality: true,
                max_cost: Some(0.02),
                estimated_output_tokens: Some(1_000),
                ..RouteOptions::default()
            })
            .unwrap();
        // 10k input tokens: advanced ~= $0.225, standard ~= $0.045, fast ~= $0.015
        assert_eq!(decision.tier, Tier::Fast);
        assert!(decision.estimated_cost <= 0.02);
    }

    #[test]
    fn impossible_budget_keeps_over_budget_choice() {
        let content = "a".repeat(40_000);
        let decision = router()
            .route(content.as_str(), TaskKind::Qa, &RouteOptions {
                max_cost: Some(0.0),
                ..RouteOptions::default()
            })
            .unwrap();
        assert!(decision.estimated_cost > 0.0);
        assert!(decision.reasoning.contains("no tier fits"));
    }

    #[test]
    fn forced_tier_ignores_budget() {
        let content = "a".repeat(40_000);
        let decision = router()
            .route(content.as_str(), TaskKind::Qa, &RouteOptions {
                force_tier: Some(Tier::Advanced),
                max_cost: Some(0.0),
                ..RouteOptions::default()
            })
            .unwrap();
        assert_eq!(decision.tier, Tier::Advanced);
    }

    #[test]
    fn advanced_disabled_never_routes_advanced() {
        let mut config = RouterConfig::default();
        config.enable_advanced_tier = false;
        let router = router_with(config);

        let heavy = "# Plan\n```rust\nfn main() {}\n```\n".repeat(200);
        for (content, task, opts) in [
            (heavy.as_str(), TaskKind::Roadmap, RouteOptions {
                prefer_quality: true,
                ..RouteOptions::default()
            }),
            ("short", TaskKind::Qa, RouteOptions {
                force_tier: Some(Tier::Advanced),
                ..RouteOptions::default()
            }),
        ] {
            let decision = router.route(content, task, &opts).unwrap();
            assert_ne!(decision.tier, Tier::Advanced);
            assert_ne!(decision.model.tier, Tier::Advanced);
        }

        let quick = router.quick_route(&heavy, TaskKind::Roadmap).unwrap();
        assert_ne!(quick, "claude-opus-4-1");
    }

    #[test]
    fn alternatives_cover_all_tiers() {
        let decision = router()
            .route("some document body", TaskKind::Document, &RouteOptions::default())
            .unwrap();
        assert_eq!(decision.alternatives.len(), 3);
        let fast = &decision.alternatives[&Tier::Fast];
        let advanced = &decision.alternatives[&Tier::Advanced];
        assert!(fast.cost < advanced.cost);
        assert!(fast.quality < advanced.quality);
    }

    #[test]
    fn route_accumulates_stats() {
        let router = router();
        assert_eq!(router.stats().total_routes, 0);

        router
            .route("short text", TaskKind::Qa, &RouteOptions::default())
            .unwrap();
        router
            .route("short text", TaskKind::Qa, &RouteOptions {
                force_tier: Some(Tier::Advanced),
                ..RouteOptions::default()
            })
            .unwrap();

        let stats = router.stats();
        assert_eq!(stats.total_routes, 2);
        assert_eq!(stats.fast_routes, 1);
        assert_eq!(stats.advanced_routes, 1);
        assert!(stats.total_estimated_cost > 0.0);
    }

    #[test]
    fn quick_route_uses_length_heuristic_only() {
        let router = router();
        assert_eq!(
            router.quick_route("hi", TaskKind::Qa).unwrap(),
            "claude-haiku-4-5"
        );
        let long = "a".repeat(20_000);
        assert_eq!(
            router.quick_route(&long, TaskKind::Roadmap).unwrap(),
            "claude-opus-4-1"
        );
    }
}
