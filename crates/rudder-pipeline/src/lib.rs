//! Per-request optimization façade for rudder
//!
//! Wires the router, cache, and tuner into one pre-call pass and feeds
//! outcomes back after the call. The pipeline is built once by the
//! application root and passed by reference — there are no global
//! singletons, and collaborators like the prompt-variant optimizer are
//! injected behind a trait.
//!
//! The pipeline never consults the fallback manager: callers drive it
//! directly on each attempt error and call its `record_success` once an
//! attempt chain ends. The manager is owned here only so construction and
//! housekeeping have a single home.

#![allow(clippy::must_use_candidate)]

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use rudder_cache::{content_digest, generate_key, CacheHit, GetOptions, ResponseCache, SetOptions};
use rudder_config::{Config, ConfigError, TaskKind, Tier};
use rudder_fallback::FallbackManager;
use rudder_routing::{ModelCatalog, ModelRouter, RouteOptions, RoutingDecision, RoutingError};
use rudder_tuner::{OptimizedSettings, PerformanceTuner, RequestOutcome};

/// Errors from assembling the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// One content-generation request as the host describes it
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Host-assigned id; also keys fallback attempt state
    pub id: String,
    /// Task kind; its token doubles as the cache/tuner content type
    pub task: TaskKind,
    /// The user's instruction
    pub prompt: String,
    /// Source content the generation works from
    pub content: String,
    /// Digest of the source content; computed from `content` when absent
    pub content_hash: Option<String>,
    /// Expected output size in tokens
    pub estimated_output_tokens: Option<u64>,
    /// Per-request budget ceiling in USD
    pub max_cost: Option<f64>,
    /// Prefer the task's tier when it outranks the complexity tier
    pub prefer_quality: bool,
    /// Route to this tier regardless of classification
    pub force_tier: Option<Tier>,
    /// Number of source files attached
    pub file_count: usize,
}

impl GenerationRequest {
    /// A request with all optional knobs at their defaults
    pub fn new(id: impl Into<String>, task: TaskKind, prompt: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task,
            prompt: prompt.into(),
            content: content.into(),
            content_hash: None,
            estimated_output_tokens: None,
            max_cost: None,
            prefer_quality: false,
            force_tier: None,
            file_count: 0,
        }
    }
}

/// Outcome of one generation attempt chain, as the host reports it
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub success: bool,
    /// The generated artifact, present on success
    pub output: Option<serde_json::Value>,
    /// Opaque caller-supplied quality in [0, 1]
    pub quality_score: Option<f64>,
    pub latency: Duration,
    pub timed_out: bool,
    pub error: Option<String>,
}

/// A stage the pipeline fired for a request
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    CacheHit {
        /// Jaccard score when served by similarity matching
        similarity: Option<f64>,
    },
    Routed {
        model_id: String,
        tier: Tier,
    },
    VariantSelected {
        variant_id: String,
    },
    Tuned {
        timeout_secs: u64,
        can_start_now: bool,
    },
}

/// A request augmented with the pipeline's decisions
#[derive(Debug, Clone)]
pub struct OptimizedRequest {
    pub request: GenerationRequest,
    /// Key the result will be cached under
    pub cache_key: String,
    /// Cached artifact; when present everything else is skipped
    pub cached: Option<CacheHit>,
    pub routing: Option<RoutingDecision>,
    pub variant_id: Option<String>,
    pub settings: Option<OptimizedSettings>,
    /// Trace of stages fired, in order
    pub optimizations: Vec<Stage>,
}

/// Seam to the prompt-variant experimentation subsystem
///
/// That subsystem is external; the pipeline only consumes "which variant
/// id won" and reports outcomes back.
pub trait VariantSelector: Send + Sync {
    /// Pick a prompt variant for the request, if any applies
    fn select(&self, request: &GenerationRequest) -> Option<String>;

    /// Report how the chosen variant fared
    fn record_outcome(&self, request: &GenerationRequest, variant_id: &str, success: bool);
}

/// Default selector for hosts without prompt experimentation
pub struct NoVariants;

impl VariantSelector for NoVariants {
    fn select(&self, _request: &GenerationRequest) -> Option<String> {
        None
    }

    fn record_outcome(&self, _request: &GenerationRequest, _variant_id: &str, _success: bool) {}
}

/// The per-request optimization pipeline
pub struct Pipeline {
    router: Arc<ModelRouter>,
    cache: Arc<ResponseCache>,
    tuner: Arc<PerformanceTuner>,
    fallback: Arc<FallbackManager>,
    variants: Arc<dyn VariantSelector>,
}

impl Pipeline {
    /// Assemble every component from one validated configuration
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the configuration fails validation or
    /// the model catalog cannot be built
    pub fn from_config(config: Config) -> Result<Self, PipelineError> {
        config.validate()?;

        let catalog = Arc::new(ModelCatalog::from_config(&config.router)?);
        let top_tier = if config.router.enable_advanced_tier {
            Tier::Advanced
        } else {
            Tier::Standard
        };

        let router = Arc::new(ModelRouter::new(
            config.router,
            config.classifier,
            Arc::clone(&catalog),
        ));
        let fallback =
            Arc::new(FallbackManager::new(config.fallback, catalog).with_top_tier(top_tier));

        Ok(Self {
            router,
            cache: Arc::new(ResponseCache::new(config.cache)),
            tuner: Arc::new(PerformanceTuner::new(config.tuner)),
            fallback,
            variants: Arc::new(NoVariants),
        })
    }

    /// Replace the variant selector seam
    #[must_use]
    pub fn with_variant_selector(mut self, variants: Arc<dyn VariantSelector>) -> Self {
        self.variants = variants;
        self
    }

    /// Run the pre-call pass for a request
    ///
    /// A cache hit (exact or similarity) short-circuits; otherwise the
    /// request is routed, a prompt variant is chosen, and the tuner's
    /// timeout/admission guidance is attached.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError`] only for catalog misconfiguration
    pub fn optimize_request(&self, request: &GenerationRequest) -> Result<OptimizedRequest, RoutingError> {
        let content_type = request.task.to_string();
        let content_hash = request
            .content_hash
            .clone()
            .unwrap_or_else(|| content_digest(&request.content));
        let cache_key = generate_key(&content_type, &request.prompt, &content_hash);

        let mut optimizations = Vec::new();

        if let Some(hit) = self.cache.get(&cache_key, &GetOptions {
            allow_similar: true,
            prompt: Some(&request.prompt),
            content_type: Some(&content_type),
        }) {
            tracing::debug!(request_id = %request.id, similarity = ?hit.similarity, "served from cache");
            optimizations.push(Stage::CacheHit {
                similarity: hit.similarity,
            });
            return Ok(OptimizedRequest {
                request: request.clone(),
                cache_key,
                cached: Some(hit),
                routing: None,
                variant_id: None,
                settings: None,
                optimizations,
            });
        }

        let routing = self.router.route(&request.content, request.task, &RouteOptions {
            estimated_output_tokens: request.estimated_output_tokens,
            max_cost: request.max_cost,
            prefer_quality: request.prefer_quality,
            force_tier: request.force_tier,
            file_count: request.file_count,
            user_prompt: Some(&request.prompt),
        })?;
        optimizations.push(Stage::Routed {
            model_id: routing.model_id.clone(),
            tier: routing.tier,
        });

        let variant_id = self.variants.select(request);
        if let Some(id) = &variant_id {
            optimizations.push(Stage::VariantSelected {
                variant_id: id.clone(),
            });
        }

        let settings = self.tuner.optimized_settings(&content_type);
        optimizations.push(Stage::Tuned {
            timeout_secs: settings.timeout.as_secs(),
            can_start_now: settings.can_start_now,
        });

        Ok(OptimizedRequest {
            request: request.clone(),
            cache_key,
            cached: None,
            routing: Some(routing),
            variant_id,
            settings: Some(settings),
            optimizations,
        })
    }

    /// Feed a terminal outcome back into the cache and tuner
    ///
    /// Successful outputs are cached under the request's key; every
    /// outcome lands in the tuner's window. Fallback attempt state is the
    /// caller's to clear via [`FallbackManager::record_success`].
    pub fn record_result(&self, optimized: &OptimizedRequest, result: &GenerationResult) {
        let request = &optimized.request;
        let content_type = request.task.to_string();

        if let Some(variant_id) = &optimized.variant_id {
            self.variants.record_outcome(request, variant_id, result.success);
        }

        if result.success
            && let Some(output) = &result.output
        {
            self.cache.set(&optimized.cache_key, output.clone(), &SetOptions {
                ttl: None,
                content_type: &content_type,
                prompt: &request.prompt,
                quality_score: result.quality_score.unwrap_or(0.5),
            });
        }

        self.tuner.record_result(&content_type, &RequestOutcome {
            success: result.success,
            latency: result.latency,
            timed_out: result.timed_out,
        });

        tracing::debug!(
            request_id = %request.id,
            success = result.success,
            latency_ms = result.latency.as_millis() as u64,
            "result recorded"
        );
    }

    /// One housekeeping pass: sweep stale attempt state and dead cache entries
    pub fn maintenance_tick(&self) {
        let swept_attempts = self.fallback.cleanup_old_attempts();
        let purged_entries = self.cache.purge_expired();
        if swept_attempts > 0 || purged_entries > 0 {
            tracing::debug!(swept_attempts, purged_entries, "maintenance tick");
        }
    }

    /// Periodic housekeeping loop; spawn on the host runtime
    ///
    /// Runs until the task is dropped or aborted.
    pub async fn run_maintenance(&self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.maintenance_tick();
        }
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn tuner(&self) -> &Arc<PerformanceTuner> {
        &self.tuner
    }

    pub fn fallback(&self) -> &Arc<FallbackManager> {
        &self.fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rudder_fallback::{ErrorInfo, FallbackAction, FallbackContext};
    use serde_json::json;

    fn pipeline() -> Pipeline {
        Pipeline::from_config(Config::default()).unwrap()
    }

    fn request(id: &str, task: TaskKind, prompt: &str, content: &str) -> GenerationRequest {
        GenerationRequest::new(id, task, prompt, content)
    }

    #[test]
    fn miss_fires_route_and_tune_stages() {
        let pipeline = pipeline();
        let optimized = pipeline
            .optimize_request(&request("r1", TaskKind::Qa, "what is rust?", "short text"))
            .unwrap();

        assert!(optimized.cached.is_none());
        assert!(optimized.variant_id.is_none());
        let routing = optimized.routing.as_ref().unwrap();
        assert_eq!(routing.tier, Tier::Fast);
        assert!(matches!(optimized.optimizations[0], Stage::Routed { .. }));
        assert!(matches!(optimized.optimizations.last(), Some(Stage::Tuned { .. })));

        let settings = optimized.settings.unwrap();
        assert!(settings.can_start_now);
        assert!(settings.timeout >= Duration::from_secs(30));
    }

    #[test]
    fn successful_result_is_served_from_cache_next_time() {
        let pipeline = pipeline();
        let req = request("r1", TaskKind::Document, "summarize the plan", "the plan body");

        let first = pipeline.optimize_request(&req).unwrap();
        assert!(first.cached.is_none());

        pipeline.record_result(&first, &GenerationResult {
            success: true,
            output: Some(json!({"body": "generated artifact"})),
            quality_score: Some(0.8),
            latency: Duration::from_secs(2),
            timed_out: false,
            error: None,
        });

        let second = pipeline.optimize_request(&req).unwrap();
        let hit = second.cached.unwrap();
        assert_eq!(hit.value, json!({"body": "generated artifact"}));
        assert!(hit.similarity.is_none());
        assert_eq!(second.optimizations.len(), 1);
        assert!(matches!(second.optimizations[0], Stage::CacheHit { .. }));
        assert!(second.routing.is_none());
    }

    #[test]
    fn failed_result_is_not_cached_but_feeds_the_tuner() {
        let pipeline = pipeline();
        let req = request("r1", TaskKind::Summary, "summarize", "body");

        let optimized = pipeline.optimize_request(&req).unwrap();
        pipeline.record_result(&optimized, &GenerationResult {
            success: false,
            output: None,
            quality_score: None,
            latency: Duration::from_secs(61),
            timed_out: true,
            error: Some("deadline exceeded".to_owned()),
        });

        assert!(pipeline.optimize_request(&req).unwrap().cached.is_none());
        let stats = pipeline.tuner().optimized_settings("summary").stats;
        assert_eq!(stats.sample_count, 1);
        assert_eq!(stats.timeout_count, 1);
    }

    #[test]
    fn variant_selector_is_consulted_and_fed_back() {
        struct CountingSelector {
            selections: AtomicUsize,
            outcomes: AtomicUsize,
        }
        impl VariantSelector for CountingSelector {
            fn select(&self, _request: &GenerationRequest) -> Option<String> {
                self.selections.fetch_add(1, Ordering::SeqCst);
                Some("variant-7".to_owned())
            }
            fn record_outcome(&self, _request: &GenerationRequest, variant_id: &str, success: bool) {
                assert_eq!(variant_id, "variant-7");
                assert!(success);
                self.outcomes.fetch_add(1, Ordering::SeqCst);
            }
        }

        let selector = Arc::new(CountingSelector {
            selections: AtomicUsize::new(0),
            outcomes: AtomicUsize::new(0),
        });
        let pipeline = pipeline().with_variant_selector(Arc::clone(&selector) as Arc<dyn VariantSelector>);

        let req = request("r1", TaskKind::Slides, "make slides", "content");
        let optimized = pipeline.optimize_request(&req).unwrap();
        assert_eq!(optimized.variant_id.as_deref(), Some("variant-7"));
        assert!(optimized
            .optimizations
            .iter()
            .any(|s| matches!(s, Stage::VariantSelected { .. })));

        pipeline.record_result(&optimized, &GenerationResult {
            success: true,
            output: Some(json!("deck")),
            quality_score: None,
            latency: Duration::from_secs(1),
            timed_out: false,
            error: None,
        });

        assert_eq!(selector.selections.load(Ordering::SeqCst), 1);
        assert_eq!(selector.outcomes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn simple_qa_rate_limit_resolves_to_same_model_retry() {
        // End-to-end: simple QA routes fast; a 429 on the bottom tier
        // resolves to a bounded retry against the same model.
        let pipeline = pipeline();
        let req = request("r1", TaskKind::Qa, "what is rust?", "short text");

        let optimized = pipeline.optimize_request(&req).unwrap();
        let routing = optimized.routing.as_ref().unwrap();
        assert_eq!(routing.complexity.level.to_string(), "simple");
        assert_eq!(routing.tier, Tier::Fast);

        let decision = pipeline.fallback().get_fallback(
            &req.id,
            &ErrorInfo::from_message("429 Too Many Requests"),
            &routing.model_id,
            &FallbackContext {
                tier: Some(routing.tier),
            },
        );
        assert_eq!(decision.action, FallbackAction::Retry);
        assert_eq!(decision.model_id.as_deref(), Some(routing.model_id.as_str()));

        pipeline.fallback().record_success(&req.id);
        assert!(pipeline.fallback().attempt_snapshot(&req.id).is_none());
    }

    #[test]
    fn disabled_advanced_tier_caps_escalation() {
        let mut config = Config::default();
        config.router.enable_advanced_tier = false;
        let pipeline = Pipeline::from_config(config).unwrap();

        let decision = pipeline.fallback().get_fallback(
            "r1",
            &ErrorInfo::from_message("tool use not supported"),
            "claude-sonnet-4-5",
            &FallbackContext {
                tier: Some(Tier::Standard),
            },
        );
        assert_eq!(decision.action, FallbackAction::Abort);
    }

    #[test]
    fn invalid_config_is_rejected_at_assembly() {
        let mut config = Config::default();
        config.classifier.weights.length = 0.9;
        assert!(matches!(
            Pipeline::from_config(config),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn maintenance_tick_leaves_live_state_alone() {
        let pipeline = pipeline();
        pipeline.fallback().get_fallback(
            "r1",
            &ErrorInfo::from_message("temporarily unavailable"),
            "claude-sonnet-4-5",
            &FallbackContext::default(),
        );

        // Nothing is stale yet, so the tick must not sweep live state
        pipeline.maintenance_tick();
        assert!(pipeline.fallback().attempt_snapshot("r1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_maintenance_ticks_periodically() {
        let pipeline = Arc::new(pipeline());
        let looped = Arc::clone(&pipeline);
        let handle = tokio::spawn(async move {
            looped.run_maintenance(Duration::from_secs(60)).await;
        });

        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
