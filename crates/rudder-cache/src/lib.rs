//! In-memory artifact cache with adaptive TTL and similarity lookup
//!
//! Caches generated artifacts keyed by a SHA-256 hash of
//! (content type, prompt, content hash). Entries expire at read time,
//! TTLs adapt to observed hit and regeneration rates, and near-duplicate
//! prompts can be served via Jaccard similarity matching. All state is
//! in-process; the evict-then-insert path runs under one lock so the
//! configured bounds hold after every `set`.

#![allow(clippy::must_use_candidate, clippy::cast_precision_loss)]

pub mod similarity;

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

use rudder_config::{CacheConfig, EvictionPolicy};

use crate::similarity::jaccard;

/// Exact-hit outcomes tracked for the rolling hit rate
const RECENT_WINDOW: usize = 100;

/// Outcomes required before the rolling hit rate adjusts TTLs
const MIN_RATE_SAMPLES: usize = 10;

/// Caller-reported regeneration rate above which TTLs are shortened
const HIGH_REGENERATION_RATE: f64 = 0.5;

/// Compute a cache key from the identifying request fields
///
/// Deterministic; changing any of the three inputs changes the key.
pub fn generate_key(content_type: &str, prompt: &str, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_type.as_bytes());
    hasher.update(b"\n");
    hasher.update(prompt.as_bytes());
    hasher.update(b"\n");
    hasher.update(content_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Digest of source content, for callers that do not track their own hash
pub fn content_digest(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Descriptive metadata stored alongside a cached value
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub content_type: String,
    pub prompt: String,
    /// Opaque caller-supplied quality in [0, 1]; used only for eviction
    pub quality_score: f64,
}

/// One cached artifact
#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    created_at: Instant,
    accessed_at: Instant,
    access_count: u64,
    ttl: Duration,
    size: usize,
    metadata: EntryMetadata,
    seq: u64,
}

/// Lookup options
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions<'a> {
    /// Fall back to near-duplicate prompt matching on an exact miss
    pub allow_similar: bool,
    /// Prompt to match against cached prompts
    pub prompt: Option<&'a str>,
    /// Restrict similarity matching to one content type
    pub content_type: Option<&'a str>,
}

/// Store options
#[derive(Debug, Clone, Copy)]
pub struct SetOptions<'a> {
    /// Explicit TTL; `None` selects the adaptive calculation
    pub ttl: Option<Duration>,
    pub content_type: &'a str,
    pub prompt: &'a str,
    /// Opaque caller-supplied quality in [0, 1]
    pub quality_score: f64,
}

impl Default for SetOptions<'_> {
    fn default() -> Self {
        Self {
            ttl: None,
            content_type: "",
            prompt: "",
            quality_score: 0.5,
        }
    }
}

/// A successful lookup
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub value: serde_json::Value,
    /// Jaccard score when served by similarity rather than exact match
    pub similarity: Option<f64>,
}

/// Entry deletion criteria; any supplied criterion matching deletes
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidateFilter<'a> {
    pub content_type: Option<&'a str>,
    pub older_than: Option<Duration>,
    pub quality_below: Option<f64>,
}

/// Counters snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub similarity_hits: u64,
    pub evictions: u64,
    /// Lifetime exact-hit rate
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    similarity_hits: u64,
    evictions: u64,
    recent: VecDeque<bool>,
    regeneration_rate: f64,
    insert_seq: u64,
}

impl CacheState {
    fn rolling_hit_rate(&self) -> Option<f64> {
        if self.recent.len() < MIN_RATE_SAMPLES {
            return None;
        }
        let hits = self.recent.iter().filter(|h| **h).count();
        Some(hits as f64 / self.recent.len() as f64)
    }

    fn record_outcome(&mut self, hit: bool) {
        if self.recent.len() >= RECENT_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(hit);
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size;
        Some(entry)
    }
}

/// Bounded in-memory cache for generated artifacts
pub struct ResponseCache {
    state: Mutex<CacheState>,
    config: CacheConfig,
}

impl ResponseCache {
    /// Create a cache with the given bounds and policy
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            config,
        }
    }

    /// Look up an artifact
    ///
    /// A live exact match bumps the access fields and counts a hit. An
    /// expired entry is deleted and counts a miss. With `allow_similar`,
    /// a prompt whose best Jaccard match clears the return threshold is
    /// served as a similarity hit, which does not count as a primary hit.
    pub fn get(&self, key: &str, opts: &GetOptions) -> Option<CacheHit> {
        self.get_at(key, opts, Instant::now())
    }

    fn get_at(&self, key: &str, opts: &GetOptions, now: Instant) -> Option<CacheHit> {
        let mut state = self.lock();

        let expired = state
            .entries
            .get(key)
            .is_some_and(|e| now.duration_since(e.created_at) >= e.ttl);
        if expired {
            state.remove_entry(key);
            tracing::debug!(key, "cache entry expired at read");
        } else if let Some(entry) = state.entries.get_mut(key) {
            entry.accessed_at = now;
            entry.access_count += 1;
            let value = entry.value.clone();
            state.hits += 1;
            state.record_outcome(true);
            tracing::debug!(key, "cache hit");
            return Some(CacheHit {
                value,
                similarity: None,
            });
        }

        state.misses += 1;
        state.record_outcome(false);

        if opts.allow_similar
            && let Some(prompt) = opts.prompt
        {
            let best = state
                .entries
                .iter()
                .filter(|(_, e)| now.duration_since(e.created_at) < e.ttl)
                .filter(|(_, e)| {
                    opts.content_type
                        .is_none_or(|ct| e.metadata.content_type == ct)
                })
                .map(|(k, e)| (k.clone(), jaccard(prompt, &e.metadata.prompt)))
                .filter(|(_, score)| *score >= self.config.similarity_search_threshold)
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            if let Some((best_key, score)) = best
                && score > self.config.similarity_return_threshold
            {
                let entry = state.entries.get_mut(&best_key)?;
                entry.accessed_at = now;
                entry.access_count += 1;
                let value = entry.value.clone();
                state.similarity_hits += 1;
                tracing::debug!(key, similar_to = %best_key, score, "cache similarity hit");
                return Some(CacheHit {
                    value,
                    similarity: Some(score),
                });
            }
        }

        tracing::debug!(key, "cache miss");
        None
    }

    /// Store an artifact, evicting until the configured bounds fit
    pub fn set(&self, key: &str, value: serde_json::Value, opts: &SetOptions) {
        self.set_at(key, value, opts, Instant::now());
    }

    fn set_at(&self, key: &str, value: serde_json::Value, opts: &SetOptions, now: Instant) {
        let size = estimate_size(&value);
        let mut state = self.lock();

        let ttl = opts
            .ttl
            .unwrap_or_else(|| self.adaptive_ttl(&state, opts.content_type));

        // Replacing an entry must not double-count its bytes
        state.remove_entry(key);

        if size > self.config.max_memory_bytes {
            tracing::warn!(key, size, "artifact larger than the whole cache; not stored");
            return;
        }

        while state.entries.len() >= self.config.max_entries
            || state.total_bytes + size > self.config.max_memory_bytes
        {
            let Some(victim) = pick_victim(&state, self.config.eviction_policy, now) else {
                break;
            };
            state.remove_entry(&victim);
            state.evictions += 1;
            tracing::debug!(victim = %victim, policy = %self.config.eviction_policy, "evicted cache entry");
        }

        let seq = state.insert_seq;
        state.insert_seq += 1;
        state.total_bytes += size;
        state.entries.insert(key.to_owned(), CacheEntry {
            value,
            created_at: now,
            accessed_at: now,
            access_count: 0,
            ttl,
            size,
            metadata: EntryMetadata {
                content_type: opts.content_type.to_owned(),
                prompt: opts.prompt.to_owned(),
                quality_score: opts.quality_score.clamp(0.0, 1.0),
            },
            seq,
        });
        tracing::debug!(key, ttl_secs = ttl.as_secs(), size, "cached artifact");
    }

    /// Delete entries matching any supplied criterion; returns the count
    pub fn invalidate(&self, filter: &InvalidateFilter) -> usize {
        self.invalidate_at(filter, Instant::now())
    }

    fn invalidate_at(&self, filter: &InvalidateFilter, now: Instant) -> usize {
        let mut state = self.lock();
        let mut removed_bytes = 0;
        let before = state.entries.len();
        state.entries.retain(|_, entry| {
            let matches = filter
                .content_type
                .is_some_and(|ct| entry.metadata.content_type == ct)
                || filter
                    .older_than
                    .is_some_and(|age| now.duration_since(entry.created_at) > age)
                || filter
                    .quality_below
                    .is_some_and(|floor| entry.metadata.quality_score < floor);
            if matches {
                removed_bytes += entry.size;
            }
            !matches
        });
        state.total_bytes -= removed_bytes;
        before - state.entries.len()
    }

    /// Delete entries past their TTL; returns the count
    ///
    /// Expiry normally happens lazily at read time; this sweep exists for
    /// the host's periodic maintenance tick.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let mut removed_bytes = 0;
        let before = state.entries.len();
        state.entries.retain(|_, entry| {
            let expired = now.duration_since(entry.created_at) >= entry.ttl;
            if expired {
                removed_bytes += entry.size;
            }
            !expired
        });
        state.total_bytes -= removed_bytes;
        before - state.entries.len()
    }

    /// Report the regeneration rate observed by the caller
    ///
    /// Opaque, like `quality_score`: the cache only compares it against the
    /// high-regeneration threshold when computing adaptive TTLs.
    pub fn report_regeneration_rate(&self, rate: f64) {
        self.lock().regeneration_rate = rate.clamp(0.0, 1.0);
    }

    /// Counters snapshot
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            hits: state.hits,
            misses: state.misses,
            similarity_hits: state.similarity_hits,
            evictions: state.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    /// Advisory observations about cache effectiveness
    pub fn recommendations(&self) -> Vec<String> {
        let stats = self.stats();
        let mut out = Vec::new();

        if stats.hits + stats.misses >= 20 && stats.hit_rate < 0.2 {
            out.push(format!(
                "hit rate is {:.0}%; consider longer TTLs or coarser cache keys",
                stats.hit_rate * 100.0
            ));
        }
        if stats.total_bytes > self.config.max_memory_bytes / 10 * 9 {
            out.push("tracked bytes are within 10% of the memory bound; evictions are imminent".to_owned());
        }
        if stats.similarity_hits > stats.hits && stats.similarity_hits > 10 {
            out.push("most hits come from similarity matching; prompts may vary in irrelevant ways".to_owned());
        }
        if stats.evictions > stats.hits && stats.evictions > 50 {
            out.push("entries are evicted faster than they are reused; consider a larger cache".to_owned());
        }
        out
    }

    fn adaptive_ttl(&self, state: &CacheState, content_type: &str) -> Duration {
        let mut ttl = self.config.base_ttl(content_type) as f64;

        if let Some(rate) = state.rolling_hit_rate() {
            if rate > 0.7 {
                ttl *= 1.5;
            } else if rate < 0.2 {
                ttl *= 0.5;
            }
        }
        if state.regeneration_rate > HIGH_REGENERATION_RATE {
            ttl *= 0.7;
        }

        let clamped = ttl.clamp(self.config.min_ttl_secs as f64, self.config.max_ttl_secs as f64);
        Duration::from_secs_f64(clamped)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Rough in-memory footprint: twice the serialized length
fn estimate_size(value: &serde_json::Value) -> usize {
    serde_json::to_string(value).map_or(0, |s| s.len() * 2)
}

fn pick_victim(state: &CacheState, policy: EvictionPolicy, now: Instant) -> Option<String> {
    let entries = &state.entries;
    match policy {
        EvictionPolicy::Lru => entries
            .iter()
            .min_by_key(|(_, e)| e.accessed_at)
            .map(|(k, _)| k.clone()),
        EvictionPolicy::Lfu => entries
            .iter()
            .min_by_key(|(_, e)| (e.access_count, e.accessed_at))
            .map(|(k, _)| k.clone()),
        EvictionPolicy::Fifo => entries
            .iter()
            .min_by_key(|(_, e)| e.seq)
            .map(|(k, _)| k.clone()),
        EvictionPolicy::Adaptive => entries
            .iter()
            .min_by(|a, b| {
                adaptive_score(a.1, now)
                    .partial_cmp(&adaptive_score(b.1, now))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(k, _)| k.clone()),
    }
}

/// Keep frequently used, high-quality, recently touched, young entries
fn adaptive_score(entry: &CacheEntry, now: Instant) -> f64 {
    let recency_minutes = now.duration_since(entry.accessed_at).as_secs_f64() / 60.0;
    let age_ten_minutes = now.duration_since(entry.created_at).as_secs_f64() / 600.0;
    entry.access_count as f64 * 10.0 + entry.metadata.quality_score * 5.0 - recency_minutes - age_ten_minutes
}
