//! Heuristic complexity classification for generation requests
//!
//! Scores request difficulty from the source content plus task metadata
//! using six weighted factors. No ML pipeline — pure heuristics, no I/O.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use strum::Display;

use rudder_config::{ClassifierConfig, TaskKind, Tier};

use crate::registry::ModelCatalog;

/// Bucketed difficulty classification used to pick a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Medium,
    Complex,
    VeryComplex,
}

/// The six factor scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ComplexityFactors {
    /// Log-scale content length bucket
    pub length: f64,
    /// Headings/lists/tables per 1000 chars
    pub structure: f64,
    /// Unique proper-noun sequences and acronyms
    pub entity_density: f64,
    /// Dates, quarters, and scheduling vocabulary
    pub temporal_density: f64,
    /// Code blocks, inline code, math, URLs, tech acronyms
    pub technical_density: f64,
    /// Task-inherent baseline plus file/prompt bonuses
    pub task: f64,
}

impl ComplexityFactors {
    fn named(&self) -> [(&'static str, f64); 6] {
        [
            ("length", self.length),
            ("structure", self.structure),
            ("entity density", self.entity_density),
            ("temporal density", self.temporal_density),
            ("technical density", self.technical_density),
            ("task", self.task),
        ]
    }
}

/// Result of classifying one request
#[derive(Debug, Clone, Serialize)]
pub struct ComplexityAnalysis {
    /// Bucketed difficulty level
    pub level: ComplexityLevel,
    /// Weighted score in [0, 1]
    pub score: f64,
    /// Individual factor scores
    pub factors: ComplexityFactors,
    /// Model id the classifier alone would pick
    pub recommended_model: String,
    /// Which factors drove the score
    pub reasoning: String,
}

/// Optional request metadata that sharpens classification
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyOptions<'a> {
    /// Number of source files attached to the request
    pub file_count: usize,
    /// The user's free-form instruction, if any
    pub user_prompt: Option<&'a str>,
}

/// A user prompt longer than this earns the length bonus
const LONG_PROMPT_CHARS: usize = 200;

/// Explicit-date count at which the temporal factor is damped
const DATE_DAMPING_COUNT: usize = 10;

/// Damping multiplier for date-heavy content
const DATE_DAMPING: f64 = 0.6;

// -- Regex patterns compiled once via LazyLock --

static PROPER_NOUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b").unwrap());

static ACRONYM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[A-Z]{2,6}\b").unwrap());

static ISO_DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").unwrap());

static SLASH_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}/\d{1,2}/\d{2,4}\b").unwrap());

static MONTH_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2}\b",
    )
    .unwrap()
});

static QUARTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bQ[1-4]\b").unwrap());

static TEMPORAL_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:deadline|timeline|milestone|schedule|quarterly|annual|weekly|monthly|sprint|phase)\b")
        .unwrap()
});

static INLINE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`[^`\n]+`").unwrap());

static MATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[=≤≥≠±×÷∑∫√]").unwrap());

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());

static TECH_ACRONYM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:API|SQL|JSON|HTTP|HTTPS|CPU|GPU|SDK|CLI|REST|GRPC|CSV|YAML|XML|HTML|CSS|TLS|SSH|AWS|GCP|ETL)\b",
    )
    .unwrap()
});

static DETAIL_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:detailed|comprehensive|in-depth|thorough|step by step)\b").unwrap()
});

/// Heuristic complexity classifier
///
/// `classify` is a pure function of its inputs and the construction-time
/// configuration; repeated calls with the same inputs produce the same
/// analysis.
pub struct Classifier {
    config: ClassifierConfig,
    catalog: Arc<ModelCatalog>,
}

impl Classifier {
    /// Create a classifier over a validated catalog
    pub fn new(config: ClassifierConfig, catalog: Arc<ModelCatalog>) -> Self {
        Self { config, catalog }
    }

    /// Score a request's difficulty from content and task metadata
    pub fn classify(&self, content: &str, task: TaskKind, opts: &ClassifyOptions) -> ComplexityAnalysis {
        let factors = ComplexityFactors {
            length: length_factor(content.len()),
            structure: structure_factor(content),
            entity_density: entity_factor(content),
            temporal_density: temporal_factor(content),
            technical_density: technical_factor(content),
            task: self.task_factor(task, opts),
        };

        let w = &self.config.weights;
        let score = (factors.length * w.length
            + factors.structure * w.structure
            + factors.entity_density * w.entity_density
            + factors.temporal_density * w.temporal_density
            + factors.technical_density * w.technical_density
            + factors.task * w.task)
            .clamp(0.0, 1.0);

        let level = self.level_for(score);
        let tier = recommended_tier(level, task);
        let recommended_model = self
            .catalog
            .default_for_tier(tier)
            .map(|m| m.id.clone())
            .unwrap_or_default();

        let analysis = ComplexityAnalysis {
            level,
            score,
            reasoning: reasoning_for(&factors),
            factors,
            recommended_model,
        };

        tracing::debug!(
            task = %task,
            level = %analysis.level,
            score = analysis.score,
            "content classified"
        );

        analysis
    }

    /// Cheap 5-bucket length heuristic averaged with the task baseline
    ///
    /// Monotonically non-decreasing in content length for a fixed task.
    pub fn quick_classify(&self, content: &str, task: TaskKind) -> ComplexityLevel {
        let length_score = match content.len() {
            0..=199 => 0.1,
            200..=999 => 0.3,
            1_000..=3_999 => 0.5,
            4_000..=11_999 => 0.7,
            _ => 0.9,
        };
        let score = (length_score + self.config.task_base(task)) / 2.0;
        self.level_for(score)
    }

    fn level_for(&self, score: f64) -> ComplexityLevel {
        let t = self.config.thresholds;
        if score < t.simple {
            ComplexityLevel::Simple
        } else if score < t.medium {
            ComplexityLevel::Medium
        } else if score < t.complex {
            ComplexityLevel::Complex
        } else {
            ComplexityLevel::VeryComplex
        }
    }

    fn task_factor(&self, task: TaskKind, opts: &ClassifyOptions) -> f64 {
        let mut factor = self.config.task_base(task);

        // +0.05 per file beyond the first, capped at +0.3
        let extra_files = opts.file_count.saturating_sub(1);
        factor += (extra_files as f64 * 0.05).min(0.3);

        if let Some(prompt) = opts.user_prompt {
            if prompt.len() > LONG_PROMPT_CHARS {
                factor += 0.1;
            }
            if DETAIL_KEYWORD_RE.is_match(prompt) {
                factor += 0.1;
            }
        }

        factor.min(1.0)
    }
}

/// Map a level and task to the tier the classifier would recommend
///
/// QA stays on the fast tier unless the request is very complex.
pub(crate) fn recommended_tier(level: ComplexityLevel, task: TaskKind) -> Tier {
    if task == TaskKind::Qa && level != ComplexityLevel::VeryComplex {
        return Tier::Fast;
    }
    match level {
        ComplexityLevel::Simple => Tier::Fast,
        ComplexityLevel::Medium => Tier::Standard,
        ComplexityLevel::Complex | ComplexityLevel::VeryComplex => Tier::Advanced,
    }
}

/// Log-scale character-count buckets
fn length_factor(len: usize) -> f64 {
    match len {
        0 => 0.0,
        1..=299 => 0.1,
        300..=999 => 0.3,
        1_000..=2_999 => 0.5,
        3_000..=9_999 => 0.7,
        10_000..=29_999 => 0.85,
        _ => 1.0,
    }
}

/// Headings, list items, and table rows per 1000 chars
fn structure_factor(content: &str) -> f64 {
    if content.is_empty() {
        return 0.0;
    }

    let mut hits = 0usize;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            hits += 1;
        } else if trimmed.starts_with("- ")
            || trimmed.starts_with("* ")
            || trimmed.starts_with("+ ")
            || is_ordered_item(trimmed)
        {
            hits += 1;
        } else if trimmed.matches('|').count() >= 2 {
            hits += 1;
        }
    }

    density_bucket(per_thousand(hits, content.len()), &[2.0, 5.0, 10.0, 20.0])
}

fn is_ordered_item(line: &str) -> bool {
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && line[digits..].starts_with(". ")
}

/// Unique capitalized multi-word sequences plus acronyms
fn entity_factor(content: &str) -> f64 {
    let mut entities: HashSet<&str> = HashSet::new();
    for m in PROPER_NOUN_RE.find_iter(content) {
        entities.insert(m.as_str());
    }
    for m in ACRONYM_RE.find_iter(content) {
        entities.insert(m.as_str());
    }

    match entities.len() {
        0 => 0.0,
        1..=2 => 0.2,
        3..=7 => 0.4,
        8..=14 => 0.6,
        15..=29 => 0.8,
        _ => 1.0,
    }
}

/// Dates, quarter markers, and scheduling vocabulary
///
/// Content listing ten or more explicit dates reads as an itinerary rather
/// than temporal reasoning, so the factor is damped there.
fn temporal_factor(content: &str) -> f64 {
    let explicit_dates = ISO_DATE_RE.find_iter(content).count()
        + SLASH_DATE_RE.find_iter(content).count()
        + MONTH_DATE_RE.find_iter(content).count();
    let hits = explicit_dates
        + QUARTER_RE.find_iter(content).count()
        + TEMPORAL_KEYWORD_RE.find_iter(content).count();

    let mut factor = match hits {
        0 => 0.0,
        1..=2 => 0.25,
        3..=7 => 0.5,
        8..=14 => 0.75,
        _ => 1.0,
    };
    if explicit_dates >= DATE_DAMPING_COUNT {
        factor *= DATE_DAMPING;
    }
    factor
}

/// Code blocks (weighted x3), inline code, math, URLs, tech acronyms
fn technical_factor(content: &str) -> f64 {
    if content.is_empty() {
        return 0.0;
    }

    // Segments at even indices sit outside fenced blocks
    let segments: Vec<&str> = content.split("```").collect();
    let fenced_blocks = (segments.len() - 1) / 2;

    let mut hits = fenced_blocks * 3;
    for (i, segment) in segments.iter().enumerate() {
        if i % 2 == 1 {
            continue;
        }
        hits += INLINE_CODE_RE.find_iter(segment).count()
            + MATH_RE.find_iter(segment).count()
            + URL_RE.find_iter(segment).count()
            + TECH_ACRONYM_RE.find_iter(segment).count();
    }

    density_bucket(per_thousand(hits, content.len()), &[1.0, 3.0, 6.0, 12.0])
}

fn per_thousand(hits: usize, len: usize) -> f64 {
    hits as f64 * 1000.0 / len as f64
}

/// Map a per-1000-chars density onto the standard five buckets
fn density_bucket(density: f64, cuts: &[f64; 4]) -> f64 {
    if density <= 0.0 {
        0.0
    } else if density < cuts[0] {
        0.2
    } else if density < cuts[1] {
        0.4
    } else if density < cuts[2] {
        0.6
    } else if density < cuts[3] {
        0.8
    } else {
        1.0
    }
}

/// Name the top three factors above 0.5, or fall back to a fixed string
fn reasoning_for(factors: &ComplexityFactors) -> String {
    let mut strong: Vec<(&str, f64)> = factors
        .named()
        .into_iter()
        .filter(|(_, v)| *v > 0.5)
        .collect();
    strong.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    strong.truncate(3);

    if strong.is_empty() {
        return "standard complexity".to_owned();
    }

    let parts: Vec<String> = strong
        .iter()
        .map(|(name, value)| format!("{name} ({value:.2})"))
        .collect();
    format!("elevated by {}", parts.join(", "))
}
