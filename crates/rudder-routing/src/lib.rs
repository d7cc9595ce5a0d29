//! Smart model routing for rudder
//!
//! Pairs a heuristic complexity classifier with a tier-ordered model
//! catalog: score the request, map the score to a tier, then apply the
//! caller's quality/budget/force constraints. Pure decision logic — the
//! transport that actually calls providers lives elsewhere.

#![allow(clippy::must_use_candidate)]

pub mod analysis;
pub mod error;
pub mod registry;
pub mod router;

pub use analysis::{Classifier, ClassifyOptions, ComplexityAnalysis, ComplexityFactors, ComplexityLevel};
pub use error::RoutingError;
pub use registry::ModelCatalog;
pub use router::{ModelRouter, RouteOptions, RouterStats, RoutingDecision, TierAlternative};
