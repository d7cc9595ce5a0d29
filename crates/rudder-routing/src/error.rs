//! Routing-specific error types

use rudder_config::Tier;
use thiserror::Error;

/// Errors that can occur while building or consulting the model catalog
#[derive(Debug, Error)]
pub enum RoutingError {
    /// A model id was referenced that the catalog does not contain
    #[error("unknown model id: {id}")]
    UnknownModel { id: String },

    /// No default model is configured for a tier
    #[error("no default model configured for tier {tier}")]
    NoTierDefault { tier: Tier },

    /// The catalog has no models at all
    #[error("model catalog is empty")]
    EmptyCatalog,
}
