//! Tiered failure recovery for rudder
//!
//! Classifies backend errors and answers each failed attempt with a
//! budgeted decision: retry, escalate, downgrade, or abort. Pure
//! bookkeeping — the manager returns an action and a delay; it never
//! sleeps, never re-raises, and never calls a provider.

#![allow(clippy::must_use_candidate, clippy::cast_possible_truncation)]

pub mod classify;
pub mod manager;

pub use classify::{classify_error, ErrorInfo, ErrorKind};
pub use manager::{
    AttemptSnapshot, FallbackAction, FallbackContext, FallbackDecision, FallbackManager,
};
