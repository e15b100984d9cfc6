// crates/mcpp-core/src/lib.rs
// ============================================================================
// Module: MCPP Core Library
// Description: Public API surface for the Model Context Privacy Protocol core.
// Purpose: Expose the cache, placeholder, policy, and consent machinery.
// Dependencies: crate::{core, cache, placeholder, reference, policy, consent}
// ============================================================================

//! ## Overview
//! MCPP core provides the policy-enforcement, data-cache, and
//! reference-resolution engine that sits in front of tool-calling servers.
//! Sensitive tool outputs are cached in-process and referenced through opaque
//! `{call_id.row.column}` placeholders; every read or resolution is gated by
//! the policy evaluator and, where required, an explicit consent flow.
//! Security posture: all inputs are untrusted and decisions fail closed; only
//! an explicit allow authorizes data release.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod cache;
pub mod consent;
pub mod core;
pub mod placeholder;
pub mod policy;
pub mod reference;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cache::CacheError;
pub use cache::DataCache;
pub use consent::ConsentCoordinator;
pub use consent::ConsentError;
pub use consent::ConsentRequest;
pub use consent::ConsentWaitOutcome;
pub use consent::ConsentWaiter;
pub use consent::DataSummary;
pub use consent::DecisionCache;
pub use consent::DecisionKey;
pub use consent::PendingContext;
pub use consent::ResolvedConsent;
pub use core::*;
pub use placeholder::Placeholder;
pub use placeholder::Resolution;
pub use placeholder::ResolutionStatus;
pub use placeholder::resolve_with_tracking;
pub use placeholder::scan_placeholders;
pub use policy::ConsentNeed;
pub use policy::ConsentTriggers;
pub use policy::DefaultTargetPolicy;
pub use policy::LlmDefaultPolicy;
pub use policy::PolicyDecision;
pub use policy::PolicyEvaluator;
pub use policy::PolicyOutcome;
pub use policy::PolicySettings;
pub use policy::SubCheck;
pub use policy::SubCheckStatus;
pub use policy::ValidationDetails;
pub use reference::ReferenceError;
pub use reference::ReferenceMatch;
pub use reference::SIMILARITY_THRESHOLD;
pub use reference::find_reference;
pub use reference::jaro_winkler;
