// crates/mcpp-config/src/lib.rs
// ============================================================================
// Module: MCPP Configuration Library
// Description: Configuration model and validation for MCPP servers.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: mcpp-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size limits and
//! fail-closed validation: missing or invalid configuration never degrades
//! to a permissive default. The policy section converts into the core
//! [`mcpp_core::PolicySettings`] snapshot consumed by the evaluator.
//! Security posture: configuration is untrusted input and must be validated.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AuditConfig;
pub use config::ConfigError;
pub use config::ConsentConfig;
pub use config::ConsentMode;
pub use config::DataUsagePolicyConfig;
pub use config::McppConfig;
pub use config::PolicyConfig;
pub use config::RateLimitConfig;
pub use config::ServerConfig;
pub use config::ServerLimitsConfig;
pub use config::ServerTransport;
pub use config::TargetCategoryConfig;
pub use config::ToolPolicyConfig;
