// crates/mcpp-core/src/core/types.rs
// ============================================================================
// Module: MCPP Data Model
// Description: Usage levels, targets, policies, and the wire error catalog.
// Purpose: Provide the closed type catalog shared by every MCPP component.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The closed set of usage levels, target kinds, permission settings, policy
//! structures, and error codes. Usage levels form the total order
//! `display < process < store < transfer`; a permission at a level implicitly
//! grants lower levels only when the value is `allow`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::HostId;

// ============================================================================
// SECTION: Usage Levels
// ============================================================================

/// Intended fate of requested data, ordered by restrictiveness.
///
/// # Invariants
/// - Variant order matches the usage hierarchy; the derived `Ord` is the
///   hierarchy order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DataUsage {
    /// Shown to the user.
    Display,
    /// Computed with in-process.
    Process,
    /// Persisted by the target.
    Store,
    /// Forwarded to an external party.
    Transfer,
}

impl DataUsage {
    /// Every usage level in hierarchy order.
    pub const ALL: [Self; 4] = [Self::Display, Self::Process, Self::Store, Self::Transfer];

    /// Returns the hierarchy rank (0 = least privileged).
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Display => 0,
            Self::Process => 1,
            Self::Store => 2,
            Self::Transfer => 3,
        }
    }

    /// Returns a stable label for the usage level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Process => "process",
            Self::Store => "store",
            Self::Transfer => "transfer",
        }
    }
}

impl fmt::Display for DataUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Targets
// ============================================================================

/// Kind of endpoint that will receive data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// A client application.
    Client,
    /// A backing server.
    Server,
    /// A language model.
    Llm,
    /// Wildcard covering every target kind.
    All,
}

impl TargetType {
    /// Returns a stable label for the target kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Llm => "llm",
            Self::All => "all",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination of a target: one endpoint name or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destination {
    /// A single destination endpoint.
    Single(String),
    /// Several destination endpoints.
    Many(Vec<String>),
}

impl Destination {
    /// Iterates over every destination endpoint.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            Self::Single(value) => std::slice::from_ref(value).iter().map(String::as_str),
            Self::Many(values) => values.as_slice().iter().map(String::as_str),
        }
    }

    /// Returns true when no endpoint is named.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(value) => value.is_empty(),
            Self::Many(values) => values.is_empty() || values.iter().all(String::is_empty),
        }
    }

    /// Returns the canonical comma-joined form used for cache keys.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Single(value) => value.clone(),
            Self::Many(values) => values.join(","),
        }
    }
}

/// Endpoint that will receive data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Target kind.
    #[serde(rename = "type")]
    pub target_type: TargetType,
    /// Concrete endpoint name(s), e.g. a model or service name.
    pub destination: Destination,
    /// Optional free-text purpose shown in consent UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Optional model metadata for LLM targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_metadata: Option<Value>,
}

/// The party asking for data access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    /// Host application identifier (trusted as supplied).
    pub host_id: HostId,
    /// Optional session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Optional request timestamp in unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Full context of an attempted data access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageContext {
    /// Requested usage level.
    pub data_usage: DataUsage,
    /// Requesting party.
    pub requester: Requester,
    /// Receiving endpoint.
    pub target: Target,
}

// ============================================================================
// SECTION: Permissions
// ============================================================================

/// Permission value for a usage level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionSetting {
    /// Permit the access.
    Allow,
    /// Deny the access.
    Deny,
    /// Require an explicit user decision.
    Prompt,
}

impl PermissionSetting {
    /// Returns a stable label for the setting.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Prompt => "prompt",
        }
    }
}

/// User decision on a consent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentDecision {
    /// The user granted the access.
    Allow,
    /// The user refused the access.
    Deny,
}

impl ConsentDecision {
    /// Returns a stable label for the decision.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// Allowlist value: the literal keyword `"none"` or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetList {
    /// No destination is allowed.
    None,
    /// Only the listed destinations are allowed.
    List(Vec<String>),
}

impl TargetList {
    /// Returns true when the destination passes this list.
    #[must_use]
    pub fn allows(&self, destination: &str) -> bool {
        match self {
            Self::None => false,
            Self::List(entries) => entries.iter().any(|entry| entry == destination),
        }
    }
}

/// Serde bridge for [`TargetList`]: `"none"` or a string array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum TargetListRepr {
    /// Keyword form.
    Keyword(String),
    /// Explicit list form.
    List(Vec<String>),
}

impl TryFrom<TargetListRepr> for TargetList {
    type Error = String;

    fn try_from(value: TargetListRepr) -> Result<Self, Self::Error> {
        match value {
            TargetListRepr::Keyword(keyword) if keyword == "none" => Ok(Self::None),
            TargetListRepr::Keyword(keyword) => {
                Err(format!("unknown target list keyword '{keyword}' (expected \"none\")"))
            }
            TargetListRepr::List(entries) => Ok(Self::List(entries)),
        }
    }
}

impl From<TargetList> for TargetListRepr {
    fn from(value: TargetList) -> Self {
        match value {
            TargetList::None => Self::Keyword("none".to_string()),
            TargetList::List(entries) => Self::List(entries),
        }
    }
}

impl Serialize for TargetList {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TargetListRepr::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TargetList {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = TargetListRepr::deserialize(deserializer)?;
        Self::try_from(repr).map_err(serde::de::Error::custom)
    }
}

/// Per-tool target restrictions.
///
/// Unified fields (`allowed_targets`/`blocked_targets`) take precedence;
/// legacy per-type lists apply only when the unified fields did not decide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetPermissions {
    /// Unified allowlist across all target kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_targets: Option<TargetList>,
    /// Unified blocklist across all target kinds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_targets: Vec<String>,
    /// Legacy blocklist applied to server targets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_servers: Vec<String>,
    /// Legacy allowlist applied to server targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_servers: Option<TargetList>,
    /// Legacy allowlist applied to client targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_clients: Option<TargetList>,
}

/// Per-tool consent behavior overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsentOverrides {
    /// Always require consent for this tool.
    #[serde(default)]
    pub always_require_consent: bool,
    /// Never require consent for this tool.
    #[serde(default)]
    pub never_require_consent: bool,
    /// Destinations exempt from consent for this tool.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_without_consent: Vec<String>,
    /// Custom message shown in the consent UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_consent_message: Option<String>,
}

/// Data policy attached to a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPolicy {
    /// Permission per usage level; absent levels fall back per hierarchy.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data_usage_permissions: BTreeMap<DataUsage, PermissionSetting>,
    /// Target restrictions.
    #[serde(default)]
    pub target_permissions: TargetPermissions,
    /// Consent behavior overrides.
    #[serde(default)]
    pub consent_overrides: ConsentOverrides,
}

/// A tool known to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the tool arguments (carried opaquely).
    #[serde(default)]
    pub input_schema: Value,
    /// Whether the tool's output is sensitive and must be cached.
    #[serde(default)]
    pub is_sensitive: bool,
    /// Optional data policy governing access to the tool's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_policy: Option<DataPolicy>,
}

// ============================================================================
// SECTION: Target Categories
// ============================================================================

/// Informational trust annotation for a destination.
///
/// Trust level is never load-bearing for authorization; it only annotates
/// consent-request UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// High operator trust.
    High,
    /// Medium operator trust.
    Medium,
    /// Low operator trust.
    Low,
}

/// Organizational category of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    /// Operated by the same organization.
    Internal,
    /// Operated by a contractual partner.
    Partner,
    /// Operated by an unrelated third party.
    External,
    /// Publicly reachable endpoint.
    Public,
}

/// Retention behavior declared for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataRetention {
    /// Data is discarded after the request.
    Ephemeral,
    /// Data lives for the session.
    Session,
    /// Data is retained indefinitely.
    Permanent,
}

/// Free-form category metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryMetadata {
    /// Declared retention behavior.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_retention: Option<DataRetention>,
    /// Operator notes shown in consent UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Configured classification of a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCategory {
    /// Target kind of the destination.
    #[serde(rename = "type")]
    pub target_type: TargetType,
    /// Organizational category.
    pub category: CategoryKind,
    /// Informational trust annotation.
    pub trust_level: TrustLevel,
    /// Whether consent is required for this destination.
    pub requires_consent: bool,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: CategoryMetadata,
}

// ============================================================================
// SECTION: Error Catalog
// ============================================================================

/// Stable wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing or ill-typed parameter.
    InvalidParams,
    /// Unknown method.
    MethodNotFound,
    /// Unhandled fault.
    InternalError,
    /// Placeholder referenced an absent cache entry.
    CacheMiss,
    /// Similarity below the reference threshold.
    ReferenceNotFound,
    /// Aggregate resolver failure.
    ResolutionFailed,
    /// Unknown call or consent identifier.
    DataNotFound,
    /// Policy denied access.
    InsufficientPermissions,
    /// Requested usage level not permitted.
    InvalidDataUsage,
    /// A consent decision is needed.
    ConsentRequired,
    /// The user returned deny.
    ConsentDenied,
    /// The pending consent wait expired.
    ConsentTimeout,
    /// Unparseable target specification.
    InvalidTarget,
}

impl ErrorCode {
    /// Returns the JSON-RPC error code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::InvalidParams => -32602,
            Self::MethodNotFound => -32601,
            Self::InternalError => -32603,
            Self::CacheMiss => -32001,
            Self::ReferenceNotFound => -32002,
            Self::ResolutionFailed => -32003,
            Self::DataNotFound => -32004,
            Self::InsufficientPermissions => -32005,
            Self::InvalidDataUsage => -32006,
            Self::ConsentRequired => -32007,
            Self::ConsentDenied => -32008,
            Self::ConsentTimeout => -32009,
            Self::InvalidTarget => -32010,
        }
    }

    /// Returns the stable error name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InvalidParams => "INVALID_PARAMS",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::InternalError => "INTERNAL_ERROR",
            Self::CacheMiss => "CACHE_MISS",
            Self::ReferenceNotFound => "REFERENCE_NOT_FOUND",
            Self::ResolutionFailed => "RESOLUTION_FAILED",
            Self::DataNotFound => "DATA_NOT_FOUND",
            Self::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            Self::InvalidDataUsage => "INVALID_DATA_USAGE",
            Self::ConsentRequired => "CONSENT_REQUIRED",
            Self::ConsentDenied => "CONSENT_DENIED",
            Self::ConsentTimeout => "CONSENT_TIMEOUT",
            Self::InvalidTarget => "INVALID_TARGET",
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
