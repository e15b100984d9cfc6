// crates/mcpp-config/src/config.rs
// ============================================================================
// Module: MCPP Configuration
// Description: Configuration loading and validation for MCPP servers.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: mcpp-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path
//! limits. Missing or invalid configuration fails closed to preserve the
//! privacy posture: a config error stops the server instead of running with
//! permissive defaults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use mcpp_core::ConsentTriggers;
use mcpp_core::DefaultTargetPolicy;
use mcpp_core::PolicySettings;
use mcpp_core::core::ConsentDecision;
use mcpp_core::core::DataPolicy;
use mcpp_core::core::DataUsage;
use mcpp_core::core::PermissionSetting;
use mcpp_core::core::TargetCategory;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "mcpp.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "MCPP_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default maximum request body size in bytes.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Default maximum inflight requests.
pub(crate) const DEFAULT_MAX_INFLIGHT: usize = 256;
/// Minimum allowed rate limit window in milliseconds.
pub(crate) const MIN_RATE_LIMIT_WINDOW_MS: u64 = 100;
/// Maximum allowed rate limit window in milliseconds.
pub(crate) const MAX_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
/// Maximum allowed requests per rate limit window.
pub(crate) const MAX_RATE_LIMIT_REQUESTS: u32 = 100_000;
/// Maximum number of tracked rate limit entries.
pub(crate) const MAX_RATE_LIMIT_ENTRIES: usize = 65_536;
/// Default max requests per window when rate limiting is enabled.
pub(crate) const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 1_000;
/// Default rate limit window in milliseconds when enabled.
pub(crate) const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 1_000;
/// Default max tracked rate limit entries when enabled.
pub(crate) const DEFAULT_RATE_LIMIT_MAX_ENTRIES: usize = 4_096;
/// Minimum consent wait timeout in seconds.
pub(crate) const MIN_CONSENT_TIMEOUT_SECONDS: u64 = 1;
/// Maximum consent wait timeout in seconds.
pub(crate) const MAX_CONSENT_TIMEOUT_SECONDS: u64 = 3_600;
/// Default consent wait timeout in seconds.
pub(crate) const DEFAULT_CONSENT_TIMEOUT_SECONDS: u64 = 120;
/// Minimum remembered-decision lifetime in minutes.
pub(crate) const MIN_CONSENT_CACHE_MINUTES: u64 = 1;
/// Maximum remembered-decision lifetime in minutes (one week).
pub(crate) const MAX_CONSENT_CACHE_MINUTES: u64 = 10_080;
/// Default remembered-decision lifetime in minutes.
pub(crate) const DEFAULT_CONSENT_CACHE_MINUTES: u64 = 30;
/// Maximum concurrently pending consent requests.
pub(crate) const MAX_CONSENT_PENDING: usize = 4_096;
/// Default bound on concurrently pending consent requests.
pub(crate) const DEFAULT_CONSENT_PENDING: usize = 256;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// File access errors.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parse errors.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Validation errors.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// MCPP server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct McppConfig {
    /// Server transport and limits configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Policy defaults and trust configuration.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Consent flow configuration.
    #[serde(default)]
    pub consent: ConsentConfig,
    /// Destination category entries.
    #[serde(default)]
    pub target_categories: Vec<TargetCategoryConfig>,
    /// Per-tool policy overrides.
    #[serde(default)]
    pub tools: Vec<ToolPolicyConfig>,
}

impl McppConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// Resolution order: explicit path, the `MCPP_CONFIG` environment
    /// variable, then `mcpp.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.policy.validate()?;
        self.consent.validate()?;
        for (index, category) in self.target_categories.iter().enumerate() {
            category.validate().map_err(|err| {
                ConfigError::Invalid(format!("target_categories[{index}]: {err}"))
            })?;
            if self.target_categories[..index]
                .iter()
                .any(|prior| prior.destination == category.destination)
            {
                return Err(ConfigError::Invalid(format!(
                    "target_categories[{index}]: duplicate destination '{}'",
                    category.destination
                )));
            }
        }
        for (index, tool) in self.tools.iter().enumerate() {
            tool.validate()
                .map_err(|err| ConfigError::Invalid(format!("tools[{index}]: {err}")))?;
            if self.tools[..index].iter().any(|prior| prior.name == tool.name) {
                return Err(ConfigError::Invalid(format!(
                    "tools[{index}]: duplicate tool name '{}'",
                    tool.name
                )));
            }
        }
        Ok(())
    }

    /// Builds the runtime policy snapshot consumed by the evaluator.
    #[must_use]
    pub fn policy_settings(&self) -> PolicySettings {
        let mut target_categories = BTreeMap::new();
        for entry in &self.target_categories {
            target_categories.insert(entry.destination.clone(), entry.category.clone());
        }
        PolicySettings {
            default_data_usage_policy: self.policy.default_data_usage_policy.to_map(),
            default_target_policy: self.policy.default_target_policy.clone(),
            trusted_targets: self.policy.trusted_targets.clone(),
            trusted_domains: self.policy.trusted_domains.clone(),
            target_categories,
            require_consent_for: self.policy.require_consent_for,
        }
    }
}

/// Transport type for the JSON-RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerTransport {
    /// Framed JSON-RPC over stdin/stdout.
    #[default]
    Stdio,
    /// JSON-RPC over HTTP POST.
    Http,
    /// JSON-RPC over HTTP POST with SSE responses.
    Sse,
}

/// Server configuration for MCPP transports.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Transport type.
    #[serde(default)]
    pub transport: ServerTransport,
    /// Bind address for HTTP or SSE transports.
    #[serde(default)]
    pub bind: Option<String>,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Request limits (rate/concurrency).
    #[serde(default)]
    pub limits: ServerLimitsConfig,
    /// Audit logging configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: ServerTransport::Stdio,
            bind: None,
            max_body_bytes: default_max_body_bytes(),
            limits: ServerLimitsConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validates server transport configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_body_bytes must be greater than zero".to_string(),
            ));
        }
        self.limits.validate()?;
        match self.transport {
            ServerTransport::Stdio => Ok(()),
            ServerTransport::Http | ServerTransport::Sse => {
                let bind = self.bind.as_deref().unwrap_or("");
                if bind.is_empty() {
                    return Err(ConfigError::Invalid(
                        "bind address required for http/sse transports".to_string(),
                    ));
                }
                if bind.parse::<std::net::SocketAddr>().is_err() {
                    return Err(ConfigError::Invalid(format!("invalid bind address '{bind}'")));
                }
                Ok(())
            }
        }
    }
}

/// Request limits for the server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerLimitsConfig {
    /// Maximum inflight requests.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    /// Optional fixed-window rate limiting.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ServerLimitsConfig {
    fn default() -> Self {
        Self {
            max_inflight: default_max_inflight(),
            rate_limit: None,
        }
    }
}

impl ServerLimitsConfig {
    /// Validates limit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_inflight == 0 {
            return Err(ConfigError::Invalid("max_inflight must be greater than zero".to_string()));
        }
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        Ok(())
    }
}

/// Fixed-window rate limit configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: u32,
    /// Window length in milliseconds.
    #[serde(default = "default_rate_limit_window_ms")]
    pub window_ms: u64,
    /// Maximum tracked buckets.
    #[serde(default = "default_rate_limit_max_entries")]
    pub max_entries: usize,
}

impl RateLimitConfig {
    /// Validates rate limit bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 || self.max_requests > MAX_RATE_LIMIT_REQUESTS {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.max_requests must be in [1, {MAX_RATE_LIMIT_REQUESTS}]"
            )));
        }
        if self.window_ms < MIN_RATE_LIMIT_WINDOW_MS || self.window_ms > MAX_RATE_LIMIT_WINDOW_MS {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.window_ms must be in [{MIN_RATE_LIMIT_WINDOW_MS}, \
                 {MAX_RATE_LIMIT_WINDOW_MS}]"
            )));
        }
        if self.max_entries == 0 || self.max_entries > MAX_RATE_LIMIT_ENTRIES {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.max_entries must be in [1, {MAX_RATE_LIMIT_ENTRIES}]"
            )));
        }
        Ok(())
    }
}

/// Audit logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    /// Whether audit logging is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Optional audit log file path (stderr when absent).
    #[serde(default)]
    pub path: Option<String>,
}

/// Policy defaults and trust configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// Server default permission per usage level.
    #[serde(default)]
    pub default_data_usage_policy: DataUsagePolicyConfig,
    /// Global target-kind defaults.
    #[serde(default)]
    pub default_target_policy: DefaultTargetPolicy,
    /// Destinations exempt from consent globally.
    #[serde(default)]
    pub trusted_targets: Vec<String>,
    /// Domains exempt from consent (`literal` or `*.suffix`).
    #[serde(default)]
    pub trusted_domains: Vec<String>,
    /// Consent trigger flags.
    #[serde(default)]
    pub require_consent_for: ConsentTriggers,
}

impl PolicyConfig {
    /// Validates trust lists.
    fn validate(&self) -> Result<(), ConfigError> {
        for target in &self.trusted_targets {
            if target.trim().is_empty() {
                return Err(ConfigError::Invalid("trusted_targets entries must be set".to_string()));
            }
        }
        for domain in &self.trusted_domains {
            validate_trusted_domain(domain)?;
        }
        Ok(())
    }
}

/// Complete per-usage-level default map.
#[derive(Debug, Clone, Deserialize)]
pub struct DataUsagePolicyConfig {
    /// Default for display usage.
    #[serde(default = "default_allow")]
    pub display: PermissionSetting,
    /// Default for process usage.
    #[serde(default = "default_allow")]
    pub process: PermissionSetting,
    /// Default for store usage.
    #[serde(default = "default_prompt")]
    pub store: PermissionSetting,
    /// Default for transfer usage.
    #[serde(default = "default_prompt")]
    pub transfer: PermissionSetting,
}

impl Default for DataUsagePolicyConfig {
    fn default() -> Self {
        Self {
            display: default_allow(),
            process: default_allow(),
            store: default_prompt(),
            transfer: default_prompt(),
        }
    }
}

impl DataUsagePolicyConfig {
    /// Returns the complete usage-level map for the evaluator.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<DataUsage, PermissionSetting> {
        let mut map = BTreeMap::new();
        map.insert(DataUsage::Display, self.display);
        map.insert(DataUsage::Process, self.process);
        map.insert(DataUsage::Store, self.store);
        map.insert(DataUsage::Transfer, self.transfer);
        map
    }
}

/// Consent flow mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentMode {
    /// Return `CONSENT_REQUIRED` immediately; the host re-issues the call.
    #[default]
    Notify,
    /// Park the calling operation until the decision or timeout.
    Block,
}

/// Consent flow configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsentConfig {
    /// Consent flow mode.
    #[serde(default)]
    pub mode: ConsentMode,
    /// Seconds a pending consent request stays answerable.
    #[serde(default = "default_consent_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Decision applied when a parked wait times out.
    #[serde(default = "default_on_timeout")]
    pub default_on_timeout: ConsentDecision,
    /// Remembered-decision lifetime when no duration is supplied.
    #[serde(default = "default_consent_cache_minutes")]
    pub cache_duration_minutes: u64,
    /// Bound on concurrently pending consent requests.
    #[serde(default = "default_consent_pending")]
    pub max_pending: usize,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            mode: ConsentMode::Notify,
            timeout_seconds: default_consent_timeout_seconds(),
            default_on_timeout: default_on_timeout(),
            cache_duration_minutes: default_consent_cache_minutes(),
            max_pending: default_consent_pending(),
        }
    }
}

impl ConsentConfig {
    /// Validates consent bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_seconds < MIN_CONSENT_TIMEOUT_SECONDS
            || self.timeout_seconds > MAX_CONSENT_TIMEOUT_SECONDS
        {
            return Err(ConfigError::Invalid(format!(
                "consent.timeout_seconds must be in [{MIN_CONSENT_TIMEOUT_SECONDS}, \
                 {MAX_CONSENT_TIMEOUT_SECONDS}]"
            )));
        }
        if self.cache_duration_minutes < MIN_CONSENT_CACHE_MINUTES
            || self.cache_duration_minutes > MAX_CONSENT_CACHE_MINUTES
        {
            return Err(ConfigError::Invalid(format!(
                "consent.cache_duration_minutes must be in [{MIN_CONSENT_CACHE_MINUTES}, \
                 {MAX_CONSENT_CACHE_MINUTES}]"
            )));
        }
        if self.max_pending == 0 || self.max_pending > MAX_CONSENT_PENDING {
            return Err(ConfigError::Invalid(format!(
                "consent.max_pending must be in [1, {MAX_CONSENT_PENDING}]"
            )));
        }
        Ok(())
    }
}

/// Destination category entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetCategoryConfig {
    /// Destination string the category applies to.
    pub destination: String,
    /// Category payload.
    #[serde(flatten)]
    pub category: TargetCategory,
}

impl TargetCategoryConfig {
    /// Validates the category entry.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.destination.trim().is_empty() {
            return Err(ConfigError::Invalid("destination must be set".to_string()));
        }
        Ok(())
    }
}

/// Per-tool policy override entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolPolicyConfig {
    /// Tool name the override applies to.
    pub name: String,
    /// Whether the tool's output is sensitive.
    #[serde(default)]
    pub sensitive: bool,
    /// Optional data policy for the tool.
    #[serde(default)]
    pub data_policy: Option<DataPolicy>,
}

impl ToolPolicyConfig {
    /// Validates the tool entry.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("tool name must be set".to_string()));
        }
        if let Some(policy) = &self.data_policy {
            for blocked in &policy.target_permissions.blocked_targets {
                if blocked.trim().is_empty() {
                    return Err(ConfigError::Invalid(
                        "blocked_targets entries must be set".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

const fn default_max_inflight() -> usize {
    DEFAULT_MAX_INFLIGHT
}

const fn default_rate_limit_max_requests() -> u32 {
    DEFAULT_RATE_LIMIT_MAX_REQUESTS
}

const fn default_rate_limit_window_ms() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_MS
}

const fn default_rate_limit_max_entries() -> usize {
    DEFAULT_RATE_LIMIT_MAX_ENTRIES
}

const fn default_consent_timeout_seconds() -> u64 {
    DEFAULT_CONSENT_TIMEOUT_SECONDS
}

const fn default_on_timeout() -> ConsentDecision {
    ConsentDecision::Deny
}

const fn default_consent_cache_minutes() -> u64 {
    DEFAULT_CONSENT_CACHE_MINUTES
}

const fn default_consent_pending() -> usize {
    DEFAULT_CONSENT_PENDING
}

const fn default_allow() -> PermissionSetting {
    PermissionSetting::Allow
}

const fn default_prompt() -> PermissionSetting {
    PermissionSetting::Prompt
}

// ============================================================================
// SECTION: Path Resolution
// ============================================================================

/// Resolves the config path from argument, environment, or default.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{CONFIG_ENV_VAR} must not be empty")));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates path shape against traversal and length abuse.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let as_str = path.to_string_lossy();
    if as_str.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds length limit".to_string()));
    }
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(ConfigError::Invalid(
                    "config path must not contain parent traversal".to_string(),
                ));
            }
            Component::Normal(part) => {
                if part.to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
                    return Err(ConfigError::Invalid(
                        "config path component exceeds length limit".to_string(),
                    ));
                }
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    Ok(())
}

/// Validates one trusted-domain entry.
fn validate_trusted_domain(domain: &str) -> Result<(), ConfigError> {
    let body = domain.strip_prefix("*.").unwrap_or(domain);
    if body.is_empty() {
        return Err(ConfigError::Invalid(format!("trusted domain '{domain}' has no suffix")));
    }
    if body.contains('*') {
        return Err(ConfigError::Invalid(format!(
            "trusted domain '{domain}' may only use a leading *. wildcard"
        )));
    }
    if body.chars().any(char::is_whitespace) {
        return Err(ConfigError::Invalid(format!(
            "trusted domain '{domain}' must not contain whitespace"
        )));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
