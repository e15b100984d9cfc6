// crates/mcpp-core/src/policy.rs
// ============================================================================
// Module: MCPP Policy Evaluator
// Description: Ordered, fail-closed evaluation of data-access policy.
// Purpose: Decide allow/deny/prompt for a (tool, usage context) pair.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! The evaluator runs three ordered sub-checks: usage-level resolution,
//! target permission evaluation, and the consent check. Every step
//! short-circuits on the first denial. A permission set at a level grants
//! lower levels only when the value is `allow`; an explicit deny at a lower
//! level forces deny at the requested level. Only `allowed = true` on the
//! outcome authorizes action; callers must never infer an allow from the
//! absence of an error code.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::CategoryKind;
use crate::core::DataRetention;
use crate::core::DataUsage;
use crate::core::ErrorCode;
use crate::core::PermissionSetting;
use crate::core::TargetCategory;
use crate::core::TargetList;
use crate::core::TargetType;
use crate::core::ToolSpec;
use crate::core::UsageContext;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Global defaults applied to target kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultTargetPolicy {
    /// Default server allowlist (`"none"` denies every server).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers: Option<TargetList>,
    /// Default LLM policy.
    #[serde(default)]
    pub llm: LlmDefaultPolicy,
}

/// Global default for LLM targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmDefaultPolicy {
    /// LLM targets pass the global check.
    #[default]
    Allow,
    /// LLM targets are denied globally.
    Deny,
}

/// Trigger flags that demand consent when they fire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentTriggers {
    /// Any transfer-level usage requires consent.
    #[serde(default)]
    pub any_transfer: bool,
    /// Any usage of a sensitive tool's data requires consent.
    #[serde(default)]
    pub sensitive_data_transfer: bool,
    /// Any LLM target requires consent.
    #[serde(default)]
    pub llm_data_access: bool,
    /// Transfers to external-category servers require consent.
    #[serde(default)]
    pub external_server_transfer: bool,
}

/// Runtime policy model consulted by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Server default permission per usage level (complete map).
    pub default_data_usage_policy: BTreeMap<DataUsage, PermissionSetting>,
    /// Global target-kind defaults.
    #[serde(default)]
    pub default_target_policy: DefaultTargetPolicy,
    /// Destinations exempt from consent globally.
    #[serde(default)]
    pub trusted_targets: Vec<String>,
    /// Domains exempt from consent (`literal` or `*.suffix`).
    #[serde(default)]
    pub trusted_domains: Vec<String>,
    /// Destination classifications keyed by destination string.
    #[serde(default)]
    pub target_categories: BTreeMap<String, TargetCategory>,
    /// Consent trigger flags.
    #[serde(default)]
    pub require_consent_for: ConsentTriggers,
}

impl Default for PolicySettings {
    fn default() -> Self {
        let mut default_data_usage_policy = BTreeMap::new();
        default_data_usage_policy.insert(DataUsage::Display, PermissionSetting::Allow);
        default_data_usage_policy.insert(DataUsage::Process, PermissionSetting::Allow);
        default_data_usage_policy.insert(DataUsage::Store, PermissionSetting::Prompt);
        default_data_usage_policy.insert(DataUsage::Transfer, PermissionSetting::Prompt);
        Self {
            default_data_usage_policy,
            default_target_policy: DefaultTargetPolicy::default(),
            trusted_targets: Vec::new(),
            trusted_domains: Vec::new(),
            target_categories: BTreeMap::new(),
            require_consent_for: ConsentTriggers::default(),
        }
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Final decision of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    /// The access is permitted.
    Allow,
    /// The access is denied.
    Deny,
    /// A consent decision must be obtained.
    Prompt,
}

/// Status of one evaluator sub-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubCheckStatus {
    /// The check passed.
    Passed,
    /// The check denied the access.
    Failed,
    /// The check requires a consent decision.
    Prompt,
    /// The check was short-circuited by an earlier denial.
    Skipped,
}

/// One evaluator sub-check with its reason label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCheck {
    /// Check status.
    pub status: SubCheckStatus,
    /// Reason label when the check failed or prompted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SubCheck {
    /// A passed check.
    #[must_use]
    pub const fn passed() -> Self {
        Self {
            status: SubCheckStatus::Passed,
            reason: None,
        }
    }

    /// A skipped check.
    #[must_use]
    pub const fn skipped() -> Self {
        Self {
            status: SubCheckStatus::Skipped,
            reason: None,
        }
    }

    /// A failed check with its reason label.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: SubCheckStatus::Failed,
            reason: Some(reason.into()),
        }
    }

    /// A prompting check with its reason label.
    #[must_use]
    pub fn prompt(reason: impl Into<String>) -> Self {
        Self {
            status: SubCheckStatus::Prompt,
            reason: Some(reason.into()),
        }
    }
}

/// Per-sub-check record attached to permission errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationDetails {
    /// Usage-level resolution.
    pub usage_check: SubCheck,
    /// Target permission evaluation.
    pub target_check: SubCheck,
    /// Consent requirement evaluation.
    pub consent_check: SubCheck,
}

/// Consent demand produced by a prompting evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentNeed {
    /// Whether consent is required.
    pub required: bool,
    /// Reason labels that fired, in evaluation order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    /// Custom consent message from the tool overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConsentNeed {
    fn push_reason(&mut self, reason: &str) {
        if !self.reasons.iter().any(|existing| existing == reason) {
            self.reasons.push(reason.to_string());
        }
        self.required = true;
    }
}

/// Result of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyOutcome {
    /// Final decision value.
    pub decision: PolicyDecision,
    /// True only when the access is authorized.
    pub allowed: bool,
    /// Wire error code for deny/prompt outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Human-readable error message for deny/prompt outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Reason labels accumulated across the checks.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    /// Consent demand when the decision is prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_need: Option<ConsentNeed>,
    /// Per-sub-check record.
    pub validation_details: ValidationDetails,
}

// ============================================================================
// SECTION: Evaluator
// ============================================================================

/// Policy evaluator over a fixed settings snapshot.
///
/// Evaluations observe a consistent snapshot of the server configuration;
/// settings never change under a live evaluator.
#[derive(Debug, Clone, Default)]
pub struct PolicyEvaluator {
    /// Policy settings snapshot.
    settings: PolicySettings,
}

impl PolicyEvaluator {
    /// Creates an evaluator over the given settings.
    #[must_use]
    pub const fn new(settings: PolicySettings) -> Self {
        Self {
            settings,
        }
    }

    /// Returns the settings snapshot.
    #[must_use]
    pub const fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    /// Evaluates a `(tool, usage context)` pair.
    ///
    /// The tool is optional; absence means only global defaults apply.
    #[must_use]
    pub fn evaluate(&self, tool: Option<&ToolSpec>, context: &UsageContext) -> PolicyOutcome {
        if context.target.destination.is_empty() {
            return PolicyOutcome {
                decision: PolicyDecision::Deny,
                allowed: false,
                error_code: Some(ErrorCode::InvalidTarget),
                error_message: Some("target destination is empty".to_string()),
                reasons: vec!["empty_destination".to_string()],
                consent_need: None,
                validation_details: ValidationDetails {
                    usage_check: SubCheck::skipped(),
                    target_check: SubCheck::failed("empty_destination"),
                    consent_check: SubCheck::skipped(),
                },
            };
        }

        let usage_setting = self.effective_usage(tool, context.data_usage);
        if usage_setting == PermissionSetting::Deny {
            return self.usage_denied(context, "denied_at_requested_level");
        }
        if let Some(lower) = self.lower_level_deny(tool, context.data_usage) {
            return self.usage_denied(context, &format!("denied_at_lower_level_{lower}"));
        }

        if let Err(reason) = self.check_targets(tool, context) {
            return PolicyOutcome {
                decision: PolicyDecision::Deny,
                allowed: false,
                error_code: Some(ErrorCode::InsufficientPermissions),
                error_message: Some(format!(
                    "target '{}' is not permitted: {reason}",
                    context.target.destination.canonical()
                )),
                reasons: vec![reason.clone()],
                consent_need: None,
                validation_details: ValidationDetails {
                    usage_check: SubCheck::passed(),
                    target_check: SubCheck::failed(reason),
                    consent_check: SubCheck::skipped(),
                },
            };
        }

        let mut need = self.consent_requirement(tool, context);
        if usage_setting == PermissionSetting::Prompt {
            // The prompt literal is itself a consent trigger.
            need.push_reason("usage_prompt");
        }

        if need.required {
            let reasons = need.reasons.clone();
            return PolicyOutcome {
                decision: PolicyDecision::Prompt,
                allowed: false,
                error_code: Some(ErrorCode::ConsentRequired),
                error_message: Some(format!(
                    "consent is required before '{}' data flows to '{}'",
                    context.data_usage,
                    context.target.destination.canonical()
                )),
                reasons: reasons.clone(),
                consent_need: Some(need),
                validation_details: ValidationDetails {
                    usage_check: SubCheck::passed(),
                    target_check: SubCheck::passed(),
                    consent_check: SubCheck::prompt(reasons.join(",")),
                },
            };
        }

        PolicyOutcome {
            decision: PolicyDecision::Allow,
            allowed: true,
            error_code: None,
            error_message: None,
            reasons: Vec::new(),
            consent_need: None,
            validation_details: ValidationDetails {
                usage_check: SubCheck::passed(),
                target_check: SubCheck::passed(),
                consent_check: SubCheck::passed(),
            },
        }
    }

    /// Builds the deny outcome for a usage-level violation.
    fn usage_denied(&self, context: &UsageContext, reason: &str) -> PolicyOutcome {
        PolicyOutcome {
            decision: PolicyDecision::Deny,
            allowed: false,
            error_code: Some(ErrorCode::InvalidDataUsage),
            error_message: Some(format!(
                "data usage '{}' is not permitted",
                context.data_usage
            )),
            reasons: vec![reason.to_string()],
            consent_need: None,
            validation_details: ValidationDetails {
                usage_check: SubCheck::failed(reason),
                target_check: SubCheck::skipped(),
                consent_check: SubCheck::skipped(),
            },
        }
    }

    /// Resolves the effective permission at the requested usage level.
    ///
    /// Tool-level settings win at their own level; an absent tool entry is
    /// implicitly granted when a higher tool level is `allow`; otherwise the
    /// server default applies. Missing defaults fail closed to deny.
    fn effective_usage(&self, tool: Option<&ToolSpec>, usage: DataUsage) -> PermissionSetting {
        if let Some(policy) = tool.and_then(|spec| spec.data_policy.as_ref()) {
            if let Some(setting) = policy.data_usage_permissions.get(&usage) {
                return *setting;
            }
            let implicit = policy.data_usage_permissions.iter().any(|(level, setting)| {
                level.rank() > usage.rank() && *setting == PermissionSetting::Allow
            });
            if implicit {
                return PermissionSetting::Allow;
            }
        }
        self.settings
            .default_data_usage_policy
            .get(&usage)
            .copied()
            .unwrap_or(PermissionSetting::Deny)
    }

    /// Finds an explicit deny at a level below the requested one.
    fn lower_level_deny(&self, tool: Option<&ToolSpec>, usage: DataUsage) -> Option<DataUsage> {
        let tool_map = tool
            .and_then(|spec| spec.data_policy.as_ref())
            .map(|policy| &policy.data_usage_permissions);
        DataUsage::ALL
            .into_iter()
            .filter(|level| level.rank() < usage.rank())
            .find(|level| {
                let explicit = tool_map
                    .and_then(|map| map.get(level).copied())
                    .or_else(|| self.settings.default_data_usage_policy.get(level).copied());
                explicit == Some(PermissionSetting::Deny)
            })
    }

    /// Evaluates target permissions; the error carries the deny reason.
    fn check_targets(&self, tool: Option<&ToolSpec>, context: &UsageContext) -> Result<(), String> {
        let target = &context.target;
        let type_label = target.target_type.as_str();
        let permissions = tool
            .and_then(|spec| spec.data_policy.as_ref())
            .map(|policy| &policy.target_permissions);
        for destination in target.destination.iter() {
            if let Some(tool_permissions) = permissions {
                if tool_permissions.blocked_targets.iter().any(|blocked| blocked == destination) {
                    return Err(format!("{type_label}_blocked_by_tool"));
                }
                if let Some(list) = &tool_permissions.allowed_targets {
                    match list {
                        TargetList::None => return Err("no_targets_allowed".to_string()),
                        TargetList::List(_) if !list.allows(destination) => {
                            return Err(format!("{type_label}_not_in_allowlist"));
                        }
                        TargetList::List(_) => {}
                    }
                } else {
                    // Legacy per-type lists apply only when the unified
                    // fields did not decide.
                    match target.target_type {
                        TargetType::Server => {
                            if tool_permissions
                                .blocked_servers
                                .iter()
                                .any(|blocked| blocked == destination)
                            {
                                return Err("server_blocked_by_tool".to_string());
                            }
                            if let Some(list) = &tool_permissions.allowed_servers {
                                match list {
                                    TargetList::None => {
                                        return Err("no_targets_allowed".to_string());
                                    }
                                    TargetList::List(_) if !list.allows(destination) => {
                                        return Err("server_not_in_allowlist".to_string());
                                    }
                                    TargetList::List(_) => {}
                                }
                            }
                        }
                        TargetType::Client => {
                            if let Some(list) = &tool_permissions.allowed_clients {
                                match list {
                                    TargetList::None => {
                                        return Err("no_targets_allowed".to_string());
                                    }
                                    TargetList::List(_) if !list.allows(destination) => {
                                        return Err("client_not_in_allowlist".to_string());
                                    }
                                    TargetList::List(_) => {}
                                }
                            }
                        }
                        TargetType::Llm | TargetType::All => {}
                    }
                }
            }

            match target.target_type {
                TargetType::Server => {
                    if let Some(list) = &self.settings.default_target_policy.servers {
                        match list {
                            TargetList::None => return Err("no_servers_allowed".to_string()),
                            TargetList::List(_) if !list.allows(destination) => {
                                return Err("server_not_in_default_allowlist".to_string());
                            }
                            TargetList::List(_) => {}
                        }
                    }
                }
                TargetType::Llm => {
                    if self.settings.default_target_policy.llm == LlmDefaultPolicy::Deny {
                        return Err("llm_denied_globally".to_string());
                    }
                }
                TargetType::Client | TargetType::All => {}
            }
        }
        Ok(())
    }

    /// Evaluates the ordered consent checks.
    fn consent_requirement(&self, tool: Option<&ToolSpec>, context: &UsageContext) -> ConsentNeed {
        let mut need = ConsentNeed::default();
        if context.data_usage == DataUsage::Display
            && context.target.target_type == TargetType::Client
        {
            return need;
        }
        let overrides = tool
            .and_then(|spec| spec.data_policy.as_ref())
            .map(|policy| &policy.consent_overrides);
        if let Some(overrides) = overrides {
            if overrides.never_require_consent {
                return need;
            }
            if overrides.always_require_consent {
                need.push_reason("always_require_consent");
                need.message = overrides.custom_consent_message.clone();
                return need;
            }
        }

        let is_sensitive = tool.is_some_and(|spec| spec.is_sensitive);
        let triggers = self.settings.require_consent_for;
        for destination in context.target.destination.iter() {
            if overrides.is_some_and(|overrides| {
                overrides.allowed_without_consent.iter().any(|allowed| allowed == destination)
            }) {
                continue;
            }
            if self.settings.trusted_targets.iter().any(|trusted| trusted == destination) {
                continue;
            }
            if self
                .settings
                .trusted_domains
                .iter()
                .any(|domain| domain_matches(domain, destination))
            {
                continue;
            }
            let category = self.settings.target_categories.get(destination);
            if category.is_some_and(|category| !category.requires_consent) {
                continue;
            }

            if triggers.any_transfer && context.data_usage == DataUsage::Transfer {
                need.push_reason("any_transfer");
            }
            if triggers.sensitive_data_transfer && is_sensitive {
                need.push_reason("sensitive_data_transfer");
            }
            if triggers.llm_data_access && context.target.target_type == TargetType::Llm {
                need.push_reason("llm_data_access");
            }
            if context.target.target_type == TargetType::Llm
                && category.is_some_and(|category| {
                    category.metadata.data_retention == Some(DataRetention::Permanent)
                })
            {
                need.push_reason("llm_permanent_retention");
            }
            if triggers.external_server_transfer
                && context.target.target_type == TargetType::Server
                && category.is_some_and(|category| category.category == CategoryKind::External)
            {
                need.push_reason("external_server_transfer");
            }
        }
        need
    }
}

/// Matches a destination against a trusted-domain entry.
///
/// Entries are either literal destinations or `*.suffix` wildcards that
/// cover the bare suffix and every subdomain of it.
fn domain_matches(pattern: &str, destination: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        destination == suffix || destination.ends_with(&pattern[1..])
    } else {
        pattern == destination
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
