// crates/mcpp-server/src/dispatch.rs
// ============================================================================
// Module: MCPP Method Dispatcher
// Description: Routes the MCPP wire methods to the core components.
// Purpose: Enforce the policy and consent gates in front of cached data.
// Dependencies: mcpp-core, mcpp-config, serde_json, tokio
// ============================================================================

//! ## Overview
//! The dispatcher maps the four MCPP operations plus the standard MCP tool
//! methods onto the data cache, placeholder engine, reference finder, policy
//! evaluator, and consent coordinator. Sensitive data is never returned
//! without an explicit allow: a deny becomes a structured permission error
//! and a prompt either returns `CONSENT_REQUIRED` (notify mode) or parks the
//! operation on the coordinator (block mode). No lock is held across a
//! parked consent wait.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use mcpp_config::ConsentConfig;
use mcpp_config::ConsentMode;
use mcpp_core::CacheError;
use mcpp_core::ConsentCoordinator;
use mcpp_core::ConsentError;
use mcpp_core::ConsentRequest;
use mcpp_core::ConsentWaitOutcome;
use mcpp_core::DataCache;
use mcpp_core::DataSummary;
use mcpp_core::PendingContext;
use mcpp_core::PolicyDecision;
use mcpp_core::PolicyEvaluator;
use mcpp_core::PolicyOutcome;
use mcpp_core::ReferenceError;
use mcpp_core::ValidationDetails;
use mcpp_core::core::CachedEntry;
use mcpp_core::core::CallId;
use mcpp_core::core::ConsentDecision;
use mcpp_core::core::EntryMetadata;
use mcpp_core::core::EntryPayload;
use mcpp_core::core::ErrorCode;
use mcpp_core::core::RequestId;
use mcpp_core::core::ToolSpec;
use mcpp_core::core::UsageContext;
use mcpp_core::find_reference;
use mcpp_core::resolve_with_tracking;
use mcpp_core::scan_placeholders;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::audit::AuditSink;
use crate::audit::ConsentAuditEvent;
use crate::registry::ToolExecError;
use crate::registry::ToolRegistry;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Method dispatch failures, mapped onto the stable wire error codes.
#[derive(Debug, Error)]
pub enum MethodError {
    /// Missing or ill-typed parameter.
    #[error("{0}")]
    InvalidParams(String),
    /// Unknown method or tool.
    #[error("method or tool '{0}' not found")]
    MethodNotFound(String),
    /// A placeholder referenced an absent or unusable cache entry.
    #[error("{0}")]
    CacheMiss(String),
    /// Unknown call or consent identifier.
    #[error("{0}")]
    DataNotFound(String),
    /// No cell matched above the similarity threshold.
    #[error("no reference matched (best similarity {best_similarity:.3})")]
    ReferenceNotFound {
        /// Best similarity observed across the scan.
        best_similarity: f64,
    },
    /// The resolver could not run.
    #[error("{0}")]
    ResolutionFailed(String),
    /// Policy denied the access.
    #[error("{message}")]
    PermissionDenied {
        /// Human-readable denial message.
        message: String,
        /// Specific wire code (insufficient permissions, invalid usage, or
        /// invalid target).
        code: ErrorCode,
        /// Per-sub-check record for debugging clients.
        details: ValidationDetails,
    },
    /// A consent decision is needed before the operation proceeds.
    #[error("consent required")]
    ConsentRequired {
        /// The consent request the host must resolve.
        request: Box<ConsentRequest>,
    },
    /// The user (or a remembered decision) denied the access.
    #[error("{0}")]
    ConsentDenied(String),
    /// The consent wait expired.
    #[error("{0}")]
    ConsentTimeout(String),
    /// Unhandled fault.
    #[error("internal error")]
    Internal(String),
}

impl MethodError {
    /// Returns the wire error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParams(_) => ErrorCode::InvalidParams,
            Self::MethodNotFound(_) => ErrorCode::MethodNotFound,
            Self::CacheMiss(_) => ErrorCode::CacheMiss,
            Self::DataNotFound(_) => ErrorCode::DataNotFound,
            Self::ReferenceNotFound {
                ..
            } => ErrorCode::ReferenceNotFound,
            Self::ResolutionFailed(_) => ErrorCode::ResolutionFailed,
            Self::PermissionDenied {
                code, ..
            } => *code,
            Self::ConsentRequired {
                ..
            } => ErrorCode::ConsentRequired,
            Self::ConsentDenied(_) => ErrorCode::ConsentDenied,
            Self::ConsentTimeout(_) => ErrorCode::ConsentTimeout,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Returns structured error data for the JSON-RPC error payload.
    ///
    /// Permission errors attach the validation details; consent-required
    /// errors attach the full consent request.
    #[must_use]
    pub fn error_data(&self) -> Option<Value> {
        match self {
            Self::PermissionDenied {
                details, ..
            } => serde_json::to_value(details).ok(),
            Self::ConsentRequired {
                request,
            } => serde_json::to_value(request.as_ref())
                .ok()
                .map(|value| json!({ "consent_request": value })),
            Self::ReferenceNotFound {
                best_similarity,
            } => Some(json!({ "best_similarity": best_similarity })),
            _ => None,
        }
    }
}

impl From<CacheError> for MethodError {
    fn from(err: CacheError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<ConsentError> for MethodError {
    fn from(err: ConsentError) -> Self {
        match err {
            ConsentError::PendingLimit => {
                Self::Internal("too many pending consent requests".to_string())
            }
            ConsentError::Poisoned | ConsentError::DuplicateRequest(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

// ============================================================================
// SECTION: Parameters
// ============================================================================

/// Parameters for `mcpp/get_data`.
#[derive(Debug, Deserialize)]
struct GetDataParams {
    /// Call identifier of the cached entry.
    tool_call_id: String,
    /// Optional usage context gating the read.
    #[serde(default)]
    usage_context: Option<UsageContext>,
}

/// Parameters for `mcpp/find_reference`.
#[derive(Debug, Deserialize)]
struct FindReferenceParams {
    /// Call identifier of the cached table.
    tool_call_id: String,
    /// Free-text keyword to match.
    keyword: String,
    /// Optional column restriction.
    #[serde(default)]
    column_name: Option<String>,
}

/// Parameters for `mcpp/resolve_placeholders`.
#[derive(Debug, Deserialize)]
struct ResolvePlaceholdersParams {
    /// Value tree holding placeholders.
    data: Value,
    /// Optional usage context gating the resolution.
    #[serde(default)]
    usage_context: Option<UsageContext>,
    /// Tool whose policy governs the resolution.
    #[serde(default)]
    tool_name: Option<String>,
}

/// Parameters for `mcpp/provide_consent`.
#[derive(Debug, Deserialize)]
struct ProvideConsentParams {
    /// Pending consent request identifier.
    request_id: String,
    /// The user's decision.
    decision: ConsentDecision,
    /// Whether to remember the decision.
    #[serde(default)]
    remember: Option<bool>,
    /// Remembered-decision lifetime in minutes.
    #[serde(default)]
    duration_minutes: Option<u64>,
}

/// Parameters for `tools/call`.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    /// Tool name.
    name: String,
    /// Raw JSON arguments.
    #[serde(default)]
    arguments: Value,
    /// Caller-supplied call identifier.
    #[serde(default)]
    tool_call_id: Option<String>,
}

// ============================================================================
// SECTION: Method Router
// ============================================================================

/// Configuration inputs for building a method router.
pub struct MethodRouterConfig {
    /// Data cache holding tool-call results.
    pub cache: DataCache,
    /// Consent coordinator and decision cache.
    pub consent: ConsentCoordinator,
    /// Policy evaluator over the configured settings snapshot.
    pub evaluator: PolicyEvaluator,
    /// Tool registry for `tools/*` methods.
    pub registry: Arc<ToolRegistry>,
    /// Consent flow configuration.
    pub consent_config: ConsentConfig,
    /// Audit sink for consent decisions.
    pub audit: Arc<dyn AuditSink>,
}

/// Router for the MCPP wire methods.
#[derive(Clone)]
pub struct MethodRouter {
    /// Data cache holding tool-call results.
    cache: DataCache,
    /// Consent coordinator and decision cache.
    consent: ConsentCoordinator,
    /// Policy evaluator over the configured settings snapshot.
    evaluator: Arc<PolicyEvaluator>,
    /// Tool registry for `tools/*` methods.
    registry: Arc<ToolRegistry>,
    /// Consent flow configuration.
    consent_config: ConsentConfig,
    /// Audit sink for consent decisions.
    audit: Arc<dyn AuditSink>,
    /// Sequence for server-generated call ids.
    call_sequence: Arc<AtomicU64>,
}

impl MethodRouter {
    /// Creates a new method router.
    #[must_use]
    pub fn new(config: MethodRouterConfig) -> Self {
        Self {
            cache: config.cache,
            consent: config.consent,
            evaluator: Arc::new(config.evaluator),
            registry: config.registry,
            consent_config: config.consent_config,
            audit: config.audit,
            call_sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the data cache handle.
    #[must_use]
    pub const fn cache(&self) -> &DataCache {
        &self.cache
    }

    /// Returns the consent coordinator handle.
    #[must_use]
    pub const fn consent(&self) -> &ConsentCoordinator {
        &self.consent
    }

    /// Dispatches a wire method to its handler.
    ///
    /// # Errors
    ///
    /// Returns [`MethodError`] when the method is unknown or the handler
    /// fails; expected outcomes (cache miss, policy deny, consent flow) are
    /// structured errors, never panics.
    pub async fn handle(&self, method: &str, params: Option<Value>) -> Result<Value, MethodError> {
        match method {
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(params),
            "mcpp/get_data" => self.handle_get_data(params).await,
            "mcpp/find_reference" => self.handle_find_reference(params),
            "mcpp/resolve_placeholders" => self.handle_resolve_placeholders(params).await,
            "mcpp/provide_consent" => self.handle_provide_consent(params),
            other => Err(MethodError::MethodNotFound(other.to_string())),
        }
    }

    /// Handles `tools/list`.
    fn handle_tools_list(&self) -> Result<Value, MethodError> {
        Ok(json!({ "tools": self.registry.definitions() }))
    }

    /// Handles `tools/call`.
    ///
    /// Embedded placeholders in the arguments are resolved before execution
    /// so referenced cells flow back to the tool that produced them. For
    /// sensitive tools the standardized output is cached and only a summary
    /// leaves the server.
    fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, MethodError> {
        let params: ToolCallParams = parse_params(params)?;
        let Some(tool) = self.registry.get(&params.name) else {
            return Err(MethodError::MethodNotFound(params.name));
        };
        let now_ms = unix_millis_now();

        let arguments = if params.arguments.is_null() {
            json!({})
        } else {
            params.arguments
        };
        let resolution = resolve_with_tracking(&arguments, &self.cache, now_ms)
            .map_err(|err| MethodError::ResolutionFailed(err.to_string()))?;
        if !resolution.status.is_complete() {
            // Raw placeholder text must never reach a tool.
            return Err(MethodError::CacheMiss(format!(
                "unresolvable placeholders in tool arguments: {}",
                resolution.status.unresolved.join(", ")
            )));
        }

        let output = tool.execute(&resolution.value).map_err(|err| match err {
            ToolExecError::InvalidArguments(message) => MethodError::InvalidParams(message),
            ToolExecError::Failed(message) => MethodError::Internal(message),
        })?;

        let supplied_id = params.tool_call_id.is_some();
        let call_id = match params.tool_call_id {
            Some(id) => {
                let id = CallId::new(id);
                if !id.is_placeholder_safe() {
                    return Err(MethodError::InvalidParams(
                        "tool_call_id must match [A-Za-z0-9_-]+".to_string(),
                    ));
                }
                id
            }
            None => self.next_call_id(),
        };

        if let EntryPayload::Table(table) = &output.payload {
            table
                .validate()
                .map_err(|err| MethodError::Internal(format!("tool produced invalid table: {err}")))?;
        }
        let entry = CachedEntry {
            payload: output.payload,
            metadata: EntryMetadata {
                tool_name: tool.spec().name.clone(),
                created_at_ms: now_ms,
                is_sensitive: tool.spec().is_sensitive,
                expires_at_ms: None,
            },
        };

        if tool.spec().is_sensitive {
            let (row_count, column_names) = match &entry.payload {
                EntryPayload::Table(table) => (table.row_count(), table.headers.clone()),
                EntryPayload::Text(_) | EntryPayload::Json(_) => (0, Vec::new()),
            };
            self.cache.put(&call_id, entry)?;
            let message = output.message.unwrap_or_else(|| {
                format!("result cached under data reference '{call_id}'")
            });
            Ok(json!({
                "message": message,
                "rowCount": row_count,
                "columnNames": column_names,
                "dataRefId": call_id.as_str(),
            }))
        } else {
            // Non-sensitive output is returned inline; it is cached only
            // when the caller supplied a call id to reference it later.
            let payload = serde_json::to_value(&entry.payload)
                .map_err(|err| MethodError::Internal(err.to_string()))?;
            if supplied_id {
                self.cache.put(&call_id, entry)?;
            }
            Ok(json!({
                "message": output.message,
                "data": payload,
                "toolCallId": call_id.as_str(),
            }))
        }
    }

    /// Handles `mcpp/get_data`.
    async fn handle_get_data(&self, params: Option<Value>) -> Result<Value, MethodError> {
        let params: GetDataParams = parse_params(params)?;
        if params.tool_call_id.is_empty() {
            return Err(MethodError::InvalidParams("tool_call_id must be set".to_string()));
        }
        let now_ms = unix_millis_now();
        let call_id = CallId::new(params.tool_call_id);
        let entry = self.cache.get(&call_id, now_ms)?.ok_or_else(|| {
            MethodError::DataNotFound(format!("no cached data for '{call_id}'"))
        })?;

        if let Some(context) = params.usage_context {
            let tool = self.registry.spec(&entry.metadata.tool_name).cloned();
            let summary = DataSummary {
                placeholder_count: 0,
                call_ids: vec![call_id.as_str().to_string()],
            };
            self.authorize(tool.as_ref(), &context, Some(summary), now_ms).await?;
        }

        serde_json::to_value(&entry).map_err(|err| MethodError::Internal(err.to_string()))
    }

    /// Handles `mcpp/find_reference`. No policy gate applies: the minted
    /// placeholder is opaque and discloses no cell data.
    fn handle_find_reference(&self, params: Option<Value>) -> Result<Value, MethodError> {
        let params: FindReferenceParams = parse_params(params)?;
        if params.keyword.is_empty() {
            return Err(MethodError::InvalidParams("keyword must be set".to_string()));
        }
        let now_ms = unix_millis_now();
        let call_id = CallId::new(params.tool_call_id);
        let found = find_reference(
            &self.cache,
            &call_id,
            &params.keyword,
            params.column_name.as_deref(),
            now_ms,
        )
        .map_err(|err| match err {
            ReferenceError::NotFound(id) => {
                MethodError::DataNotFound(format!("no cached data for '{id}'"))
            }
            ReferenceError::NotTabular(_)
            | ReferenceError::NoColumns(_)
            | ReferenceError::UnknownColumn(_) => MethodError::InvalidParams(err.to_string()),
            ReferenceError::BelowThreshold {
                best_similarity,
            } => MethodError::ReferenceNotFound {
                best_similarity,
            },
            ReferenceError::Cache(err) => MethodError::Internal(err.to_string()),
        })?;

        Ok(json!({
            "placeholder": found.placeholder,
            "similarity": found.similarity,
            "metadata": {
                "row": found.row,
                "column": found.column,
                "rows_scanned": found.rows_scanned,
                "cells_scanned": found.cells_scanned,
            },
        }))
    }

    /// Handles `mcpp/resolve_placeholders`.
    ///
    /// With a usage context, policy evaluation runs once for the whole
    /// operation against the named tool's policy before any cache read.
    async fn handle_resolve_placeholders(
        &self,
        params: Option<Value>,
    ) -> Result<Value, MethodError> {
        let params: ResolvePlaceholdersParams = parse_params(params)?;
        let now_ms = unix_millis_now();

        if let Some(context) = params.usage_context {
            let tool = match params.tool_name.as_deref() {
                Some(name) => Some(
                    self.registry
                        .spec(name)
                        .cloned()
                        .ok_or_else(|| MethodError::InvalidParams(format!("unknown tool '{name}'")))?,
                ),
                None => None,
            };
            let found = scan_placeholders(&params.data);
            let mut call_ids: Vec<String> = Vec::new();
            for placeholder in &found {
                let id = placeholder.call_id.as_str().to_string();
                if !call_ids.contains(&id) {
                    call_ids.push(id);
                }
            }
            let summary = DataSummary {
                placeholder_count: found.len(),
                call_ids,
            };
            self.authorize(tool.as_ref(), &context, Some(summary), now_ms).await?;
        }

        let resolution = resolve_with_tracking(&params.data, &self.cache, now_ms)
            .map_err(|err| MethodError::ResolutionFailed(err.to_string()))?;
        Ok(json!({
            "resolved_data": resolution.value,
            "resolution_status": resolution.status,
        }))
    }

    /// Handles `mcpp/provide_consent`.
    fn handle_provide_consent(&self, params: Option<Value>) -> Result<Value, MethodError> {
        let params: ProvideConsentParams = parse_params(params)?;
        if params.request_id.is_empty() {
            return Err(MethodError::InvalidParams("request_id must be set".to_string()));
        }
        let now_ms = unix_millis_now();
        let request_id = RequestId::new(params.request_id);
        let resolved = self
            .consent
            .resolve(&request_id, params.decision, now_ms)?
            .ok_or_else(|| {
                MethodError::DataNotFound(format!(
                    "no pending consent request '{request_id}'"
                ))
            })?;

        let remember = params.remember.unwrap_or(false);
        let remembered = if remember {
            let minutes = params
                .duration_minutes
                .unwrap_or(self.consent_config.cache_duration_minutes);
            self.consent.decisions().record(
                resolved.context.cache_key(),
                params.decision,
                minutes,
                now_ms,
            )?;
            true
        } else {
            false
        };

        self.audit.record_consent(&ConsentAuditEvent::new(
            request_id.as_str().to_string(),
            params.decision.as_str(),
            remembered,
            resolved.context.destination.clone(),
            resolved.context.data_usage.as_str(),
            resolved.context.tool_name.clone(),
        ));

        Ok(json!({
            "request_id": request_id.as_str(),
            "decision": params.decision,
            "remembered": remembered,
        }))
    }

    /// Runs the policy gate and, on prompt, the consent gate.
    async fn authorize(
        &self,
        tool: Option<&ToolSpec>,
        context: &UsageContext,
        summary: Option<DataSummary>,
        now_ms: u64,
    ) -> Result<(), MethodError> {
        let outcome = self.evaluator.evaluate(tool, context);
        match outcome.decision {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Deny => Err(deny_error(outcome)),
            PolicyDecision::Prompt => {
                self.consent_gate(tool, context, outcome, summary, now_ms).await
            }
        }
    }

    /// Consults the decision cache, then issues or parks a consent request.
    async fn consent_gate(
        &self,
        tool: Option<&ToolSpec>,
        context: &UsageContext,
        outcome: PolicyOutcome,
        summary: Option<DataSummary>,
        now_ms: u64,
    ) -> Result<(), MethodError> {
        let pending_context = PendingContext {
            host_id: context.requester.host_id.clone(),
            destination: context.target.destination.canonical(),
            data_usage: context.data_usage,
            tool_name: tool.map(|spec| spec.name.clone()),
        };
        match self.consent.decisions().lookup(&pending_context.cache_key(), now_ms)? {
            Some(ConsentDecision::Allow) => return Ok(()),
            Some(ConsentDecision::Deny) => {
                return Err(MethodError::ConsentDenied(
                    "a remembered decision denies this access".to_string(),
                ));
            }
            None => {}
        }

        let need = outcome.consent_need.unwrap_or_default();
        let request_id = self.consent.next_request_id(now_ms);
        let message = need.message.clone().unwrap_or_else(|| {
            let tool_label =
                pending_context.tool_name.as_deref().unwrap_or("the server");
            format!(
                "Allow {} of data from '{tool_label}' to {} '{}'?",
                context.data_usage,
                context.target.target_type,
                pending_context.destination,
            )
        });
        let timeout_seconds = self.consent_config.timeout_seconds;
        let request = ConsentRequest {
            request_id: request_id.clone(),
            tool_name: pending_context.tool_name.clone(),
            data_usage: context.data_usage,
            target_type: context.target.target_type,
            destination: pending_context.destination.clone(),
            message,
            reasons: need.reasons,
            data_summary: summary,
            created_at_ms: now_ms,
            timeout_seconds,
        };
        let deadline_ms = now_ms.saturating_add(timeout_seconds.saturating_mul(1_000));

        match self.consent_config.mode {
            ConsentMode::Notify => {
                self.consent.register(&request_id, pending_context, deadline_ms, now_ms)?;
                Err(MethodError::ConsentRequired {
                    request: Box::new(request),
                })
            }
            ConsentMode::Block => {
                let waiter = self.consent.register_waiter(
                    &request_id,
                    pending_context,
                    deadline_ms,
                    now_ms,
                )?;
                match waiter.await_decision(Duration::from_secs(timeout_seconds)).await {
                    ConsentWaitOutcome::Decided(ConsentDecision::Allow) => Ok(()),
                    ConsentWaitOutcome::Decided(ConsentDecision::Deny) => Err(
                        MethodError::ConsentDenied("the user denied the request".to_string()),
                    ),
                    ConsentWaitOutcome::TimedOut | ConsentWaitOutcome::Cancelled => {
                        match self.consent_config.default_on_timeout {
                            ConsentDecision::Allow => Ok(()),
                            ConsentDecision::Deny => Err(MethodError::ConsentTimeout(
                                "no consent decision arrived in time".to_string(),
                            )),
                        }
                    }
                }
            }
        }
    }

    /// Mints a server-generated call id.
    fn next_call_id(&self) -> CallId {
        let sequence = self.call_sequence.fetch_add(1, Ordering::Relaxed);
        CallId::new(format!("call-{sequence:08x}"))
    }
}

/// Builds the deny error from an evaluator outcome.
fn deny_error(outcome: PolicyOutcome) -> MethodError {
    MethodError::PermissionDenied {
        message: outcome.error_message.unwrap_or_else(|| "access denied".to_string()),
        code: outcome.error_code.unwrap_or(ErrorCode::InsufficientPermissions),
        details: outcome.validation_details,
    }
}

/// Deserializes method params, mapping failures to invalid-params.
fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, MethodError> {
    let params = params.unwrap_or(Value::Null);
    serde_json::from_value(params).map_err(|err| MethodError::InvalidParams(err.to_string()))
}

/// Current wall-clock time in unix milliseconds.
fn unix_millis_now() -> u64 {
    let millis =
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}
