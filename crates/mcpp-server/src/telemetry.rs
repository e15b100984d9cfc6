// crates/mcpp-server/src/telemetry.rs
// ============================================================================
// Module: MCPP Telemetry
// Description: Observability hooks for MCPP transport and method routing.
// Purpose: Provide metric events and latency buckets without hard deps.
// Dependencies: mcpp-config, serde
// ============================================================================

//! ## Overview
//! This module exposes a thin metrics interface for MCPP request counters
//! and latency histograms. It is intentionally dependency-light so
//! deployments can plug in Prometheus or OpenTelemetry without redesign.
//! Telemetry labels never carry cached payloads or destinations.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use mcpp_config::ServerTransport;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default latency buckets in milliseconds for request histograms.
pub const LATENCY_BUCKETS_MS: &[u64] =
    &[1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000];

// ============================================================================
// SECTION: Metric Labels
// ============================================================================

/// JSON-RPC method classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RpcMethod {
    /// JSON-RPC tools/list.
    ToolsList,
    /// JSON-RPC tools/call.
    ToolsCall,
    /// JSON-RPC mcpp/get_data.
    GetData,
    /// JSON-RPC mcpp/find_reference.
    FindReference,
    /// JSON-RPC mcpp/resolve_placeholders.
    ResolvePlaceholders,
    /// JSON-RPC mcpp/provide_consent.
    ProvideConsent,
    /// Invalid or malformed JSON-RPC request.
    Invalid,
    /// Unsupported JSON-RPC method.
    Other,
}

impl RpcMethod {
    /// Classifies a wire method name.
    #[must_use]
    pub fn classify(method: &str) -> Self {
        match method {
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            "mcpp/get_data" => Self::GetData,
            "mcpp/find_reference" => Self::FindReference,
            "mcpp/resolve_placeholders" => Self::ResolvePlaceholders,
            "mcpp/provide_consent" => Self::ProvideConsent,
            _ => Self::Other,
        }
    }

    /// Returns a stable label for the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::GetData => "mcpp/get_data",
            Self::FindReference => "mcpp/find_reference",
            Self::ResolvePlaceholders => "mcpp/resolve_placeholders",
            Self::ProvideConsent => "mcpp/provide_consent",
            Self::Invalid => "invalid",
            Self::Other => "other",
        }
    }
}

/// Request outcome classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RpcOutcome {
    /// Successful request.
    Ok,
    /// Failed request.
    Error,
}

impl RpcOutcome {
    /// Returns a stable label for the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Request metric event payload.
///
/// # Invariants
/// - Optional fields are `None` when the metadata is unavailable.
#[derive(Debug, Clone)]
pub struct MetricEvent {
    /// Transport used for the request.
    pub transport: ServerTransport,
    /// JSON-RPC method classification.
    pub method: RpcMethod,
    /// Request outcome.
    pub outcome: RpcOutcome,
    /// JSON-RPC error code when present.
    pub error_code: Option<i64>,
    /// Normalized error kind label.
    pub error_kind: Option<&'static str>,
    /// Request body size in bytes.
    pub request_bytes: usize,
    /// Response body size in bytes.
    pub response_bytes: usize,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Metrics sink for MCPP requests.
pub trait Metrics: Send + Sync {
    /// Records a request counter event.
    fn record_request(&self, event: MetricEvent);

    /// Records request latency.
    fn record_latency(&self, event: MetricEvent, latency: Duration);
}

/// No-op metrics sink.
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn record_request(&self, _event: MetricEvent) {}

    fn record_latency(&self, _event: MetricEvent, _latency: Duration) {}
}
