// crates/mcpp-server/src/lib.rs
// ============================================================================
// Module: MCPP Server Library
// Description: JSON-RPC server and method dispatcher for MCPP.
// Purpose: Expose the MCPP wire surface over stdio, HTTP, and SSE.
// Dependencies: mcpp-core, mcpp-config, axum, tokio
// ============================================================================

//! ## Overview
//! The MCPP server exposes the protocol methods (`tools/list`, `tools/call`,
//! `mcpp/get_data`, `mcpp/find_reference`, `mcpp/resolve_placeholders`,
//! `mcpp/provide_consent`) as JSON-RPC 2.0 over stdio, HTTP POST, or SSE.
//! Every method routes through [`dispatch::MethodRouter`], which enforces
//! the policy and consent gates in front of the data cache. Security
//! posture: the wire surface is a trust boundary; all inputs are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod dispatch;
pub mod registry;
pub mod server;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditSink;
pub use audit::ConsentAuditEvent;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::RequestAuditEvent;
pub use audit::StderrAuditSink;
pub use dispatch::MethodError;
pub use dispatch::MethodRouter;
pub use dispatch::MethodRouterConfig;
pub use registry::RegistryError;
pub use registry::StaticTableTool;
pub use registry::ToolDefinition;
pub use registry::ToolExecError;
pub use registry::ToolExecutor;
pub use registry::ToolOutput;
pub use registry::ToolRegistry;
pub use server::McppServer;
pub use server::ServerError;
pub use telemetry::LATENCY_BUCKETS_MS;
pub use telemetry::MetricEvent;
pub use telemetry::Metrics;
pub use telemetry::NoopMetrics;
pub use telemetry::RpcMethod;
pub use telemetry::RpcOutcome;
