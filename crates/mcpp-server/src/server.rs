// crates/mcpp-server/src/server.rs
// ============================================================================
// Module: MCPP Server
// Description: JSON-RPC 2.0 server for stdio, HTTP, and SSE transports.
// Purpose: Expose the MCPP methods behind request limits and audit logging.
// Dependencies: mcpp-core, mcpp-config, axum, tokio
// ============================================================================

//! ## Overview
//! The server parses JSON-RPC envelopes, enforces body-size, inflight, and
//! rate limits, and routes every call through [`crate::dispatch::MethodRouter`].
//! It supports stdio (framed with MCP `Content-Length` headers), HTTP POST,
//! and SSE transports on a single `/rpc` path. Security posture: inputs are
//! untrusted; expected failures return structured errors and internal faults
//! surface a generic message while details go to stderr.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::convert::Infallible;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Sse;
use axum::response::sse::Event;
use axum::routing::post;
use mcpp_config::McppConfig;
use mcpp_config::RateLimitConfig;
use mcpp_config::ServerTransport;
use mcpp_core::ConsentCoordinator;
use mcpp_core::DataCache;
use mcpp_core::PolicyEvaluator;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_stream::wrappers::ReceiverStream;

use crate::audit::AuditSink;
use crate::audit::FileAuditSink;
use crate::audit::NoopAuditSink;
use crate::audit::RequestAuditEvent;
use crate::audit::RequestAuditEventParams;
use crate::audit::StderrAuditSink;
use crate::dispatch::MethodError;
use crate::dispatch::MethodRouter;
use crate::dispatch::MethodRouterConfig;
use crate::registry::StaticTableTool;
use crate::registry::ToolRegistry;
use crate::telemetry::MetricEvent;
use crate::telemetry::Metrics;
use crate::telemetry::NoopMetrics;
use crate::telemetry::RpcMethod;
use crate::telemetry::RpcOutcome;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// MCPP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: MCPP Server
// ============================================================================

/// MCPP server instance.
pub struct McppServer {
    /// Server configuration.
    config: McppConfig,
    /// Method router for request dispatch.
    router: MethodRouter,
    /// Metrics sink for observability.
    metrics: Arc<dyn Metrics>,
    /// Audit sink for request logging.
    audit: Arc<dyn AuditSink>,
}

impl McppServer {
    /// Builds a server with the default registry (demo tools only).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when initialization fails.
    pub fn from_config(config: McppConfig) -> Result<Self, ServerError> {
        let mut registry = ToolRegistry::new();
        let (spec, tool) = StaticTableTool::demo_contacts();
        registry
            .register(spec, Arc::new(tool))
            .map_err(|err| ServerError::Init(err.to_string()))?;
        Self::from_config_with_registry(config, registry)
    }

    /// Builds a server around a caller-provided tool registry.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when initialization fails.
    pub fn from_config_with_registry(
        config: McppConfig,
        registry: ToolRegistry,
    ) -> Result<Self, ServerError> {
        Self::from_config_with_observability(config, registry, Arc::new(NoopMetrics), None)
    }

    /// Builds a server with custom metrics and audit sinks.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when initialization fails.
    pub fn from_config_with_observability(
        config: McppConfig,
        mut registry: ToolRegistry,
        metrics: Arc<dyn Metrics>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        registry
            .apply_policies(&config.tools)
            .map_err(|err| ServerError::Config(err.to_string()))?;
        let audit = match audit {
            Some(sink) => sink,
            None => build_audit_sink(&config)?,
        };
        let router = MethodRouter::new(MethodRouterConfig {
            cache: DataCache::new(),
            consent: ConsentCoordinator::new(config.consent.max_pending),
            evaluator: PolicyEvaluator::new(config.policy_settings()),
            registry: Arc::new(registry),
            consent_config: config.consent.clone(),
            audit: Arc::clone(&audit),
        });
        Ok(Self {
            config,
            router,
            metrics,
            audit,
        })
    }

    /// Returns the method router (for embedding and tests).
    #[must_use]
    pub const fn router(&self) -> &MethodRouter {
        &self.router
    }

    /// Serves requests using the configured transport.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when the server fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        let transport = self.config.server.transport;
        let state = Arc::new(build_server_state(
            self.router,
            &self.config,
            self.metrics,
            self.audit,
        ));
        match transport {
            ServerTransport::Stdio => serve_stdio(state).await,
            ServerTransport::Http => serve_http(&self.config, state, handle_http).await,
            ServerTransport::Sse => serve_http(&self.config, state, handle_sse).await,
        }
    }
}

/// Builds an audit sink from server configuration.
fn build_audit_sink(config: &McppConfig) -> Result<Arc<dyn AuditSink>, ServerError> {
    if !config.server.audit.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    if let Some(path) = &config.server.audit.path {
        let sink = FileAuditSink::new(std::path::Path::new(path))
            .map_err(|err| ServerError::Config(format!("audit log open failed: {err}")))?;
        return Ok(Arc::new(sink));
    }
    Ok(Arc::new(StderrAuditSink))
}

// ============================================================================
// SECTION: Server State
// ============================================================================

/// Shared server state for all transports.
struct ServerState {
    /// Method router for request dispatch.
    router: MethodRouter,
    /// Transport label for telemetry.
    transport: ServerTransport,
    /// Maximum allowed request body size.
    max_body_bytes: usize,
    /// Metrics sink for request telemetry.
    metrics: Arc<dyn Metrics>,
    /// Audit sink for request logging.
    audit: Arc<dyn AuditSink>,
    /// Rate limiter for incoming requests.
    rate_limiter: Option<RateLimiter>,
    /// Concurrency limiter for inflight requests.
    inflight: Semaphore,
}

fn build_server_state(
    router: MethodRouter,
    config: &McppConfig,
    metrics: Arc<dyn Metrics>,
    audit: Arc<dyn AuditSink>,
) -> ServerState {
    let rate_limiter =
        config.server.limits.rate_limit.as_ref().map(|limit| RateLimiter::new(limit.clone()));
    ServerState {
        router,
        transport: config.server.transport,
        max_body_bytes: config.server.max_body_bytes,
        metrics,
        audit,
        rate_limiter,
        inflight: Semaphore::new(config.server.limits.max_inflight),
    }
}

/// Per-request transport context.
#[derive(Debug, Clone)]
struct RequestContext {
    /// Peer IP address when available.
    peer_ip: Option<std::net::IpAddr>,
    /// Request identifier once parsed.
    request_id: Option<String>,
}

impl RequestContext {
    const fn stdio() -> Self {
        Self {
            peer_ip: None,
            request_id: None,
        }
    }

    const fn network(peer_ip: std::net::IpAddr) -> Self {
        Self {
            peer_ip: Some(peer_ip),
            request_id: None,
        }
    }
}

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Fixed-window rate limiter with in-memory buckets.
struct RateLimiter {
    /// Rate limit configuration.
    config: RateLimitConfig,
    /// Per-key request buckets.
    buckets: std::sync::Mutex<HashMap<String, RateLimitBucket>>,
}

/// Rolling state for a single rate limit key.
struct RateLimitBucket {
    /// Window start time for the current bucket.
    window_start: Instant,
    /// Requests observed in the current window.
    count: u32,
    /// Last request timestamp for eviction.
    last_seen: Instant,
}

/// Decision returned by the rate limiter.
enum RateLimitDecision {
    /// Allow the request.
    Allow,
    /// Limit the request with a retry delay.
    Limited {
        /// Milliseconds before retrying the request.
        retry_after_ms: u64,
    },
    /// Reject because the limiter is over capacity.
    OverCapacity,
}

impl RateLimiter {
    /// Creates a new rate limiter from configuration.
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Checks the limiter for the given key and updates the bucket.
    fn check(&self, key: &str) -> RateLimitDecision {
        let window = Duration::from_millis(self.config.window_ms);
        let ttl = Duration::from_millis(self.config.window_ms.saturating_mul(2));
        let now = Instant::now();
        let Ok(mut buckets) = self.buckets.lock() else {
            return RateLimitDecision::OverCapacity;
        };

        if buckets.len() > self.config.max_entries {
            buckets.retain(|_, bucket| now.duration_since(bucket.last_seen) <= ttl);
        }
        if buckets.len() > self.config.max_entries {
            return RateLimitDecision::OverCapacity;
        }

        let bucket = buckets.entry(key.to_string()).or_insert(RateLimitBucket {
            window_start: now,
            count: 0,
            last_seen: now,
        });
        if now.duration_since(bucket.window_start) >= window {
            bucket.window_start = now;
            bucket.count = 0;
        }
        bucket.last_seen = now;
        if bucket.count >= self.config.max_requests {
            let elapsed = now.duration_since(bucket.window_start);
            let retry_after_ms =
                u64::try_from(window.saturating_sub(elapsed).as_millis()).unwrap_or(u64::MAX);
            RateLimitDecision::Limited {
                retry_after_ms,
            }
        } else {
            bucket.count = bucket.count.saturating_add(1);
            RateLimitDecision::Allow
        }
    }
}

/// Derives the rate limit key for a request.
fn rate_limit_key(transport: ServerTransport, context: &RequestContext) -> String {
    if let Some(peer_ip) = context.peer_ip {
        return format!("ip:{peer_ip}");
    }
    match transport {
        ServerTransport::Stdio => "transport:stdio".to_string(),
        ServerTransport::Http => "transport:http".to_string(),
        ServerTransport::Sse => "transport:sse".to_string(),
    }
}

// ============================================================================
// SECTION: JSON-RPC Handling
// ============================================================================

/// Incoming JSON-RPC request payload.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    /// JSON-RPC protocol version.
    jsonrpc: String,
    /// Request identifier.
    id: Value,
    /// Method name.
    method: String,
    /// Optional parameters payload.
    params: Option<Value>,
}

/// JSON-RPC response envelope.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    /// JSON-RPC protocol version.
    jsonrpc: &'static str,
    /// Request identifier.
    id: Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    /// Error payload when the request fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error payload.
#[derive(Debug, Serialize)]
struct JsonRpcError {
    /// Error code.
    code: i64,
    /// Human-readable error message.
    message: String,
    /// Structured error metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<JsonRpcErrorData>,
}

/// JSON-RPC error metadata payload.
#[derive(Debug, Serialize)]
struct JsonRpcErrorData {
    /// Normalized error kind label.
    kind: &'static str,
    /// Whether the request may be retried safely.
    retryable: bool,
    /// Request identifier when provided.
    request_id: Option<String>,
    /// Suggested retry delay in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
    /// Error-specific structured payload (validation details, consent
    /// request, best similarity).
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Request size and timing metadata used for metrics.
struct RequestTiming {
    /// Request size in bytes.
    request_bytes: usize,
    /// Request start time.
    started_at: Instant,
}

/// Records metrics/audit and returns a JSON-RPC error response.
fn reject_request(
    state: &ServerState,
    context: &RequestContext,
    status: StatusCode,
    code: i64,
    message: &str,
    timing: &RequestTiming,
    retry_after_ms: Option<u64>,
) -> (StatusCode, JsonRpcResponse) {
    let response = jsonrpc_error_response(
        Value::Null,
        code,
        message.to_string(),
        context.request_id.clone(),
        retry_after_ms,
        None,
    );
    record_observability(state, context, RpcMethod::Invalid, &response, timing);
    (status, response)
}

/// Parses and dispatches a JSON-RPC request payload.
async fn parse_request(
    state: &ServerState,
    context: &RequestContext,
    bytes: &[u8],
) -> (StatusCode, JsonRpcResponse) {
    let timing = RequestTiming {
        request_bytes: bytes.len(),
        started_at: Instant::now(),
    };
    let Ok(permit) = state.inflight.try_acquire() else {
        return reject_request(
            state,
            context,
            StatusCode::SERVICE_UNAVAILABLE,
            -32072,
            "server overloaded",
            &timing,
            None,
        );
    };

    if let Some(rate_limiter) = &state.rate_limiter {
        match rate_limiter.check(&rate_limit_key(state.transport, context)) {
            RateLimitDecision::Allow => {}
            RateLimitDecision::Limited {
                retry_after_ms,
            } => {
                return reject_request(
                    state,
                    context,
                    StatusCode::TOO_MANY_REQUESTS,
                    -32071,
                    "rate limit exceeded",
                    &timing,
                    Some(retry_after_ms),
                );
            }
            RateLimitDecision::OverCapacity => {
                return reject_request(
                    state,
                    context,
                    StatusCode::SERVICE_UNAVAILABLE,
                    -32072,
                    "rate limiter overloaded",
                    &timing,
                    None,
                );
            }
        }
    }

    if bytes.len() > state.max_body_bytes {
        return reject_request(
            state,
            context,
            StatusCode::PAYLOAD_TOO_LARGE,
            -32070,
            "request body too large",
            &timing,
            None,
        );
    }

    let request: JsonRpcRequest = match serde_json::from_slice(bytes) {
        Ok(request) => request,
        Err(_) => {
            return reject_request(
                state,
                context,
                StatusCode::BAD_REQUEST,
                -32600,
                "invalid json-rpc request",
                &timing,
                None,
            );
        }
    };

    let mut context = context.clone();
    context.request_id = Some(request.id.to_string());
    let (status, response, method) = handle_request(state, &context, request).await;
    record_observability(state, &context, method, &response, &timing);
    drop(permit);
    (status, response)
}

/// Dispatches a parsed JSON-RPC request to the method router.
async fn handle_request(
    state: &ServerState,
    context: &RequestContext,
    request: JsonRpcRequest,
) -> (StatusCode, JsonRpcResponse, RpcMethod) {
    if request.jsonrpc != "2.0" {
        let request_id = Some(request.id.to_string());
        return (
            StatusCode::BAD_REQUEST,
            jsonrpc_error_response(
                request.id,
                -32600,
                "invalid json-rpc version".to_string(),
                request_id,
                None,
                None,
            ),
            RpcMethod::Invalid,
        );
    }
    let method = RpcMethod::classify(&request.method);
    match state.router.handle(&request.method, request.params).await {
        Ok(result) => (
            StatusCode::OK,
            JsonRpcResponse {
                jsonrpc: "2.0",
                id: request.id,
                result: Some(result),
                error: None,
            },
            method,
        ),
        Err(err) => {
            let (status, response) = jsonrpc_error(request.id, &err, context);
            (status, response, method)
        }
    }
}

/// Builds a JSON-RPC error response for a method failure.
fn jsonrpc_error(
    id: Value,
    err: &MethodError,
    context: &RequestContext,
) -> (StatusCode, JsonRpcResponse) {
    if let MethodError::Internal(detail) = err {
        // Details stay server-side; the client sees a generic message.
        let _ = writeln!(std::io::stderr(), "mcpp-server: internal error: {detail}");
    }
    let status = match err {
        MethodError::InvalidParams(_) | MethodError::MethodNotFound(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    let code = err.code().code();
    let response = jsonrpc_error_response(
        id,
        code,
        err.to_string(),
        context.request_id.clone(),
        None,
        err.error_data(),
    );
    (status, response)
}

/// Builds a JSON-RPC error response with structured metadata.
fn jsonrpc_error_response(
    id: Value,
    code: i64,
    message: String,
    request_id: Option<String>,
    retry_after_ms: Option<u64>,
    details: Option<Value>,
) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message,
            data: Some(JsonRpcErrorData {
                kind: error_kind_label(code),
                retryable: retryable_for_code(code),
                request_id,
                retry_after_ms,
                details,
            }),
        }),
    }
}

/// Maps JSON-RPC error codes to stable kind labels.
const fn error_kind_label(code: i64) -> &'static str {
    match code {
        -32600 => "invalid_request",
        -32601 => "method_not_found",
        -32602 => "invalid_params",
        -32603 => "internal",
        -32001 => "cache_miss",
        -32002 => "reference_not_found",
        -32003 => "resolution_failed",
        -32004 => "not_found",
        -32005 => "insufficient_permissions",
        -32006 => "invalid_data_usage",
        -32007 => "consent_required",
        -32008 => "consent_denied",
        -32009 => "consent_timeout",
        -32010 => "invalid_target",
        -32070 => "request_too_large",
        -32071 => "rate_limited",
        -32072 => "inflight_limit",
        _ => "unknown",
    }
}

/// Returns true when the error code is retryable.
const fn retryable_for_code(code: i64) -> bool {
    matches!(code, -32009 | -32071 | -32072)
}

/// Emits metrics and audit events for a request.
fn record_observability(
    state: &ServerState,
    context: &RequestContext,
    method: RpcMethod,
    response: &JsonRpcResponse,
    timing: &RequestTiming,
) {
    let outcome = if response.error.is_some() { RpcOutcome::Error } else { RpcOutcome::Ok };
    let error_code = response.error.as_ref().map(|error| error.code);
    let error_kind = error_code.map(error_kind_label);
    let response_bytes = serde_json::to_vec(response).map_or(0, |payload| payload.len());
    let event = MetricEvent {
        transport: state.transport,
        method,
        outcome,
        error_code,
        error_kind,
        request_bytes: timing.request_bytes,
        response_bytes,
    };
    state.metrics.record_request(event.clone());
    state.metrics.record_latency(event, timing.started_at.elapsed());
    state.audit.record_request(&RequestAuditEvent::new(RequestAuditEventParams {
        request_id: context.request_id.clone(),
        transport: state.transport,
        peer_ip: context.peer_ip.map(|ip| ip.to_string()),
        method,
        outcome,
        error_code,
        error_kind,
        request_bytes: timing.request_bytes,
        response_bytes,
    }));
}

// ============================================================================
// SECTION: Stdio Transport
// ============================================================================

/// Serves JSON-RPC requests over stdin/stdout.
async fn serve_stdio(state: Arc<ServerState>) -> Result<(), ServerError> {
    let mut reader = BufReader::new(std::io::stdin());
    let mut writer = std::io::stdout();
    let max_body_bytes = state.max_body_bytes;
    loop {
        let (returned_reader, framed) = tokio::task::spawn_blocking(move || {
            let framed = read_framed(&mut reader, max_body_bytes);
            (reader, framed)
        })
        .await
        .map_err(|_| ServerError::Transport("stdio reader task failed".to_string()))?;
        reader = returned_reader;
        let bytes = framed?;
        let context = RequestContext::stdio();
        let (_, response) = parse_request(&state, &context, &bytes).await;
        let payload = serde_json::to_vec(&response)
            .map_err(|_| ServerError::Transport("json-rpc serialization failed".to_string()))?;
        write_framed(&mut writer, &payload)?;
    }
}

/// Reads a framed stdio payload using MCP Content-Length headers.
fn read_framed(
    reader: &mut BufReader<impl Read>,
    max_body_bytes: usize,
) -> Result<Vec<u8>, ServerError> {
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .map_err(|_| ServerError::Transport("stdio read failed".to_string()))?;
        if bytes == 0 {
            return Err(ServerError::Transport("stdio closed".to_string()));
        }
        if line.trim().is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Content-Length:") {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ServerError::Transport("invalid content length".to_string()))?;
            content_length = Some(parsed);
        }
    }
    let len = content_length
        .ok_or_else(|| ServerError::Transport("missing content length".to_string()))?;
    if len > max_body_bytes {
        return Err(ServerError::Transport("payload too large".to_string()));
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|_| ServerError::Transport("stdio read failed".to_string()))?;
    Ok(buf)
}

/// Writes a framed stdio payload using MCP Content-Length headers.
fn write_framed(writer: &mut impl Write, payload: &[u8]) -> Result<(), ServerError> {
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    writer
        .write_all(header.as_bytes())
        .map_err(|_| ServerError::Transport("stdio write failed".to_string()))?;
    writer
        .write_all(payload)
        .map_err(|_| ServerError::Transport("stdio write failed".to_string()))?;
    writer.flush().map_err(|_| ServerError::Transport("stdio write failed".to_string()))
}

// ============================================================================
// SECTION: HTTP / SSE Transports
// ============================================================================

/// Serves JSON-RPC requests over HTTP or SSE on `/rpc`.
async fn serve_http<H, T>(
    config: &McppConfig,
    state: Arc<ServerState>,
    handler: H,
) -> Result<(), ServerError>
where
    H: axum::handler::Handler<T, Arc<ServerState>>,
    T: 'static,
{
    let bind = config
        .server
        .bind
        .as_ref()
        .ok_or_else(|| ServerError::Config("bind address required".to_string()))?;
    let addr: SocketAddr =
        bind.parse().map_err(|_| ServerError::Config("invalid bind address".to_string()))?;
    let app = Router::new().route("/rpc", post(handler)).with_state(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|_| ServerError::Transport("http bind failed".to_string()))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|_| ServerError::Transport("http server failed".to_string()))
}

/// Handles HTTP JSON-RPC requests.
async fn handle_http(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    bytes: Bytes,
) -> impl IntoResponse {
    let context = RequestContext::network(peer.ip());
    let (status, response) = parse_request(&state, &context, &bytes).await;
    (status, axum::Json(response))
}

/// Handles SSE JSON-RPC requests.
async fn handle_sse(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    bytes: Bytes,
) -> impl IntoResponse {
    let context = RequestContext::network(peer.ip());
    let (_, response) = parse_request(&state, &context, &bytes).await;
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(1);
    let payload = serde_json::to_string(&response).unwrap_or_else(|_| {
        "{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{\"code\":-32603,\"message\":\"serialization \
         failed\"}}"
            .to_string()
    });
    let _ = tx.send(Ok(Event::default().data(payload))).await;
    Sse::new(ReceiverStream::new(rx))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only envelope assertions."
    )]

    use std::io::BufReader;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use axum::http::StatusCode;
    use mcpp_config::McppConfig;
    use mcpp_config::RateLimitConfig;
    use serde_json::json;

    use super::RequestContext;
    use super::ServerState;
    use super::build_server_state;
    use super::parse_request;
    use super::read_framed;
    use crate::audit::NoopAuditSink;
    use crate::server::McppServer;
    use crate::telemetry::MetricEvent;
    use crate::telemetry::Metrics;
    use crate::telemetry::NoopMetrics;
    use crate::telemetry::RpcMethod;
    use crate::telemetry::RpcOutcome;

    #[derive(Default)]
    struct TestMetrics {
        events: Mutex<Vec<MetricEvent>>,
    }

    impl Metrics for TestMetrics {
        fn record_request(&self, event: MetricEvent) {
            self.events.lock().expect("events lock").push(event);
        }

        fn record_latency(&self, _event: MetricEvent, _latency: Duration) {}
    }

    fn test_state(config: McppConfig, metrics: Arc<dyn Metrics>) -> ServerState {
        let server = McppServer::from_config(config.clone()).expect("server");
        build_server_state(server.router().clone(), &config, metrics, Arc::new(NoopAuditSink))
    }

    #[tokio::test]
    async fn tools_list_round_trips() {
        let state = test_state(McppConfig::default(), Arc::new(NoopMetrics));
        let payload = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
        let bytes = serde_json::to_vec(&payload).expect("payload bytes");
        let (status, response) = parse_request(&state, &RequestContext::stdio(), &bytes).await;
        assert_eq!(status, StatusCode::OK);
        let result = response.result.expect("result");
        assert_eq!(result["tools"][0]["name"], json!("list_contacts"));
    }

    #[tokio::test]
    async fn invalid_version_is_rejected() {
        let state = test_state(McppConfig::default(), Arc::new(NoopMetrics));
        let payload = json!({ "jsonrpc": "1.0", "id": 1, "method": "tools/list" });
        let bytes = serde_json::to_vec(&payload).expect("payload bytes");
        let (status, response) = parse_request(&state, &RequestContext::stdio(), &bytes).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.error.expect("error").code, -32600);
    }

    #[tokio::test]
    async fn unknown_method_maps_to_method_not_found() {
        let state = test_state(McppConfig::default(), Arc::new(NoopMetrics));
        let payload = json!({ "jsonrpc": "2.0", "id": 1, "method": "mcpp/unknown" });
        let bytes = serde_json::to_vec(&payload).expect("payload bytes");
        let (status, response) = parse_request(&state, &RequestContext::stdio(), &bytes).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error = response.error.expect("error");
        assert_eq!(error.code, -32601);
        assert_eq!(error.data.expect("data").kind, "method_not_found");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let mut config = McppConfig::default();
        config.server.max_body_bytes = 8;
        let state = test_state(config, Arc::new(NoopMetrics));
        let payload = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
        let bytes = serde_json::to_vec(&payload).expect("payload bytes");
        let (status, response) = parse_request(&state, &RequestContext::stdio(), &bytes).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.error.expect("error").code, -32070);
    }

    #[tokio::test]
    async fn rate_limit_rejects_after_threshold() {
        let mut config = McppConfig::default();
        config.server.limits.rate_limit = Some(RateLimitConfig {
            max_requests: 1,
            window_ms: 60_000,
            max_entries: 8,
        });
        let state = test_state(config, Arc::new(NoopMetrics));
        let context = RequestContext::network(std::net::IpAddr::from([127, 0, 0, 1]));
        let payload = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
        let bytes = serde_json::to_vec(&payload).expect("payload bytes");

        let (first, _) = parse_request(&state, &context, &bytes).await;
        assert_eq!(first, StatusCode::OK);
        let (second, response) = parse_request(&state, &context, &bytes).await;
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
        let error = response.error.expect("rate limit error");
        assert_eq!(error.code, -32071);
        let data = error.data.expect("error data");
        assert_eq!(data.kind, "rate_limited");
        assert!(data.retryable);
    }

    #[tokio::test]
    async fn metrics_are_recorded_per_request() {
        let metrics = Arc::new(TestMetrics::default());
        let state = test_state(McppConfig::default(), metrics.clone());
        let payload = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
        let bytes = serde_json::to_vec(&payload).expect("payload bytes");
        let _ = parse_request(&state, &RequestContext::stdio(), &bytes).await;

        let events = metrics.events.lock().expect("events lock");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].method, RpcMethod::ToolsList);
        assert_eq!(events[0].outcome, RpcOutcome::Ok);
        assert!(events[0].response_bytes > 0);
    }

    #[tokio::test]
    async fn inflight_limit_rejects_when_exhausted() {
        let mut config = McppConfig::default();
        config.server.limits.max_inflight = 1;
        let state = test_state(config, Arc::new(NoopMetrics));
        let permit = state.inflight.try_acquire().expect("permit");
        let payload = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
        let bytes = serde_json::to_vec(&payload).expect("payload bytes");
        let (status, response) = parse_request(&state, &RequestContext::stdio(), &bytes).await;
        drop(permit);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let error = response.error.expect("inflight error");
        assert_eq!(error.code, -32072);
        assert!(error.data.expect("error data").retryable);
    }

    #[test]
    fn read_framed_rejects_payload_over_limit() {
        let payload = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
        let framed = format!(
            "Content-Length: {}\r\n\r\n{}",
            payload.len(),
            String::from_utf8_lossy(payload)
        );
        let mut reader = BufReader::new(Cursor::new(framed.into_bytes()));
        assert!(read_framed(&mut reader, payload.len() - 1).is_err());
    }

    #[test]
    fn read_framed_accepts_payload_at_limit() {
        let payload = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
        let framed = format!(
            "Content-Length: {}\r\n\r\n{}",
            payload.len(),
            String::from_utf8_lossy(payload)
        );
        let mut reader = BufReader::new(Cursor::new(framed.into_bytes()));
        let bytes = read_framed(&mut reader, payload.len()).expect("payload read");
        assert_eq!(bytes, payload);
    }
}
