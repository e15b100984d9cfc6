// crates/mcpp-server/src/audit.rs
// ============================================================================
// Module: MCPP Audit Logging
// Description: Structured audit events for request handling and consent.
// Purpose: Emit redacted audit logs without hard dependencies.
// Dependencies: mcpp-config, serde
// ============================================================================

//! ## Overview
//! This module defines audit event payloads and sinks for MCPP request and
//! consent logging. Events are JSON lines and never include cached payloads
//! or placeholder-resolved data; deployments can route them to their
//! preferred logging pipeline without redesign.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use mcpp_config::ServerTransport;
use serde::Serialize;

use crate::telemetry::RpcMethod;
use crate::telemetry::RpcOutcome;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Request audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct RequestAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Request identifier when provided.
    pub request_id: Option<String>,
    /// Transport used for the request.
    pub transport: ServerTransport,
    /// Peer IP address when available.
    pub peer_ip: Option<String>,
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

/// Constructor parameters for [`RequestAuditEvent`].
#[derive(Debug, Clone)]
pub struct RequestAuditEventParams {
    /// Request identifier when provided.
    pub request_id: Option<String>,
    /// Transport used for the request.
    pub transport: ServerTransport,
    /// Peer IP address when available.
    pub peer_ip: Option<String>,
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

impl RequestAuditEvent {
    /// Creates a new request audit event with a consistent timestamp.
    #[must_use]
    pub fn new(params: RequestAuditEventParams) -> Self {
        Self {
            event: "mcpp_request",
            timestamp_ms: now_millis(),
            request_id: params.request_id,
            transport: params.transport,
            peer_ip: params.peer_ip,
            method: params.method,
            outcome: params.outcome,
            error_code: params.error_code,
            error_kind: params.error_kind,
            request_bytes: params.request_bytes,
            response_bytes: params.response_bytes,
        }
    }
}

/// Consent decision audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct ConsentAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Consent request identifier.
    pub request_id: String,
    /// The user's decision.
    pub decision: &'static str,
    /// Whether the decision was remembered.
    pub remembered: bool,
    /// Canonical destination string.
    pub destination: String,
    /// Usage level the decision covers.
    pub data_usage: &'static str,
    /// Governing tool when one was named.
    pub tool_name: Option<String>,
}

impl ConsentAuditEvent {
    /// Creates a new consent audit event with a consistent timestamp.
    #[must_use]
    pub fn new(
        request_id: String,
        decision: &'static str,
        remembered: bool,
        destination: String,
        data_usage: &'static str,
        tool_name: Option<String>,
    ) -> Self {
        Self {
            event: "mcpp_consent",
            timestamp_ms: now_millis(),
            request_id,
            decision,
            remembered,
            destination,
            data_usage,
            tool_name,
        }
    }
}

fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for MCPP events.
pub trait AuditSink: Send + Sync {
    /// Records a request audit event.
    fn record_request(&self, event: &RequestAuditEvent);

    /// Records a consent decision audit event.
    fn record_consent(&self, event: &ConsentAuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record_request(&self, event: &RequestAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }

    fn record_consent(&self, event: &ConsentAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn write_line(&self, payload: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

impl AuditSink for FileAuditSink {
    fn record_request(&self, event: &RequestAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            self.write_line(&payload);
        }
    }

    fn record_consent(&self, event: &ConsentAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            self.write_line(&payload);
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record_request(&self, _event: &RequestAuditEvent) {}

    fn record_consent(&self, _event: &ConsentAuditEvent) {}
}
