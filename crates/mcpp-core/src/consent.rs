// crates/mcpp-core/src/consent.rs
// ============================================================================
// Module: MCPP Consent Coordinator
// Description: Pending consent requests, one-shot wakers, and decision cache.
// Purpose: Park operations awaiting a user decision and memoize decisions.
// Dependencies: crate::core, tokio
// ============================================================================

//! ## Overview
//! The coordinator owns pending consent requests until they are resolved or
//! expire. An operation that must wait registers a one-shot waker and parks
//! on it; `resolve` wakes the parked operation at most once. Dropping a
//! waiter removes its pending entry so a late decision is silently dropped.
//! Remembered decisions land in the decision cache keyed by
//! `(host_id, destination, data_usage, tool_name?)` with absolute expiry.
//! Time is supplied explicitly by callers so behavior stays deterministic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::ConsentDecision;
use crate::core::DataUsage;
use crate::core::HostId;
use crate::core::RequestId;
use crate::core::TargetType;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Milliseconds per minute, for decision-cache expiry math.
const MILLIS_PER_MINUTE: u64 = 60_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Consent coordinator faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsentError {
    /// The pending table or decision cache lock was poisoned.
    #[error("consent state lock poisoned")]
    Poisoned,
    /// The pending table is full.
    #[error("too many pending consent requests")]
    PendingLimit,
    /// A pending request with the same id already exists.
    #[error("duplicate consent request id '{0}'")]
    DuplicateRequest(String),
}

// ============================================================================
// SECTION: Consent Requests
// ============================================================================

/// Summary of the data a consent request covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSummary {
    /// Placeholder occurrences in the gated payload.
    pub placeholder_count: usize,
    /// Distinct call ids referenced by the payload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub call_ids: Vec<String>,
}

/// Consent request surfaced to the host for a user decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRequest {
    /// Identifier the host echoes back through `provide_consent`.
    pub request_id: RequestId,
    /// Tool whose policy demanded the consent, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Requested usage level.
    pub data_usage: DataUsage,
    /// Target kind receiving the data.
    pub target_type: TargetType,
    /// Canonical destination string.
    pub destination: String,
    /// Message rendered by the host UI.
    pub message: String,
    /// Reason labels that demanded the consent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    /// Summary of the gated data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_summary: Option<DataSummary>,
    /// Creation time in unix milliseconds.
    pub created_at_ms: u64,
    /// Seconds the host has to answer.
    pub timeout_seconds: u64,
}

/// Original request context stored with a pending consent.
///
/// Captured at registration so a `remember=true` resolution can form the
/// decision-cache key without re-deriving the original call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingContext {
    /// Requesting host.
    pub host_id: HostId,
    /// Canonical destination string.
    pub destination: String,
    /// Requested usage level.
    pub data_usage: DataUsage,
    /// Governing tool, when one was named.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl PendingContext {
    /// Returns the decision-cache key for this context.
    #[must_use]
    pub fn cache_key(&self) -> DecisionKey {
        DecisionKey {
            host_id: self.host_id.as_str().to_string(),
            destination: self.destination.clone(),
            data_usage: self.data_usage,
            tool_name: self.tool_name.clone(),
        }
    }
}

// ============================================================================
// SECTION: Decision Cache
// ============================================================================

/// Key of a remembered consent decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionKey {
    /// Requesting host.
    pub host_id: String,
    /// Canonical destination string.
    pub destination: String,
    /// Usage level the decision covers.
    pub data_usage: DataUsage,
    /// Tool scope; `None` covers every tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

/// A remembered decision with absolute expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RememberedDecision {
    /// The remembered decision.
    decision: ConsentDecision,
    /// Absolute expiry in unix milliseconds.
    expires_at_ms: u64,
}

/// TTL cache of prior consent decisions.
#[derive(Debug, Default, Clone)]
pub struct DecisionCache {
    /// Remembered decisions guarded by a mutex.
    entries: Arc<Mutex<HashMap<DecisionKey, RememberedDecision>>>,
}

impl DecisionCache {
    /// Creates an empty decision cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a decision valid for `duration_minutes` from `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Poisoned`] when the lock is poisoned.
    pub fn record(
        &self,
        key: DecisionKey,
        decision: ConsentDecision,
        duration_minutes: u64,
        now_ms: u64,
    ) -> Result<(), ConsentError> {
        let expires_at_ms =
            now_ms.saturating_add(duration_minutes.saturating_mul(MILLIS_PER_MINUTE));
        let mut guard = self.entries.lock().map_err(|_| ConsentError::Poisoned)?;
        guard.insert(key, RememberedDecision {
            decision,
            expires_at_ms,
        });
        Ok(())
    }

    /// Returns the remembered decision, purging it first when expired.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Poisoned`] when the lock is poisoned.
    pub fn lookup(
        &self,
        key: &DecisionKey,
        now_ms: u64,
    ) -> Result<Option<ConsentDecision>, ConsentError> {
        let mut guard = self.entries.lock().map_err(|_| ConsentError::Poisoned)?;
        match guard.get(key) {
            Some(entry) if entry.expires_at_ms <= now_ms => {
                guard.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.decision)),
            None => Ok(None),
        }
    }

    /// Removes every remembered decision.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Poisoned`] when the lock is poisoned.
    pub fn clear(&self) -> Result<(), ConsentError> {
        let mut guard = self.entries.lock().map_err(|_| ConsentError::Poisoned)?;
        guard.clear();
        Ok(())
    }
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// A pending consent request awaiting a decision.
#[derive(Debug)]
struct PendingConsent {
    /// Original request context for decision-cache key formation.
    context: PendingContext,
    /// Absolute deadline in unix milliseconds.
    deadline_ms: u64,
    /// One-shot waker for a parked operation, when one is waiting.
    waker: Option<oneshot::Sender<ConsentDecision>>,
}

/// A resolved consent with its original context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConsent {
    /// Original request context.
    pub context: PendingContext,
    /// The user's decision.
    pub decision: ConsentDecision,
}

/// Outcome of a parked consent wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentWaitOutcome {
    /// A decision arrived in time.
    Decided(ConsentDecision),
    /// The deadline elapsed without a decision.
    TimedOut,
    /// The pending entry was removed without a decision.
    Cancelled,
}

/// Coordinator for pending consent requests and remembered decisions.
///
/// Clones share the same pending table and decision cache.
#[derive(Debug, Clone)]
pub struct ConsentCoordinator {
    /// Pending requests keyed by request id.
    pending: Arc<Mutex<HashMap<String, PendingConsent>>>,
    /// Remembered decisions.
    decisions: DecisionCache,
    /// Monotonic sequence for request-id generation.
    sequence: Arc<AtomicU64>,
    /// Maximum concurrently pending requests.
    max_pending: usize,
}

impl ConsentCoordinator {
    /// Creates a coordinator bounded to `max_pending` concurrent requests.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            decisions: DecisionCache::new(),
            sequence: Arc::new(AtomicU64::new(0)),
            max_pending,
        }
    }

    /// Returns the shared decision cache.
    #[must_use]
    pub const fn decisions(&self) -> &DecisionCache {
        &self.decisions
    }

    /// Mints a process-unique consent request id.
    #[must_use]
    pub fn next_request_id(&self, now_ms: u64) -> RequestId {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        RequestId::new(format!("consent-{now_ms:x}-{sequence:04x}"))
    }

    /// Registers a pending request without a parked waiter.
    ///
    /// Used by the notify flow: the caller returns the consent request to the
    /// host and the host answers through `resolve` before `deadline_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError`] on lock poisoning, a full pending table, or a
    /// duplicate request id.
    pub fn register(
        &self,
        request_id: &RequestId,
        context: PendingContext,
        deadline_ms: u64,
        now_ms: u64,
    ) -> Result<(), ConsentError> {
        self.insert_pending(request_id, context, deadline_ms, now_ms, None)?;
        Ok(())
    }

    /// Registers a pending request and returns a parked waiter.
    ///
    /// Used by the block flow: the caller awaits the waiter until a decision
    /// or timeout. Dropping the waiter removes the pending entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError`] on lock poisoning, a full pending table, or a
    /// duplicate request id.
    pub fn register_waiter(
        &self,
        request_id: &RequestId,
        context: PendingContext,
        deadline_ms: u64,
        now_ms: u64,
    ) -> Result<ConsentWaiter, ConsentError> {
        let (sender, receiver) = oneshot::channel();
        self.insert_pending(request_id, context, deadline_ms, now_ms, Some(sender))?;
        Ok(ConsentWaiter {
            pending: Arc::clone(&self.pending),
            request_id: request_id.clone(),
            receiver,
        })
    }

    /// Resolves a pending request with the user's decision.
    ///
    /// Returns `None` when no live pending request matches: already
    /// resolved, expired, or unknown. Two concurrent resolves on the same id
    /// succeed exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Poisoned`] when the lock is poisoned.
    pub fn resolve(
        &self,
        request_id: &RequestId,
        decision: ConsentDecision,
        now_ms: u64,
    ) -> Result<Option<ResolvedConsent>, ConsentError> {
        let entry = {
            let mut guard = self.pending.lock().map_err(|_| ConsentError::Poisoned)?;
            guard.remove(request_id.as_str())
        };
        let Some(entry) = entry else {
            return Ok(None);
        };
        if entry.deadline_ms <= now_ms {
            return Ok(None);
        }
        if let Some(waker) = entry.waker {
            // The waiter may already be gone; a dropped receiver is fine.
            let _ = waker.send(decision);
        }
        Ok(Some(ResolvedConsent {
            context: entry.context,
            decision,
        }))
    }

    /// Returns the number of live pending requests.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Poisoned`] when the lock is poisoned.
    pub fn pending_len(&self) -> Result<usize, ConsentError> {
        let guard = self.pending.lock().map_err(|_| ConsentError::Poisoned)?;
        Ok(guard.len())
    }

    /// Returns the ids of live pending requests (unordered).
    ///
    /// Hosts use this to enumerate requests awaiting an out-of-band
    /// decision.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Poisoned`] when the lock is poisoned.
    pub fn pending_ids(&self) -> Result<Vec<RequestId>, ConsentError> {
        let guard = self.pending.lock().map_err(|_| ConsentError::Poisoned)?;
        Ok(guard.keys().map(|id| RequestId::new(id.clone())).collect())
    }

    /// Inserts a pending entry, purging expired entries when at capacity.
    fn insert_pending(
        &self,
        request_id: &RequestId,
        context: PendingContext,
        deadline_ms: u64,
        now_ms: u64,
        waker: Option<oneshot::Sender<ConsentDecision>>,
    ) -> Result<(), ConsentError> {
        let mut guard = self.pending.lock().map_err(|_| ConsentError::Poisoned)?;
        if guard.len() >= self.max_pending {
            guard.retain(|_, entry| entry.deadline_ms > now_ms);
        }
        if guard.len() >= self.max_pending {
            return Err(ConsentError::PendingLimit);
        }
        if guard.contains_key(request_id.as_str()) {
            return Err(ConsentError::DuplicateRequest(request_id.as_str().to_string()));
        }
        guard.insert(request_id.as_str().to_string(), PendingConsent {
            context,
            deadline_ms,
            waker,
        });
        Ok(())
    }
}

// ============================================================================
// SECTION: Waiter
// ============================================================================

/// A parked operation awaiting a consent decision.
///
/// Dropping the waiter removes its pending entry, so a decision arriving
/// after cancellation is silently dropped.
#[derive(Debug)]
pub struct ConsentWaiter {
    /// Shared pending table for drop-time cleanup.
    pending: Arc<Mutex<HashMap<String, PendingConsent>>>,
    /// Request id of the parked operation.
    request_id: RequestId,
    /// One-shot decision receiver.
    receiver: oneshot::Receiver<ConsentDecision>,
}

impl ConsentWaiter {
    /// Parks until a decision arrives or `timeout` elapses.
    pub async fn await_decision(mut self, timeout: Duration) -> ConsentWaitOutcome {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(decision)) => ConsentWaitOutcome::Decided(decision),
            Ok(Err(_)) => ConsentWaitOutcome::Cancelled,
            Err(_) => ConsentWaitOutcome::TimedOut,
        }
    }
}

impl Drop for ConsentWaiter {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.pending.lock() {
            guard.remove(self.request_id.as_str());
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
