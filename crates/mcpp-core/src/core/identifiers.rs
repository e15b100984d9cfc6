// crates/mcpp-core/src/core/identifiers.rs
// ============================================================================
// Module: MCPP Identifiers
// Description: Canonical opaque identifiers for calls, consent, and hosts.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical string-based identifiers used throughout
//! MCPP. Identifiers are opaque and serialize as strings. Grammar validation
//! (the placeholder-safe character set for call identifiers) is offered as a
//! helper; enforcement happens at protocol boundaries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Identifier of a single tool invocation.
///
/// The call id is the sole handle for cached data and placeholders. It is
/// never reused after deletion within a process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Creates a new call identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when the id is non-empty and placeholder-safe.
    ///
    /// Placeholder-safe means every character matches `[A-Za-z0-9_-]`, the
    /// character class the placeholder grammar accepts for call ids.
    #[must_use]
    pub fn is_placeholder_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Identifier of a pending consent request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a new consent request identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Identifier of the requesting host application.
///
/// The core trusts the host id the requester supplies; it is used for
/// consent decision-cache key derivation, not authentication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    /// Creates a new host identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for HostId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for HostId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::CallId;

    #[test]
    fn call_id_placeholder_safety() {
        assert!(CallId::new("call-1_A").is_placeholder_safe());
        assert!(!CallId::new("").is_placeholder_safe());
        assert!(!CallId::new("call.1").is_placeholder_safe());
        assert!(!CallId::new("call 1").is_placeholder_safe());
    }
}
