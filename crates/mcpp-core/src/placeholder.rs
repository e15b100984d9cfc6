// crates/mcpp-core/src/placeholder.rs
// ============================================================================
// Module: MCPP Placeholder Engine
// Description: Grammar and recursive resolver for `{call_id.row.column}`.
// Purpose: Substitute placeholders in argument trees while preserving types.
// Dependencies: crate::{cache, core}, regex, serde_json
// ============================================================================

//! ## Overview
//! Two distinct regular expressions govern placeholder recognition: a sole
//! pattern anchored over the entire string, and an embedded pattern matched
//! inside longer strings. A sole placeholder resolves to the raw cell value
//! with its original type; embedded placeholders are stringified in place.
//! Unresolvable placeholders keep their original text, which makes the
//! resolver idempotent: a second pass re-encounters only what failed before.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::LazyLock;

use regex::Captures;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::cache::CacheError;
use crate::cache::DataCache;
use crate::core::CallId;

// ============================================================================
// SECTION: Grammar
// ============================================================================

/// Pattern matched against the entire string to preserve cell types.
const SOLE_PATTERN: &str = r"^\{([A-Za-z0-9_-]+)\.(\d+)\.([A-Za-z0-9_-]+)\}$";
/// Pattern matched inside longer strings; each match is stringified.
const EMBEDDED_PATTERN: &str = r"\{([A-Za-z0-9_-]+)\.(\d+)\.([A-Za-z0-9_-]+)\}";

#[allow(clippy::expect_used, reason = "Pattern is statically valid.")]
static SOLE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(SOLE_PATTERN).expect("sole placeholder pattern"));

#[allow(clippy::expect_used, reason = "Pattern is statically valid.")]
static EMBEDDED_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EMBEDDED_PATTERN).expect("embedded placeholder pattern"));

/// Reference to one cell of cached tabular data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placeholder {
    /// Call identifier of the cached table.
    pub call_id: CallId,
    /// Zero-based row index.
    pub row: usize,
    /// Column name from the table headers.
    pub column: String,
}

impl Placeholder {
    /// Creates a placeholder reference.
    #[must_use]
    pub fn new(call_id: impl Into<CallId>, row: usize, column: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            row,
            column: column.into(),
        }
    }

    /// Parses a string that is exactly one placeholder and nothing else.
    #[must_use]
    pub fn parse_sole(text: &str) -> Option<Self> {
        SOLE_PLACEHOLDER.captures(text).and_then(|caps| from_captures(&caps))
    }

    /// Returns the canonical `{call_id.row.column}` form.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{{{}.{}.{}}}", self.call_id, self.row, self.column)
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Builds a placeholder from regex captures; `None` on row overflow.
fn from_captures(caps: &Captures<'_>) -> Option<Placeholder> {
    let call_id = caps.get(1)?.as_str();
    let row = caps.get(2)?.as_str().parse::<usize>().ok()?;
    let column = caps.get(3)?.as_str();
    Some(Placeholder::new(call_id, row, column))
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Counters and leftovers from one resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStatus {
    /// Placeholder occurrences encountered during the walk.
    pub total: usize,
    /// Occurrences substituted successfully.
    pub resolved: usize,
    /// Occurrences left in place.
    pub failed: usize,
    /// Unresolved placeholder strings in walk order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

impl ResolutionStatus {
    /// Returns true when every encountered occurrence resolved.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Result of a tracked resolution pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The (partially) resolved value tree.
    pub value: Value,
    /// Occurrence counters and unresolved leftovers.
    pub status: ResolutionStatus,
}

/// Resolves every placeholder in the tree against the cache.
///
/// Strings are processed per the grammar, arrays element-wise, object values
/// recursively with keys untouched; all other scalars pass through.
///
/// # Errors
///
/// Returns [`CacheError`] only for cache faults; unresolvable placeholders
/// are recorded in the status, not raised.
pub fn resolve_with_tracking(
    value: &Value,
    cache: &DataCache,
    now_ms: u64,
) -> Result<Resolution, CacheError> {
    let mut status = ResolutionStatus::default();
    let value = resolve_value(value, cache, now_ms, &mut status)?;
    Ok(Resolution {
        value,
        status,
    })
}

/// Collects every placeholder occurrence in the tree without resolving.
#[must_use]
pub fn scan_placeholders(value: &Value) -> Vec<Placeholder> {
    let mut found = Vec::new();
    scan_value(value, &mut found);
    found
}

fn scan_value(value: &Value, found: &mut Vec<Placeholder>) {
    match value {
        Value::String(text) => {
            for caps in EMBEDDED_PLACEHOLDER.captures_iter(text) {
                if let Some(placeholder) = from_captures(&caps) {
                    found.push(placeholder);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                scan_value(item, found);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                scan_value(item, found);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn resolve_value(
    value: &Value,
    cache: &DataCache,
    now_ms: u64,
    status: &mut ResolutionStatus,
) -> Result<Value, CacheError> {
    match value {
        Value::String(text) => resolve_string(text, cache, now_ms, status),
        Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(resolve_value(item, cache, now_ms, status)?);
            }
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(item, cache, now_ms, status)?);
            }
            Ok(Value::Object(resolved))
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(value.clone()),
    }
}

fn resolve_string(
    text: &str,
    cache: &DataCache,
    now_ms: u64,
    status: &mut ResolutionStatus,
) -> Result<Value, CacheError> {
    if let Some(caps) = SOLE_PLACEHOLDER.captures(text) {
        status.total += 1;
        let cell = match from_captures(&caps) {
            Some(placeholder) => lookup_cell(cache, &placeholder, now_ms)?,
            None => None,
        };
        return Ok(match cell {
            Some(value) => {
                status.resolved += 1;
                value
            }
            None => {
                status.failed += 1;
                status.unresolved.push(text.to_string());
                Value::String(text.to_string())
            }
        });
    }

    if !EMBEDDED_PLACEHOLDER.is_match(text) {
        return Ok(Value::String(text.to_string()));
    }

    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;
    for caps in EMBEDDED_PLACEHOLDER.captures_iter(text) {
        let Some(matched) = caps.get(0) else {
            continue;
        };
        output.push_str(&text[cursor..matched.start()]);
        status.total += 1;
        let cell = match from_captures(&caps) {
            Some(placeholder) => lookup_cell(cache, &placeholder, now_ms)?,
            None => None,
        };
        match cell {
            Some(value) => {
                status.resolved += 1;
                output.push_str(&stringify_cell(&value));
            }
            None => {
                status.failed += 1;
                status.unresolved.push(matched.as_str().to_string());
                output.push_str(matched.as_str());
            }
        }
        cursor = matched.end();
    }
    output.push_str(&text[cursor..]);
    Ok(Value::String(output))
}

/// Looks up the referenced cell; `None` covers every failure mode.
///
/// A lookup fails when the call id is absent, the entry is not tabular, the
/// column is unknown, or the row index is out of range.
fn lookup_cell(
    cache: &DataCache,
    placeholder: &Placeholder,
    now_ms: u64,
) -> Result<Option<Value>, CacheError> {
    let Some(entry) = cache.get(&placeholder.call_id, now_ms)? else {
        return Ok(None);
    };
    let Some(table) = entry.payload.as_table() else {
        return Ok(None);
    };
    let Some(column) = table.column_index(&placeholder.column) else {
        return Ok(None);
    };
    Ok(table.cell(placeholder.row, column).cloned())
}

/// Natural text rendering of a cell value for embedded substitution.
fn stringify_cell(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only resolution assertions.")]

    use serde_json::json;

    use super::Placeholder;
    use super::resolve_with_tracking;
    use super::scan_placeholders;
    use crate::cache::DataCache;
    use crate::core::CachedEntry;
    use crate::core::CallId;
    use crate::core::EntryMetadata;
    use crate::core::EntryPayload;
    use crate::core::TablePayload;

    fn cache_with_table() -> DataCache {
        let cache = DataCache::new();
        let entry = CachedEntry {
            payload: EntryPayload::Table(TablePayload::new(
                vec!["ID".to_string(), "Age".to_string()],
                vec![vec![json!("1"), json!(42)], vec![json!("2"), json!(37)]],
            )),
            metadata: EntryMetadata {
                tool_name: "list_users".to_string(),
                created_at_ms: 0,
                is_sensitive: true,
                expires_at_ms: None,
            },
        };
        cache.put(&CallId::new("t1"), entry).unwrap();
        cache
    }

    #[test]
    fn parse_sole_accepts_canonical_form() {
        let placeholder = Placeholder::parse_sole("{t1.0.Age}").unwrap();
        assert_eq!(placeholder, Placeholder::new("t1", 0, "Age"));
        assert_eq!(placeholder.canonical(), "{t1.0.Age}");
    }

    #[test]
    fn parse_sole_rejects_malformed_strings() {
        assert!(Placeholder::parse_sole("{t1.0.Age} ").is_none());
        assert!(Placeholder::parse_sole("x{t1.0.Age}").is_none());
        assert!(Placeholder::parse_sole("{t1..Age}").is_none());
        assert!(Placeholder::parse_sole("{t1.-1.Age}").is_none());
        assert!(Placeholder::parse_sole("{t 1.0.Age}").is_none());
        assert!(Placeholder::parse_sole("{t1.0}").is_none());
    }

    #[test]
    fn sole_placeholder_preserves_cell_type() {
        let cache = cache_with_table();
        let resolution = resolve_with_tracking(&json!("{t1.0.Age}"), &cache, 0).unwrap();
        assert_eq!(resolution.value, json!(42));
        assert_eq!(resolution.status.total, 1);
        assert_eq!(resolution.status.resolved, 1);
        assert_eq!(resolution.status.failed, 0);
    }

    #[test]
    fn embedded_placeholders_stringify() {
        let cache = cache_with_table();
        let resolution =
            resolve_with_tracking(&json!("User {t1.0.ID}/{t1.0.Age}"), &cache, 0).unwrap();
        assert_eq!(resolution.value, json!("User 1/42"));
        assert_eq!(resolution.status.total, 2);
        assert_eq!(resolution.status.resolved, 2);
    }

    #[test]
    fn walk_covers_arrays_and_object_values() {
        let cache = cache_with_table();
        let input = json!({
            "ids": ["{t1.0.ID}", "{t1.1.ID}"],
            "nested": { "age": "{t1.0.Age}" },
            "count": 7,
            "flag": true,
        });
        let resolution = resolve_with_tracking(&input, &cache, 0).unwrap();
        assert_eq!(
            resolution.value,
            json!({
                "ids": ["1", "2"],
                "nested": { "age": 42 },
                "count": 7,
                "flag": true,
            })
        );
        assert_eq!(resolution.status.total, 3);
        assert_eq!(resolution.status.resolved, 3);
    }

    #[test]
    fn object_keys_stay_untouched() {
        let cache = cache_with_table();
        let input = json!({ "{t1.0.ID}": "{t1.0.ID}" });
        let resolution = resolve_with_tracking(&input, &cache, 0).unwrap();
        assert_eq!(resolution.value, json!({ "{t1.0.ID}": "1" }));
        assert_eq!(resolution.status.total, 1);
    }

    #[test]
    fn failures_keep_text_and_are_tracked() {
        let cache = cache_with_table();
        let input = json!([
            "{missing.0.ID}",
            "{t1.0.Nope}",
            "{t1.9.ID}",
            "row {t1.9.ID} end",
        ]);
        let resolution = resolve_with_tracking(&input, &cache, 0).unwrap();
        assert_eq!(
            resolution.value,
            json!(["{missing.0.ID}", "{t1.0.Nope}", "{t1.9.ID}", "row {t1.9.ID} end"])
        );
        assert_eq!(resolution.status.total, 4);
        assert_eq!(resolution.status.resolved, 0);
        assert_eq!(resolution.status.failed, 4);
        assert_eq!(resolution.status.unresolved.len(), 4);
    }

    #[test]
    fn non_table_entries_never_resolve() {
        let cache = DataCache::new();
        let entry = CachedEntry {
            payload: EntryPayload::Text("secret".to_string()),
            metadata: EntryMetadata {
                tool_name: "read_note".to_string(),
                created_at_ms: 0,
                is_sensitive: true,
                expires_at_ms: None,
            },
        };
        cache.put(&CallId::new("n1"), entry).unwrap();
        let resolution = resolve_with_tracking(&json!("{n1.0.body}"), &cache, 0).unwrap();
        assert_eq!(resolution.value, json!("{n1.0.body}"));
        assert_eq!(resolution.status.failed, 1);
    }

    #[test]
    fn resolution_is_idempotent() {
        let cache = cache_with_table();
        let input = json!({ "ok": "{t1.0.ID}", "bad": "{t1.0.Nope}" });
        let first = resolve_with_tracking(&input, &cache, 0).unwrap();
        let second = resolve_with_tracking(&first.value, &cache, 0).unwrap();
        assert_eq!(first.value, second.value);
        // Only the previously failed placeholder remains visible.
        assert_eq!(second.status.total, 1);
        assert_eq!(second.status.resolved, 0);
        assert_eq!(second.status.failed, 1);
    }

    #[test]
    fn fully_resolved_tree_counts_zero_on_second_pass() {
        let cache = cache_with_table();
        let first = resolve_with_tracking(&json!("{t1.0.ID} ok"), &cache, 0).unwrap();
        let second = resolve_with_tracking(&first.value, &cache, 0).unwrap();
        assert_eq!(second.status.total, 0);
        assert_eq!(second.status.resolved, 0);
        assert_eq!(second.status.failed, 0);
    }

    #[test]
    fn occurrences_count_duplicates() {
        let cache = cache_with_table();
        let input = json!(["{t1.0.ID}", "{t1.0.ID}"]);
        let resolution = resolve_with_tracking(&input, &cache, 0).unwrap();
        assert_eq!(resolution.status.total, 2);
        assert_eq!(resolution.status.resolved, 2);
    }

    #[test]
    fn scan_collects_every_occurrence() {
        let input = json!({
            "a": "{t1.0.ID} and {t2.3.Name}",
            "b": ["{t1.0.ID}"],
        });
        let found = scan_placeholders(&input);
        assert_eq!(found.len(), 3);
        assert!(found.contains(&Placeholder::new("t2", 3, "Name")));
    }
}
