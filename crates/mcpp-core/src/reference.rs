// crates/mcpp-core/src/reference.rs
// ============================================================================
// Module: MCPP Reference Finder
// Description: Fuzzy search over cached tables to mint placeholders.
// Purpose: Turn a human-supplied keyword into a `{call_id.row.column}` ref.
// Dependencies: crate::{cache, core, placeholder}
// ============================================================================

//! ## Overview
//! The reference finder scans a cached table in row-major order (then header
//! order) and scores every candidate cell with Jaro-Winkler similarity
//! between the lowercased keyword and the lowercased cell text. The best
//! match strictly above the 0.7 threshold wins; ties keep the first cell
//! encountered in scan order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::cache::CacheError;
use crate::cache::DataCache;
use crate::core::CallId;
use crate::placeholder::Placeholder;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Minimum similarity a match must strictly exceed.
pub const SIMILARITY_THRESHOLD: f64 = 0.7;
/// Winkler prefix bonus scale.
const WINKLER_PREFIX_SCALE: f64 = 0.1;
/// Maximum common-prefix length counted by the Winkler bonus.
const WINKLER_MAX_PREFIX: usize = 4;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Reference finder failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReferenceError {
    /// No cached entry exists for the call id.
    #[error("no cached entry for call id '{0}'")]
    NotFound(String),
    /// The cached entry is not tabular.
    #[error("cached entry for '{0}' is not tabular")]
    NotTabular(String),
    /// The cached table has no columns.
    #[error("cached table for '{0}' has no columns")]
    NoColumns(String),
    /// The requested column does not exist in the headers.
    #[error("column '{0}' does not exist")]
    UnknownColumn(String),
    /// No cell scored above the similarity threshold.
    #[error("no cell matched above threshold (best similarity {best_similarity:.3})")]
    BelowThreshold {
        /// Best similarity observed across the scan.
        best_similarity: f64,
    },
    /// Underlying cache fault.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

// ============================================================================
// SECTION: Reference Matches
// ============================================================================

/// A successful fuzzy match over a cached table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceMatch {
    /// Canonical `{call_id.row.column}` placeholder.
    pub placeholder: String,
    /// Zero-based row of the matched cell.
    pub row: usize,
    /// Column name of the matched cell.
    pub column: String,
    /// Similarity of the winning cell (strictly above threshold).
    pub similarity: f64,
    /// Rows visited during the scan.
    pub rows_scanned: usize,
    /// Cells scored during the scan.
    pub cells_scanned: usize,
}

/// Finds the best-matching cell for a keyword and mints a placeholder.
///
/// # Errors
///
/// Returns [`ReferenceError`] when the entry is absent or non-tabular, the
/// requested column is unknown, or no cell scores above the threshold.
pub fn find_reference(
    cache: &DataCache,
    call_id: &CallId,
    keyword: &str,
    column: Option<&str>,
    now_ms: u64,
) -> Result<ReferenceMatch, ReferenceError> {
    let entry = cache
        .get(call_id, now_ms)?
        .ok_or_else(|| ReferenceError::NotFound(call_id.as_str().to_string()))?;
    let table = entry
        .payload
        .as_table()
        .ok_or_else(|| ReferenceError::NotTabular(call_id.as_str().to_string()))?;
    if table.headers.is_empty() {
        return Err(ReferenceError::NoColumns(call_id.as_str().to_string()));
    }
    let column_filter = match column {
        Some(name) => Some(
            table
                .column_index(name)
                .ok_or_else(|| ReferenceError::UnknownColumn(name.to_string()))?,
        ),
        None => None,
    };

    let needle = keyword.to_lowercase();
    let mut best: Option<(usize, usize, f64)> = None;
    let mut best_similarity = 0.0_f64;
    let mut cells_scanned = 0_usize;
    for (row_index, row) in table.rows.iter().enumerate() {
        for col_index in 0..table.headers.len() {
            if column_filter.is_some_and(|only| only != col_index) {
                continue;
            }
            let Some(cell) = row.get(col_index) else {
                continue;
            };
            cells_scanned += 1;
            let haystack = cell_text(cell).to_lowercase();
            let similarity = jaro_winkler(&needle, &haystack);
            // Strictly-greater keeps the first cell on ties.
            if similarity > best_similarity {
                best_similarity = similarity;
                best = Some((row_index, col_index, similarity));
            }
        }
    }

    match best {
        Some((row, col, similarity)) if similarity > SIMILARITY_THRESHOLD => Ok(ReferenceMatch {
            placeholder: Placeholder::new(call_id.clone(), row, table.headers[col].clone())
                .canonical(),
            row,
            column: table.headers[col].clone(),
            similarity,
            rows_scanned: table.rows.len(),
            cells_scanned,
        }),
        _ => Err(ReferenceError::BelowThreshold {
            best_similarity,
        }),
    }
}

/// Natural text rendering of a cell for similarity scoring.
fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// SECTION: Similarity
// ============================================================================

/// Jaro-Winkler similarity in `[0, 1]`.
#[must_use]
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let jaro = jaro_similarity(&a, &b);
    let prefix =
        a.iter().zip(b.iter()).take(WINKLER_MAX_PREFIX).take_while(|(x, y)| x == y).count();
    #[allow(clippy::cast_precision_loss, reason = "Prefix length is at most 4.")]
    let bonus = prefix as f64 * WINKLER_PREFIX_SCALE * (1.0 - jaro);
    jaro + bonus
}

#[allow(
    clippy::cast_precision_loss,
    reason = "Match counts are bounded by string lengths in practice."
)]
fn jaro_similarity(a: &[char], b: &[char]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let window = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0_usize;
    for (i, ch) in a.iter().enumerate() {
        let start = i.saturating_sub(window);
        let end = (i + window + 1).min(b.len());
        for j in start..end {
            if !b_matched[j] && b[j] == *ch {
                a_matched[i] = true;
                b_matched[j] = true;
                matches += 1;
                break;
            }
        }
    }
    if matches == 0 {
        return 0.0;
    }
    let mut transposed = 0_usize;
    let mut j = 0_usize;
    for (i, matched) in a_matched.iter().enumerate() {
        if !matched {
            continue;
        }
        while !b_matched[j] {
            j += 1;
        }
        if a[i] != b[j] {
            transposed += 1;
        }
        j += 1;
    }
    let m = matches as f64;
    let t = transposed as f64 / 2.0;
    (m / a.len() as f64 + m / b.len() as f64 + (m - t) / m) / 3.0
}

// ============================================================================
// SECTION: Tests
// ============================================================================
