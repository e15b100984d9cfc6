// crates/mcpp-core/src/core/entry.rs
// ============================================================================
// Module: MCPP Cached Entries
// Description: Typed payloads and metadata for cached tool-call results.
// Purpose: Provide the table/text/json payload model with table invariants.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A cached entry couples a typed payload with call metadata. Tabular
//! payloads enforce distinct non-empty headers and uniform row arity; rows
//! are zero-indexed and row order is stable. Only tabular entries are
//! addressable by placeholders.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Payloads
// ============================================================================

/// Typed payload of a cached tool-call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EntryPayload {
    /// Tabular payload addressable by placeholders.
    Table(TablePayload),
    /// Plain text payload.
    Text(String),
    /// Arbitrary JSON payload.
    Json(Value),
}

impl EntryPayload {
    /// Returns the tabular payload when this entry is a table.
    #[must_use]
    pub const fn as_table(&self) -> Option<&TablePayload> {
        match self {
            Self::Table(table) => Some(table),
            Self::Text(_) | Self::Json(_) => None,
        }
    }

    /// Returns a stable label for the payload kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Table(_) => "table",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
        }
    }
}

/// Tabular payload: ordered headers plus zero-indexed rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TablePayload {
    /// Ordered, distinct, non-empty column names.
    pub headers: Vec<String>,
    /// Ordered rows; each row has the same arity as `headers`.
    pub rows: Vec<Vec<Value>>,
}

impl TablePayload {
    /// Creates a table payload without validating invariants.
    #[must_use]
    pub const fn new(headers: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            headers,
            rows,
        }
    }

    /// Validates header and row invariants.
    ///
    /// # Errors
    ///
    /// Returns [`TableError`] when headers are empty, duplicated, or a row's
    /// arity differs from the header count.
    pub fn validate(&self) -> Result<(), TableError> {
        for (index, header) in self.headers.iter().enumerate() {
            if header.is_empty() {
                return Err(TableError::EmptyHeader {
                    index,
                });
            }
            if self.headers[..index].iter().any(|prior| prior == header) {
                return Err(TableError::DuplicateHeader(header.clone()));
            }
        }
        for (index, row) in self.rows.iter().enumerate() {
            if row.len() != self.headers.len() {
                return Err(TableError::RowArity {
                    row: index,
                    expected: self.headers.len(),
                    actual: row.len(),
                });
            }
        }
        Ok(())
    }

    /// Returns the position of a column name in the header order.
    #[must_use]
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == column)
    }

    /// Returns the cell at the given row and column indices.
    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|cells| cells.get(column))
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Table invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// A header cell is empty.
    #[error("header at index {index} is empty")]
    EmptyHeader {
        /// Zero-based header position.
        index: usize,
    },
    /// Two headers share the same name.
    #[error("duplicate header '{0}'")]
    DuplicateHeader(String),
    /// A row's arity differs from the header count.
    #[error("row {row} has {actual} cells, expected {expected}")]
    RowArity {
        /// Zero-based row position.
        row: usize,
        /// Expected cell count.
        expected: usize,
        /// Actual cell count.
        actual: usize,
    },
}

// ============================================================================
// SECTION: Metadata
// ============================================================================

/// Metadata attached to a cached entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Name of the tool that produced the payload.
    pub tool_name: String,
    /// Creation time in unix milliseconds (monotonic per process).
    pub created_at_ms: u64,
    /// Whether the payload is sensitive.
    pub is_sensitive: bool,
    /// Optional absolute expiry in unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

impl EntryMetadata {
    /// Returns true when the entry is expired at the given time.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|expires| expires <= now_ms)
    }
}

/// A cached tool-call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    /// Typed payload.
    #[serde(flatten)]
    pub payload: EntryPayload,
    /// Call metadata.
    pub metadata: EntryMetadata,
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only payload assertions.")]

    use serde_json::json;

    use super::CachedEntry;
    use super::EntryMetadata;
    use super::EntryPayload;
    use super::TableError;
    use super::TablePayload;

    fn sample_table() -> TablePayload {
        TablePayload::new(
            vec!["ID".to_string(), "Name".to_string()],
            vec![vec![json!("1"), json!("Ana")], vec![json!("2"), json!("Bo")]],
        )
    }

    #[test]
    fn table_validates_invariants() {
        assert!(sample_table().validate().is_ok());

        let empty_header = TablePayload::new(vec![String::new()], Vec::new());
        assert_eq!(
            empty_header.validate(),
            Err(TableError::EmptyHeader {
                index: 0
            })
        );

        let duplicate = TablePayload::new(vec!["A".to_string(), "A".to_string()], Vec::new());
        assert_eq!(duplicate.validate(), Err(TableError::DuplicateHeader("A".to_string())));

        let ragged = TablePayload::new(vec!["A".to_string()], vec![vec![json!(1), json!(2)]]);
        assert!(matches!(ragged.validate(), Err(TableError::RowArity { .. })));
    }

    #[test]
    fn table_cell_addressing() {
        let table = sample_table();
        assert_eq!(table.column_index("Name"), Some(1));
        assert_eq!(table.column_index("Missing"), None);
        assert_eq!(table.cell(0, 1), Some(&json!("Ana")));
        assert_eq!(table.cell(2, 0), None);
    }

    #[test]
    fn entry_serializes_with_tagged_payload() {
        let entry = CachedEntry {
            payload: EntryPayload::Table(sample_table()),
            metadata: EntryMetadata {
                tool_name: "list_users".to_string(),
                created_at_ms: 10,
                is_sensitive: true,
                expires_at_ms: None,
            },
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], json!("table"));
        assert_eq!(value["payload"]["headers"][0], json!("ID"));
        assert_eq!(value["metadata"]["is_sensitive"], json!(true));
    }

    #[test]
    fn metadata_expiry() {
        let metadata = EntryMetadata {
            tool_name: "t".to_string(),
            created_at_ms: 0,
            is_sensitive: false,
            expires_at_ms: Some(100),
        };
        assert!(!metadata.is_expired(99));
        assert!(metadata.is_expired(100));
    }
}
