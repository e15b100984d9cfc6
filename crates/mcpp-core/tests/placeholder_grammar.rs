//! Property tests for the placeholder grammar and resolver round-trip.
// crates/mcpp-core/tests/placeholder_grammar.rs
// =============================================================================
// Module: Placeholder Grammar Property Tests
// Description: Round-trip and rejection properties for `{id.row.col}`.
// Purpose: Ensure canonical forms re-parse and in-range cells round-trip.
// =============================================================================

#![allow(clippy::unwrap_used, reason = "Test-only grammar assertions.")]

use mcpp_core::DataCache;
use mcpp_core::Placeholder;
use mcpp_core::core::CachedEntry;
use mcpp_core::core::CallId;
use mcpp_core::core::EntryMetadata;
use mcpp_core::core::EntryPayload;
use mcpp_core::core::TablePayload;
use mcpp_core::resolve_with_tracking;
use proptest::prelude::*;

proptest! {
    #[test]
    fn canonical_placeholders_reparse(
        call_id in "[A-Za-z0-9_-]{1,24}",
        row in 0usize..10_000,
        column in "[A-Za-z0-9_-]{1,24}",
    ) {
        let placeholder = Placeholder::new(call_id.as_str(), row, column.as_str());
        let rendered = placeholder.canonical();
        let parsed = Placeholder::parse_sole(&rendered);
        prop_assert_eq!(parsed, Some(placeholder));
    }

    #[test]
    fn surrounded_canonical_forms_never_parse_as_sole(
        prefix in "[a-z]{1,8}",
        call_id in "[A-Za-z0-9_-]{1,12}",
        row in 0usize..100,
        column in "[A-Za-z0-9_-]{1,12}",
    ) {
        let rendered = format!("{prefix}{}", Placeholder::new(call_id.as_str(), row, column.as_str()));
        prop_assert_eq!(Placeholder::parse_sole(&rendered), None);
    }

    #[test]
    fn in_range_cells_round_trip(
        rows in prop::collection::vec(
            prop::collection::vec(prop_oneof![
                any::<i64>().prop_map(serde_json::Value::from),
                any::<bool>().prop_map(serde_json::Value::from),
                "[a-zA-Z0-9 ]{0,16}".prop_map(serde_json::Value::from),
            ], 2..=2),
            1..8,
        ),
        row_pick in any::<prop::sample::Index>(),
    ) {
        let cache = DataCache::new();
        let table = TablePayload::new(
            vec!["A".to_string(), "B".to_string()],
            rows.clone(),
        );
        table.validate().unwrap();
        cache
            .put(&CallId::new("t1"), CachedEntry {
                payload: EntryPayload::Table(table),
                metadata: EntryMetadata {
                    tool_name: "prop_tool".to_string(),
                    created_at_ms: 0,
                    is_sensitive: true,
                    expires_at_ms: None,
                },
            })
            .unwrap();

        let row = row_pick.index(rows.len());
        for (column_index, column) in ["A", "B"].iter().enumerate() {
            let reference = format!("{{t1.{row}.{column}}}");
            let resolution =
                resolve_with_tracking(&serde_json::Value::from(reference), &cache, 0).unwrap();
            prop_assert_eq!(&resolution.value, &rows[row][column_index]);
            prop_assert_eq!(resolution.status.resolved, 1);
            prop_assert_eq!(resolution.status.failed, 0);
        }
    }
}
