//! End-to-end method dispatch tests for the MCPP wire surface.
// crates/mcpp-server/tests/dispatch_methods.rs
// =============================================================================
// Module: Method Dispatch Tests
// Description: Coverage of the six wire methods and the consent flow.
// Purpose: Ensure sensitive data never leaves without an explicit allow.
// =============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only dispatch assertions."
)]

use std::sync::Arc;
use std::time::Duration;

use mcpp_config::McppConfig;
use mcpp_core::core::CachedEntry;
use mcpp_core::core::CallId;
use mcpp_core::core::ConsentDecision;
use mcpp_core::core::EntryMetadata;
use mcpp_core::core::EntryPayload;
use mcpp_core::core::ErrorCode;
use mcpp_core::core::TablePayload;
use mcpp_server::McppServer;
use mcpp_server::MethodError;
use mcpp_server::MethodRouter;
use mcpp_server::StaticTableTool;
use mcpp_server::ToolRegistry;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Test Helpers
// ============================================================================

/// Builds a router from TOML config with the demo registry.
fn router_from(config: &str) -> MethodRouter {
    let config: McppConfig = toml::from_str(config).expect("test config");
    let mut registry = ToolRegistry::new();
    let (spec, tool) = StaticTableTool::demo_contacts();
    registry.register(spec, Arc::new(tool)).expect("register demo tool");
    let server = McppServer::from_config_with_registry(config, registry).expect("server");
    server.router().clone()
}

/// Seeds the cache with a small `t1` users table.
fn seed_users_table(router: &MethodRouter) {
    let entry = CachedEntry {
        payload: EntryPayload::Table(TablePayload::new(
            vec!["ID".to_string(), "Name".to_string(), "Age".to_string()],
            vec![
                vec![json!("1"), json!("Ana"), json!(42)],
                vec![json!("2"), json!("Bo"), json!(37)],
            ],
        )),
        metadata: EntryMetadata {
            tool_name: "list_contacts".to_string(),
            created_at_ms: 0,
            is_sensitive: true,
            expires_at_ms: None,
        },
    };
    router.cache().put(&CallId::new("t1"), entry).expect("seed cache");
}

/// Builds a usage-context params fragment.
fn usage_context(usage: &str, target_type: &str, destination: &str) -> Value {
    json!({
        "data_usage": usage,
        "requester": { "host_id": "host-1" },
        "target": { "type": target_type, "destination": destination },
    })
}

async fn call(router: &MethodRouter, method: &str, params: Value) -> Result<Value, MethodError> {
    router.handle(method, Some(params)).await
}

/// Current wall-clock time in unix milliseconds.
fn now_ms() -> u64 {
    u64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_millis(),
    )
    .expect("millis")
}

// ============================================================================
// SECTION: Data Access
// ============================================================================

#[tokio::test]
async fn get_data_returns_cached_table_verbatim() {
    let router = router_from("");
    seed_users_table(&router);

    let result = call(&router, "mcpp/get_data", json!({
        "tool_call_id": "t1",
        "usage_context": usage_context("display", "client", "dash"),
    }))
    .await
    .expect("get_data");

    assert_eq!(result["type"], json!("table"));
    assert_eq!(result["payload"]["headers"], json!(["ID", "Name", "Age"]));
    assert_eq!(result["payload"]["rows"][0], json!(["1", "Ana", 42]));
}

#[tokio::test]
async fn get_data_without_context_returns_entry() {
    let router = router_from("");
    seed_users_table(&router);
    let result =
        call(&router, "mcpp/get_data", json!({ "tool_call_id": "t1" })).await.expect("get_data");
    assert_eq!(result["metadata"]["tool_name"], json!("list_contacts"));
}

#[tokio::test]
async fn get_data_unknown_id_is_data_not_found() {
    let router = router_from("");
    let err = call(&router, "mcpp/get_data", json!({ "tool_call_id": "missing" }))
        .await
        .expect_err("expected miss");
    assert_eq!(err.code(), ErrorCode::DataNotFound);
}

// ============================================================================
// SECTION: Placeholder Resolution
// ============================================================================

#[tokio::test]
async fn sole_placeholder_preserves_integer_type() {
    let router = router_from("");
    seed_users_table(&router);

    let result = call(&router, "mcpp/resolve_placeholders", json!({
        "data": "{t1.0.Age}",
    }))
    .await
    .expect("resolve");

    assert_eq!(result["resolved_data"], json!(42));
    assert_eq!(result["resolution_status"]["total"], json!(1));
    assert_eq!(result["resolution_status"]["resolved"], json!(1));
}

#[tokio::test]
async fn embedded_placeholders_stringify_in_place() {
    let router = router_from("");
    seed_users_table(&router);

    let result = call(&router, "mcpp/resolve_placeholders", json!({
        "data": "User {t1.0.ID}/{t1.0.Age}",
    }))
    .await
    .expect("resolve");

    assert_eq!(result["resolved_data"], json!("User 1/42"));
}

#[tokio::test]
async fn failed_placeholders_are_reported_not_raised() {
    let router = router_from("");
    seed_users_table(&router);

    let result = call(&router, "mcpp/resolve_placeholders", json!({
        "data": ["{t1.0.Name}", "{t1.0.Missing}"],
    }))
    .await
    .expect("resolve");

    assert_eq!(result["resolved_data"], json!(["Ana", "{t1.0.Missing}"]));
    assert_eq!(result["resolution_status"]["failed"], json!(1));
    assert_eq!(result["resolution_status"]["unresolved"], json!(["{t1.0.Missing}"]));
}

#[tokio::test]
async fn blocked_target_denies_resolution() {
    let router = router_from(
        r#"
        [[tools]]
        name = "list_contacts"
        sensitive = true

        [tools.data_policy.data_usage_permissions]
        transfer = "allow"

        [tools.data_policy.target_permissions]
        blocked_targets = ["gpt-4"]
        "#,
    );
    seed_users_table(&router);

    let err = call(&router, "mcpp/resolve_placeholders", json!({
        "data": "{t1.0.Name}",
        "usage_context": usage_context("transfer", "llm", "gpt-4"),
        "tool_name": "list_contacts",
    }))
    .await
    .expect_err("expected deny");

    assert_eq!(err.code(), ErrorCode::InsufficientPermissions);
    match err {
        MethodError::PermissionDenied {
            details, ..
        } => {
            assert_eq!(details.target_check.reason.as_deref(), Some("llm_blocked_by_tool"));
        }
        other => panic!("expected permission denial, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_tool_name_is_invalid_params() {
    let router = router_from("");
    seed_users_table(&router);
    let err = call(&router, "mcpp/resolve_placeholders", json!({
        "data": "{t1.0.Name}",
        "usage_context": usage_context("display", "client", "dash"),
        "tool_name": "nope",
    }))
    .await
    .expect_err("expected invalid params");
    assert_eq!(err.code(), ErrorCode::InvalidParams);
}

// ============================================================================
// SECTION: Consent Flow (notify mode)
// ============================================================================

const PROMPT_TOOL_CONFIG: &str = r#"
    [[tools]]
    name = "list_contacts"
    sensitive = true

    [tools.data_policy.data_usage_permissions]
    transfer = "prompt"
"#;

#[tokio::test]
async fn prompt_returns_consent_request_then_remembered_allow_succeeds() {
    let router = router_from(PROMPT_TOOL_CONFIG);
    seed_users_table(&router);
    let params = json!({
        "data": "{t1.0.Name}",
        "usage_context": usage_context("transfer", "llm", "claude"),
        "tool_name": "list_contacts",
    });

    // First issue: CONSENT_REQUIRED carrying the full consent request.
    let err = call(&router, "mcpp/resolve_placeholders", params.clone())
        .await
        .expect_err("expected consent request");
    let request = match err {
        MethodError::ConsentRequired {
            request,
        } => request,
        other => panic!("expected consent request, got {other:?}"),
    };
    assert_eq!(request.destination, "claude");
    assert!(request.reasons.contains(&"usage_prompt".to_string()));
    assert_eq!(
        request.data_summary.as_ref().map(|summary| summary.placeholder_count),
        Some(1)
    );

    // The host answers allow with remember=true.
    let answer = call(&router, "mcpp/provide_consent", json!({
        "request_id": request.request_id.as_str(),
        "decision": "allow",
        "remember": true,
        "duration_minutes": 5,
    }))
    .await
    .expect("provide_consent");
    assert_eq!(answer["remembered"], json!(true));

    // Re-issue: the remembered decision short-circuits to the data.
    let result = call(&router, "mcpp/resolve_placeholders", params).await.expect("resolve");
    assert_eq!(result["resolved_data"], json!("Ana"));
}

#[tokio::test]
async fn remembered_deny_short_circuits_without_new_request() {
    let router = router_from(PROMPT_TOOL_CONFIG);
    seed_users_table(&router);
    let params = json!({
        "data": "{t1.0.Name}",
        "usage_context": usage_context("transfer", "llm", "claude"),
        "tool_name": "list_contacts",
    });

    let err = call(&router, "mcpp/resolve_placeholders", params.clone())
        .await
        .expect_err("expected consent request");
    let MethodError::ConsentRequired {
        request,
    } = err
    else {
        panic!("expected consent request");
    };
    call(&router, "mcpp/provide_consent", json!({
        "request_id": request.request_id.as_str(),
        "decision": "deny",
        "remember": true,
        "duration_minutes": 5,
    }))
    .await
    .expect("provide_consent");

    let err =
        call(&router, "mcpp/resolve_placeholders", params).await.expect_err("expected deny");
    assert_eq!(err.code(), ErrorCode::ConsentDenied);
    // The cached deny never minted a new pending request.
    assert_eq!(router.consent().pending_len().expect("pending"), 0);
}

#[tokio::test]
async fn unanswered_consent_requests_stay_pending_until_resolved() {
    let router = router_from(PROMPT_TOOL_CONFIG);
    seed_users_table(&router);
    let params = json!({
        "data": "{t1.0.Name}",
        "usage_context": usage_context("transfer", "llm", "claude"),
        "tool_name": "list_contacts",
    });

    let _ = call(&router, "mcpp/resolve_placeholders", params).await;
    assert_eq!(router.consent().pending_len().expect("pending"), 1);
}

#[tokio::test]
async fn provide_consent_unknown_id_is_data_not_found() {
    let router = router_from("");
    let err = call(&router, "mcpp/provide_consent", json!({
        "request_id": "consent-missing",
        "decision": "allow",
    }))
    .await
    .expect_err("expected miss");
    assert_eq!(err.code(), ErrorCode::DataNotFound);
}

#[tokio::test]
async fn get_data_prompt_flow_matches_resolve_flow() {
    let router = router_from(
        r#"
        [policy.default_data_usage_policy]
        display = "prompt"
        "#,
    );
    seed_users_table(&router);
    let err = call(&router, "mcpp/get_data", json!({
        "tool_call_id": "t1",
        "usage_context": usage_context("display", "server", "api"),
    }))
    .await
    .expect_err("expected consent request");
    assert_eq!(err.code(), ErrorCode::ConsentRequired);
}

// ============================================================================
// SECTION: Consent Flow (block mode)
// ============================================================================

const BLOCK_MODE_CONFIG: &str = r#"
    [consent]
    mode = "block"
    timeout_seconds = 5

    [[tools]]
    name = "list_contacts"
    sensitive = true

    [tools.data_policy.data_usage_permissions]
    transfer = "prompt"
"#;

#[tokio::test]
async fn block_mode_parks_until_the_decision_arrives() {
    let router = router_from(BLOCK_MODE_CONFIG);
    seed_users_table(&router);

    // A helper task answers the pending request as soon as it appears.
    let resolver = router.consent().clone();
    let answer = tokio::spawn(async move {
        loop {
            let ids = resolver.pending_ids().expect("pending ids");
            if let Some(id) = ids.first() {
                let resolved = resolver
                    .resolve(id, ConsentDecision::Allow, now_ms())
                    .expect("resolve");
                assert!(resolved.is_some());
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let result = call(&router, "mcpp/resolve_placeholders", json!({
        "data": "{t1.0.Name}",
        "usage_context": usage_context("transfer", "llm", "claude"),
        "tool_name": "list_contacts",
    }))
    .await
    .expect("resolve after consent");
    assert_eq!(result["resolved_data"], json!("Ana"));
    answer.await.expect("resolver task");
}

#[tokio::test]
async fn block_mode_timeout_applies_default_deny() {
    let router = router_from(
        r#"
        [consent]
        mode = "block"
        timeout_seconds = 1
        default_on_timeout = "deny"

        [[tools]]
        name = "list_contacts"
        sensitive = true

        [tools.data_policy.data_usage_permissions]
        transfer = "prompt"
        "#,
    );
    seed_users_table(&router);

    let err = call(&router, "mcpp/resolve_placeholders", json!({
        "data": "{t1.0.Name}",
        "usage_context": usage_context("transfer", "llm", "claude"),
        "tool_name": "list_contacts",
    }))
    .await
    .expect_err("expected timeout");
    assert_eq!(err.code(), ErrorCode::ConsentTimeout);
}

#[tokio::test]
async fn block_mode_timeout_applies_default_allow() {
    let router = router_from(
        r#"
        [consent]
        mode = "block"
        timeout_seconds = 1
        default_on_timeout = "allow"

        [[tools]]
        name = "list_contacts"
        sensitive = true

        [tools.data_policy.data_usage_permissions]
        transfer = "prompt"
        "#,
    );
    seed_users_table(&router);

    let result = call(&router, "mcpp/resolve_placeholders", json!({
        "data": "{t1.0.Name}",
        "usage_context": usage_context("transfer", "llm", "claude"),
        "tool_name": "list_contacts",
    }))
    .await
    .expect("timeout defaults to allow");
    assert_eq!(result["resolved_data"], json!("Ana"));
}

#[tokio::test]
async fn block_mode_deny_decision_is_consent_denied() {
    let router = router_from(BLOCK_MODE_CONFIG);
    seed_users_table(&router);

    let resolver = router.consent().clone();
    tokio::spawn(async move {
        loop {
            let ids = resolver.pending_ids().expect("pending ids");
            if let Some(id) = ids.first() {
                let resolved =
                    resolver.resolve(id, ConsentDecision::Deny, now_ms()).expect("resolve");
                assert!(resolved.is_some());
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let err = call(&router, "mcpp/resolve_placeholders", json!({
        "data": "{t1.0.Name}",
        "usage_context": usage_context("transfer", "llm", "claude"),
        "tool_name": "list_contacts",
    }))
    .await
    .expect_err("expected deny");
    assert_eq!(err.code(), ErrorCode::ConsentDenied);
}

// ============================================================================
// SECTION: Reference Finder
// ============================================================================

#[tokio::test]
async fn find_reference_mints_placeholder_from_keyword() {
    let router = router_from("");
    seed_users_table(&router);

    let result = call(&router, "mcpp/find_reference", json!({
        "tool_call_id": "t1",
        "keyword": "anaa",
    }))
    .await
    .expect("find_reference");

    assert_eq!(result["placeholder"], json!("{t1.0.Name}"));
    let similarity = result["similarity"].as_f64().expect("similarity");
    assert!(similarity > 0.7);
}

#[tokio::test]
async fn find_reference_below_threshold_is_reference_not_found() {
    let router = router_from("");
    seed_users_table(&router);
    let err = call(&router, "mcpp/find_reference", json!({
        "tool_call_id": "t1",
        "keyword": "zzzz",
    }))
    .await
    .expect_err("expected no match");
    assert_eq!(err.code(), ErrorCode::ReferenceNotFound);
}

#[tokio::test]
async fn find_reference_bad_column_is_invalid_params() {
    let router = router_from("");
    seed_users_table(&router);
    let err = call(&router, "mcpp/find_reference", json!({
        "tool_call_id": "t1",
        "keyword": "ana",
        "column_name": "Nope",
    }))
    .await
    .expect_err("expected invalid params");
    assert_eq!(err.code(), ErrorCode::InvalidParams);
}

// ============================================================================
// SECTION: Tool Surface
// ============================================================================

#[tokio::test]
async fn tools_list_exposes_registered_tools() {
    let router = router_from("");
    let result = router.handle("tools/list", None).await.expect("tools/list");
    assert_eq!(result["tools"][0]["name"], json!("list_contacts"));
    assert_eq!(result["tools"][0]["is_sensitive"], json!(true));
}

#[tokio::test]
async fn sensitive_tool_call_returns_summary_and_caches() {
    let router = router_from("");
    let result = call(&router, "tools/call", json!({
        "name": "list_contacts",
        "arguments": {},
        "tool_call_id": "contacts-1",
    }))
    .await
    .expect("tools/call");

    assert_eq!(result["dataRefId"], json!("contacts-1"));
    assert_eq!(result["rowCount"], json!(2));
    assert_eq!(result["columnNames"], json!(["Name", "Email"]));
    // The payload itself never appears in the summary.
    assert!(result.get("data").is_none());

    let cached = call(&router, "mcpp/get_data", json!({ "tool_call_id": "contacts-1" }))
        .await
        .expect("get_data");
    assert_eq!(cached["payload"]["rows"][0][0], json!("Ana Silva"));
    assert_eq!(cached["metadata"]["is_sensitive"], json!(true));
}

#[tokio::test]
async fn non_sensitive_tool_call_returns_payload_inline() {
    let router = router_from(
        r#"
        [[tools]]
        name = "list_contacts"
        sensitive = false
        "#,
    );
    let result = call(&router, "tools/call", json!({
        "name": "list_contacts",
        "arguments": {},
    }))
    .await
    .expect("tools/call");

    assert_eq!(result["data"]["type"], json!("table"));
    assert_eq!(result["data"]["payload"]["rows"][1][0], json!("Bo Park"));
    assert!(result.get("dataRefId").is_none());
}

#[tokio::test]
async fn tool_call_rejects_unsafe_call_ids() {
    let router = router_from("");
    let err = call(&router, "tools/call", json!({
        "name": "list_contacts",
        "arguments": {},
        "tool_call_id": "bad id!",
    }))
    .await
    .expect_err("expected invalid params");
    assert_eq!(err.code(), ErrorCode::InvalidParams);
}

#[tokio::test]
async fn unknown_tool_is_method_not_found() {
    let router = router_from("");
    let err = call(&router, "tools/call", json!({ "name": "missing", "arguments": {} }))
        .await
        .expect_err("expected unknown tool");
    assert_eq!(err.code(), ErrorCode::MethodNotFound);
}

#[tokio::test]
async fn tool_arguments_resolve_placeholders_before_execution() {
    let router = router_from("");
    seed_users_table(&router);
    // The demo tool ignores argument content but requires an object; the
    // resolved tree must still be an object after substitution.
    let result = call(&router, "tools/call", json!({
        "name": "list_contacts",
        "arguments": { "note": "{t1.0.Name}" },
    }))
    .await
    .expect("tools/call");
    assert!(result.get("dataRefId").is_some());
}

#[tokio::test]
async fn tool_arguments_with_absent_references_are_a_cache_miss() {
    let router = router_from("");
    let err = call(&router, "tools/call", json!({
        "name": "list_contacts",
        "arguments": { "note": "{absent.0.Name}" },
    }))
    .await
    .expect_err("expected cache miss");
    assert_eq!(err.code(), ErrorCode::CacheMiss);
}

#[tokio::test]
async fn deterministic_results_for_fixed_state() {
    let router = router_from("");
    seed_users_table(&router);
    let params = json!({ "data": "User {t1.0.ID}/{t1.0.Age}" });
    let first = call(&router, "mcpp/resolve_placeholders", params.clone()).await.expect("first");
    let second = call(&router, "mcpp/resolve_placeholders", params).await.expect("second");
    assert_eq!(first, second);
}
