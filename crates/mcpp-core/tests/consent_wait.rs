//! Parked consent-wait tests for the MCPP consent coordinator.
// crates/mcpp-core/tests/consent_wait.rs
// =============================================================================
// Module: Consent Wait Tests
// Description: Async coverage of parked waiters, timeouts, and cancellation.
// Purpose: Ensure the one-shot waiter wakes exactly once and cleans up.
// =============================================================================

#![allow(clippy::panic, clippy::unwrap_used, reason = "Test-only consent assertions.")]

use std::time::Duration;

use mcpp_core::ConsentCoordinator;
use mcpp_core::ConsentWaitOutcome;
use mcpp_core::PendingContext;
use mcpp_core::core::ConsentDecision;
use mcpp_core::core::DataUsage;
use mcpp_core::core::HostId;

fn context() -> PendingContext {
    PendingContext {
        host_id: HostId::new("host-1"),
        destination: "gpt-4".to_string(),
        data_usage: DataUsage::Transfer,
        tool_name: None,
    }
}

#[tokio::test]
async fn waiter_wakes_on_resolve() {
    let coordinator = ConsentCoordinator::new(8);
    let id = coordinator.next_request_id(0);
    let waiter = coordinator
        .register_waiter(&id, context(), 60_000, 0)
        .unwrap_or_else(|err| panic!("register waiter: {err}"));

    let resolver = coordinator.clone();
    let resolve_id = id.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        resolver.resolve(&resolve_id, ConsentDecision::Allow, 1_000)
    });

    let outcome = waiter.await_decision(Duration::from_secs(5)).await;
    assert_eq!(outcome, ConsentWaitOutcome::Decided(ConsentDecision::Allow));
    let resolved = handle
        .await
        .unwrap_or_else(|err| panic!("join: {err}"))
        .unwrap_or_else(|err| panic!("resolve: {err}"));
    assert!(resolved.is_some());
}

#[tokio::test]
async fn waiter_times_out_without_decision() {
    let coordinator = ConsentCoordinator::new(8);
    let id = coordinator.next_request_id(0);
    let waiter = coordinator
        .register_waiter(&id, context(), 60_000, 0)
        .unwrap_or_else(|err| panic!("register waiter: {err}"));

    let outcome = waiter.await_decision(Duration::from_millis(30)).await;
    assert_eq!(outcome, ConsentWaitOutcome::TimedOut);

    // The timed-out waiter removed its pending entry on drop, so a late
    // decision is silently dropped.
    let late = coordinator
        .resolve(&id, ConsentDecision::Allow, 1_000)
        .unwrap_or_else(|err| panic!("resolve: {err}"));
    assert!(late.is_none());
}

#[tokio::test]
async fn dropped_waiter_drops_late_decisions() {
    let coordinator = ConsentCoordinator::new(8);
    let id = coordinator.next_request_id(0);
    let waiter = coordinator
        .register_waiter(&id, context(), 60_000, 0)
        .unwrap_or_else(|err| panic!("register waiter: {err}"));
    assert_eq!(coordinator.pending_len().unwrap_or_default(), 1);

    drop(waiter);
    assert_eq!(coordinator.pending_len().unwrap_or_default(), 0);
    let late = coordinator
        .resolve(&id, ConsentDecision::Deny, 1_000)
        .unwrap_or_else(|err| panic!("resolve: {err}"));
    assert!(late.is_none());
}

#[tokio::test]
async fn deny_decision_reaches_the_waiter() {
    let coordinator = ConsentCoordinator::new(8);
    let id = coordinator.next_request_id(0);
    let waiter = coordinator
        .register_waiter(&id, context(), 60_000, 0)
        .unwrap_or_else(|err| panic!("register waiter: {err}"));

    coordinator
        .resolve(&id, ConsentDecision::Deny, 1_000)
        .unwrap_or_else(|err| panic!("resolve: {err}"));
    let outcome = waiter.await_decision(Duration::from_secs(5)).await;
    assert_eq!(outcome, ConsentWaitOutcome::Decided(ConsentDecision::Deny));
}
