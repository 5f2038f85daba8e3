//! Re-access through receipts and signed sessions.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::harness::{TestHarness, BUYER};
use soulmarket::api::SESSION_HEADER;
use soulmarket::settlement::{ProviderCache, RpcClient, SettlementExpectation, SettlementVerifier};
use soulmarket::{
    AssetApi, ChallengeMessageBuilder, EntitlementSessionManager, PurchaseOutcome, PurchaseState,
    ReacquireState,
};
use std::sync::Arc;

fn session_manager(harness: &TestHarness) -> EntitlementSessionManager {
    let config = &harness.config;
    let api = AssetApi::new(
        &config.api_base_url,
        Arc::clone(&harness.market) as Arc<dyn soulmarket::HttpTransport>,
        config.request_timeout(),
    );
    EntitlementSessionManager::new(
        api,
        harness.orchestrator.store().clone(),
        ChallengeMessageBuilder::new(&config.domain, &config.uri, config.chain_id),
        config.session_ttl_ms(),
    )
}

/// Scenario C: a receipt alone is refused, one signed session unlocks it.
#[tokio::test]
async fn test_rejected_receipt_escalates_to_session() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.grant_receipt("soul-1", "rcpt-old");
    harness.market.require_session(true);
    harness
        .orchestrator
        .store()
        .store_receipt(&harness.wallet(), "soul-1", "rcpt-old");

    let outcome = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect("restore");
    assert!(matches!(outcome, PurchaseOutcome::Restored { .. }));
    assert_eq!(outcome.content().as_ref(), b"soul one");
    assert_eq!(harness.orchestrator.tracker().state(), PurchaseState::Restored);

    assert_eq!(harness.signer.messages().len(), 1);
    assert!(harness.signer.authorizations().is_empty());
    assert_eq!(harness.market.session_requests(), 1);
    assert_eq!(harness.market.paid_requests(), 0);

    let requests = harness.market.requests();
    let last = requests.last().expect("retry");
    assert_eq!(last.header_value(SESSION_HEADER), Some("sess-1"));
}

/// Scenario D: without proof nothing touches the network.
#[tokio::test]
async fn test_no_proof_means_payment_without_network() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");

    let outcome = session_manager(&harness)
        .attempt_reacquire("soul-1", &harness.wallet(), harness.signer.as_ref())
        .await
        .expect("reacquire");
    assert!(!outcome.ok);
    assert!(outcome.requires_payment);
    assert_eq!(outcome.final_state, ReacquireState::NoProof);
    assert!(harness.market.requests().is_empty());
}

/// Two re-acquisitions in a row cost one challenge round trip.
#[tokio::test]
async fn test_session_is_reused_across_assets() {
    let harness = TestHarness::setup();
    let wallet = harness.wallet();
    for (asset, receipt) in [("soul-1", "r1"), ("soul-2", "r2")] {
        harness.market.add_asset(asset, b"content");
        harness.market.grant_receipt(asset, receipt);
        harness
            .orchestrator
            .store()
            .store_receipt(&wallet, asset, receipt);
    }
    harness.market.require_session(true);
    let manager = session_manager(&harness);

    let first = manager
        .attempt_reacquire("soul-1", &wallet, harness.signer.as_ref())
        .await
        .expect("first");
    assert!(first.ok);
    assert_eq!(first.final_state, ReacquireState::ChallengeRequired);

    let second = manager
        .attempt_reacquire("soul-2", &wallet, harness.signer.as_ref())
        .await
        .expect("second");
    assert!(second.ok);
    assert_eq!(second.final_state, ReacquireState::PassiveAttempt);

    let again = manager
        .attempt_reacquire("soul-1", &wallet, harness.signer.as_ref())
        .await
        .expect("again");
    assert!(again.ok);

    assert_eq!(harness.signer.messages().len(), 1);
    assert_eq!(harness.market.session_requests(), 1);
}

#[tokio::test]
async fn test_refused_session_falls_back_to_payment() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.grant_receipt("soul-1", "rcpt-old");
    harness.market.require_session(true);
    harness.market.reject_sessions();
    harness
        .orchestrator
        .store()
        .store_receipt(&harness.wallet(), "soul-1", "rcpt-stale");

    let outcome = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect("purchase");
    assert!(matches!(outcome, PurchaseOutcome::Purchased { .. }));
    assert_eq!(harness.signer.messages().len(), 1);
    assert_eq!(harness.market.paid_requests(), 1);
    assert_eq!(
        harness
            .orchestrator
            .store()
            .receipt(&harness.wallet(), "soul-1")
            .as_deref(),
        Some("rcpt-soul-1-1")
    );
}

/// Scenario E: an unmined settlement is a soft negative.
#[tokio::test]
async fn test_unmined_transaction_is_not_an_error() {
    let harness = TestHarness::setup();
    let providers = ProviderCache::new();
    providers.insert(
        &harness.config.rpc_url,
        Arc::clone(&harness.chain) as Arc<dyn RpcClient>,
    );
    let verifier = SettlementVerifier::from_config(&harness.config, &providers);

    let expected = SettlementExpectation {
        payer: Some(super::harness::addr(BUYER)),
        network: Some("base".into()),
        ..Default::default()
    };
    let result = verifier
        .verify(&format!("0x{}", "11".repeat(32)), &expected)
        .await
        .expect("soft negative");
    assert!(!result.verified);
    assert_eq!(result.reason.as_deref(), Some("receipt not found yet"));
    assert!(result.is_pending());
    assert_eq!(providers.stats().hits, 1);
}
