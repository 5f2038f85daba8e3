//! Full purchases: negotiation, signing, submission and background verification.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::harness::{addr, offer, tx_for, SettlementMode, TestHarness, PRICE, SELLER, STRANGER};
use soulmarket::payment::{select_requirement, PaymentPayloadBuilder};
use soulmarket::{
    Error, PurchaseEvent, PurchaseOutcome, PurchaseState, TransferMethod, VerificationDisplay,
};

async fn settle(outcome: PurchaseOutcome) -> soulmarket::VerificationReport {
    match outcome {
        PurchaseOutcome::Purchased { verification, .. } => {
            verification.await.expect("verification task")
        }
        PurchaseOutcome::Restored { .. } => panic!("expected a paid purchase"),
    }
}

/// Scenario A: the matching offer is selected and the payload pays it.
#[tokio::test]
async fn test_selected_offer_is_what_gets_signed() {
    let harness = TestHarness::setup();
    let offers = vec![offer(SELLER, "eip3009", PRICE)];

    let selected = select_requirement(&offers, Some(&addr(SELLER)), TransferMethod::Eip3009)
        .expect("select");
    assert_eq!(selected, &offers[0]);

    let payload = PaymentPayloadBuilder::new()
        .build(selected, &harness.wallet(), harness.signer.as_ref())
        .await
        .expect("payload");
    assert_eq!(payload.accepted.pay_to, SELLER);
    assert_eq!(payload.accepted, offers[0]);
    assert_eq!(harness.signer.authorizations().len(), 1);
}

#[tokio::test]
async fn test_paid_purchase_delivers_then_verifies() {
    let mut harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");

    let outcome = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect("purchase");
    assert_eq!(outcome.content().as_ref(), b"soul one");

    let wallet = harness.wallet();
    let store = harness.orchestrator.store();
    assert_eq!(store.receipt(&wallet, "soul-1").as_deref(), Some("rcpt-soul-1-1"));
    assert!(store.is_owned(&wallet, "soul-1"));

    let sequence = outcome.sequence();
    if let PurchaseOutcome::Purchased {
        payload, settlement, ..
    } = &outcome
    {
        assert_eq!(payload.accepted.pay_to, SELLER);
        assert!(settlement.is_complete());
    }

    let report = settle(outcome).await;
    assert!(report.applied);
    assert_eq!(report.status.display, VerificationDisplay::Verified);
    assert_eq!(harness.orchestrator.tracker().state(), PurchaseState::Verified);
    assert_eq!(harness.chain.lookups(), 1);

    let states: Vec<PurchaseState> = harness
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            PurchaseEvent::StateChanged { state, sequence: s, .. } if s == sequence => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            PurchaseState::CheckingEntitlement,
            PurchaseState::NegotiatingPayment,
            PurchaseState::Signing,
            PurchaseState::Submitting,
            PurchaseState::Settled,
            PurchaseState::VerifyingSettlement,
            PurchaseState::Verified,
        ]
    );
}

#[tokio::test]
async fn test_second_purchase_restores_without_paying() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");

    let first = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect("purchase");
    settle(first).await;

    let second = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect("restore");
    assert!(matches!(second, PurchaseOutcome::Restored { .. }));
    assert_eq!(second.content().as_ref(), b"soul one");
    assert_eq!(harness.market.paid_requests(), 1);
    assert_eq!(harness.signer.authorizations().len(), 1);
    assert_eq!(harness.orchestrator.tracker().state(), PurchaseState::Restored);
}

/// Scenario B: no offer pays the expected seller, so nothing is signed or paid.
#[tokio::test]
async fn test_recipient_mismatch_stops_before_signing() {
    let mut harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.set_offers(vec![offer(STRANGER, "eip3009", PRICE)]);

    let result = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await;
    let err = result.expect_err("must fail");
    assert!(matches!(err, Error::RecipientMismatch { .. }));
    assert!(err.aborts_without_side_effects());

    assert!(harness.signer.authorizations().is_empty());
    assert_eq!(harness.market.paid_requests(), 0);
    assert_eq!(harness.market.requests().len(), 1);
    assert!(harness
        .orchestrator
        .store()
        .receipt(&harness.wallet(), "soul-1")
        .is_none());
    assert_eq!(harness.orchestrator.tracker().state(), PurchaseState::Failed);

    let failed = harness
        .drain_events()
        .into_iter()
        .find_map(|e| match e {
            PurchaseEvent::Failed { message, .. } => Some(message),
            _ => None,
        })
        .expect("failure event");
    assert!(!failed.contains('\n'));
}

#[tokio::test]
async fn test_unsupported_method_stops_before_signing() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.set_offers(vec![offer(SELLER, "permit2", PRICE)]);

    let err = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect_err("must fail");
    match err {
        Error::UnsupportedTransferMethod { available, .. } => {
            assert_eq!(available, vec!["permit2"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(harness.signer.authorizations().is_empty());
}

#[tokio::test]
async fn test_foreign_chain_offer_stops_before_signing() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    let mut foreign = offer(SELLER, "eip3009", PRICE);
    foreign.network = "eip155:1".into();
    harness.market.set_offers(vec![foreign]);

    let err = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect_err("must fail");
    assert!(matches!(err, Error::UnsupportedNetwork { .. }));
    assert!(harness.signer.authorizations().is_empty());
    assert_eq!(harness.market.paid_requests(), 0);
    assert_eq!(harness.orchestrator.tracker().state(), PurchaseState::Failed);
}

#[tokio::test]
async fn test_permit2_purchase() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.set_offers(vec![
        offer(SELLER, "eip3009", PRICE),
        offer(SELLER, "permit2", PRICE),
    ]);

    let ctx = harness.context().with_transfer_method(TransferMethod::Permit2);
    let outcome = harness
        .orchestrator
        .purchase("soul-1", &ctx)
        .await
        .expect("purchase");
    let report = settle(outcome).await;
    assert_eq!(report.status.display, VerificationDisplay::Verified);

    let payments = harness.market.payments();
    assert_eq!(payments[0].accepted.transfer_method(), "permit2");
    assert_eq!(
        harness.signer.authorizations()[0].method,
        TransferMethod::Permit2
    );
}

#[tokio::test]
async fn test_signing_rejection_moves_no_funds() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.signer.reject_all();

    let err = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect_err("must fail");
    assert!(matches!(err, Error::SigningRejected(_)));
    assert_eq!(harness.market.paid_requests(), 0);
    assert!(!harness
        .orchestrator
        .store()
        .is_owned(&harness.wallet(), "soul-1"));
}

#[tokio::test]
async fn test_missing_settlement_confirmation_fails() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.set_settlement_mode(SettlementMode::Missing);

    let err = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect_err("must fail");
    assert!(matches!(err, Error::MissingSettlementConfirmation(_)));

    let store = harness.orchestrator.store();
    assert!(store.receipt(&harness.wallet(), "soul-1").is_none());
    assert!(!store.is_owned(&harness.wallet(), "soul-1"));
    assert_eq!(harness.orchestrator.tracker().state(), PurchaseState::Failed);
    assert_eq!(harness.chain.lookups(), 0);
}

#[tokio::test]
async fn test_unsuccessful_settlement_fails() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.set_settlement_mode(SettlementMode::Unsuccessful);

    let err = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect_err("must fail");
    match err {
        Error::MissingSettlementConfirmation(reason) => {
            assert_eq!(reason, "facilitator timeout");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_underpaid_settlement_warns_but_keeps_content() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.settle_amount(PRICE - 1);

    let outcome = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect("purchase");
    assert_eq!(outcome.content().as_ref(), b"soul one");

    let report = settle(outcome).await;
    assert_eq!(report.status.display, VerificationDisplay::Warn);
    assert!(report
        .status
        .reason
        .as_deref()
        .expect("reason")
        .contains("amount below expected"));
    assert_eq!(harness.orchestrator.tracker().state(), PurchaseState::Warn);
    assert!(harness
        .orchestrator
        .store()
        .is_owned(&harness.wallet(), "soul-1"));
}

/// The attested network is checked against the paid one, never adopted.
#[tokio::test]
async fn test_settlement_on_other_network_warns_without_lookup() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.attest_network("eip155:1");

    let outcome = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect("purchase");
    assert_eq!(outcome.content().as_ref(), b"soul one");

    let report = settle(outcome).await;
    assert!(report.applied);
    assert_eq!(report.status.display, VerificationDisplay::Warn);
    let reason = report.status.reason.expect("reason");
    assert!(reason.contains("network mismatch"));
    assert!(reason.contains("eip155:1"));
    assert_eq!(harness.chain.lookups(), 0);
    assert_eq!(harness.orchestrator.tracker().state(), PurchaseState::Warn);
}

#[tokio::test]
async fn test_settlement_network_alias_still_verifies() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.attest_network("base");

    let outcome = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect("purchase");
    let report = settle(outcome).await;
    assert_eq!(report.status.display, VerificationDisplay::Verified);
    assert_eq!(harness.chain.lookups(), 1);
}

#[tokio::test]
async fn test_unmined_settlement_is_pending() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.skip_mining();

    let outcome = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect("purchase");
    let report = settle(outcome).await;
    assert_eq!(report.status.display, VerificationDisplay::Pending);
    assert_eq!(report.status.reason.as_deref(), Some("receipt not found yet"));
    assert_ne!(report.status.display.label(), VerificationDisplay::Warn.label());
}

#[tokio::test]
async fn test_stale_verification_does_not_overwrite_newer_cycle() {
    let mut harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.add_asset("soul-2", b"soul two");
    harness.chain.hold(tx_for("soul-1"));

    let first = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect("first purchase");
    let first_sequence = first.sequence();

    let second = harness
        .orchestrator
        .purchase("soul-2", &harness.context())
        .await
        .expect("second purchase");
    let second_sequence = second.sequence();
    assert!(second_sequence > first_sequence);

    let second_report = settle(second).await;
    assert!(second_report.applied);

    harness.chain.release(tx_for("soul-1"));
    let first_report = settle(first).await;
    assert!(!first_report.applied);
    assert_eq!(first_report.status.display, VerificationDisplay::Verified);

    let tracker = harness.orchestrator.tracker();
    assert_eq!(tracker.current(), second_sequence);
    assert_eq!(tracker.state(), PurchaseState::Verified);
    assert_eq!(
        tracker.verification().map(|v| v.sequence),
        Some(second_sequence)
    );

    let stale_events = harness
        .drain_events()
        .into_iter()
        .filter(|e| {
            matches!(e, PurchaseEvent::VerificationResolved { sequence, .. } if *sequence == first_sequence)
        })
        .count();
    assert_eq!(stale_events, 0);
}

#[tokio::test]
async fn test_free_asset_restores_during_negotiation() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-free", b"free");
    harness.market.make_free("soul-free");

    let outcome = harness
        .orchestrator
        .purchase("soul-free", &harness.context())
        .await
        .expect("restore");
    assert!(matches!(outcome, PurchaseOutcome::Restored { .. }));
    assert!(harness.signer.authorizations().is_empty());
}

#[tokio::test]
async fn test_server_error_during_negotiation_fails() {
    let harness = TestHarness::setup();
    harness.market.add_asset("soul-1", b"soul one");
    harness.market.fail_downloads_with(503);

    let err = harness
        .orchestrator
        .purchase("soul-1", &harness.context())
        .await
        .expect_err("must fail");
    assert!(matches!(err, Error::UnexpectedStatus { status: 503, .. }));
    assert!(err.user_message().contains("503"));
}
