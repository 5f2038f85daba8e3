//! The purchase lifecycle.
//!
//! ```text
//! Idle → CheckingEntitlement ─┬─▶ Restored
//!                             └─▶ NegotiatingPayment → Signing → Submitting
//!                                        │                          │
//!                                        ▼                          ▼
//!                                      Failed ◀───────────────── Settled
//!                                                                   │
//!                                                                   ▼
//!                                                      VerifyingSettlement (async)
//!                                                          │            │
//!                                                          ▼            ▼
//!                                                       Verified       Warn
//! ```
//!
//! Content is handed back at `Settled`; verification runs in a spawned task and
//! only updates displayed state while its cycle is still the current one.

use crate::api::{AssetApi, DownloadCredentials, HttpResponse, HttpTransport};
use crate::challenge::ChallengeMessageBuilder;
use crate::config::ClientConfig;
use crate::entitlement::{EntitlementSessionManager, EntitlementStore};
use crate::error::{Error, Result};
use crate::event::{PurchaseEvent, PurchaseEventsSender};
use crate::payment::{
    encode_header, PaymentPayload, PaymentPayloadBuilder, PaymentRequirementSelector,
    SettlementResponse, SigningCapability, TransferMethod,
};
use crate::settlement::{
    ProviderCache, SettlementExpectation, SettlementResult, SettlementVerifier,
};
use crate::wallet::address_key;
use alloy_primitives::Address;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a purchase cycle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PurchaseState {
    /// Nothing started.
    #[default]
    Idle,
    /// Trying stored receipts and sessions.
    CheckingEntitlement,
    /// Delivered without payment. Terminal.
    Restored,
    /// Fetching and selecting payment terms.
    NegotiatingPayment,
    /// Waiting for the wallet to sign.
    Signing,
    /// Sending the signed payment.
    Submitting,
    /// Paid and delivered.
    Settled,
    /// Checking the settlement on chain.
    VerifyingSettlement,
    /// Settlement confirmed. Terminal.
    Verified,
    /// Settlement not confirmed; content was already delivered. Terminal.
    Warn,
    /// Purchase aborted. Terminal.
    Failed,
}

impl PurchaseState {
    /// Whether the cycle is over.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Restored | Self::Verified | Self::Warn | Self::Failed
        )
    }
}

impl fmt::Display for PurchaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a verification outcome is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationDisplay {
    /// Not confirmed yet; may still confirm.
    Pending,
    /// Confirmed on chain.
    Verified,
    /// Advisory warning. The purchase is not reversed.
    Warn,
}

impl VerificationDisplay {
    /// Classify a verification result.
    #[must_use]
    pub fn from_result(result: &SettlementResult) -> Self {
        if result.verified {
            Self::Verified
        } else if result.is_pending() {
            Self::Pending
        } else {
            Self::Warn
        }
    }

    /// Short label for a status line.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending confirmation",
            Self::Verified => "settlement verified",
            Self::Warn => "settlement warning",
        }
    }
}

/// Displayed verification status of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationStatus {
    /// Cycle the status belongs to.
    pub sequence: u64,
    /// Presentation class.
    pub display: VerificationDisplay,
    /// Reason when not verified.
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct TrackerState {
    sequence: u64,
    state: PurchaseState,
    verification: Option<VerificationStatus>,
}

/// Sequences orchestration cycles so a stale verification never overwrites the
/// state of a newer cycle.
#[derive(Debug, Default)]
pub struct VerificationTracker {
    inner: Mutex<TrackerState>,
}

impl VerificationTracker {
    /// Create a tracker at sequence 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new cycle; everything tagged with an older sequence becomes stale.
    pub fn begin_cycle(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.sequence += 1;
        inner.state = PurchaseState::Idle;
        inner.verification = None;
        inner.sequence
    }

    /// The current sequence.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.inner.lock().sequence
    }

    /// Whether `sequence` is still the current cycle.
    #[must_use]
    pub fn is_current(&self, sequence: u64) -> bool {
        self.current() == sequence
    }

    /// Displayed state of the current cycle.
    #[must_use]
    pub fn state(&self) -> PurchaseState {
        self.inner.lock().state
    }

    /// Displayed verification status of the current cycle.
    #[must_use]
    pub fn verification(&self) -> Option<VerificationStatus> {
        self.inner.lock().verification.clone()
    }

    /// Move the current cycle to `state`. Ignored for stale sequences.
    pub fn transition(&self, sequence: u64, state: PurchaseState) -> bool {
        let mut inner = self.inner.lock();
        if inner.sequence != sequence {
            return false;
        }
        inner.state = state;
        true
    }

    /// Apply a verification resolution. Ignored (returns `false`) for stale
    /// sequences.
    pub fn resolve(&self, status: VerificationStatus, state: PurchaseState) -> bool {
        let mut inner = self.inner.lock();
        if inner.sequence != status.sequence {
            return false;
        }
        inner.state = state;
        inner.verification = Some(status);
        true
    }
}

/// What a finished verification task did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    /// The resolution.
    pub status: VerificationStatus,
    /// False when the cycle had been superseded and the resolution was dropped.
    pub applied: bool,
}

/// Result of a successful orchestration cycle.
#[derive(Debug)]
pub enum PurchaseOutcome {
    /// Delivered through an existing entitlement; nothing was paid.
    Restored {
        /// Cycle sequence.
        sequence: u64,
        /// Asset content.
        content: Bytes,
    },
    /// Paid and delivered; verification runs in the background.
    Purchased {
        /// Cycle sequence.
        sequence: u64,
        /// Asset content.
        content: Bytes,
        /// The payload that was submitted.
        payload: PaymentPayload,
        /// The server's settlement attestation.
        settlement: SettlementResponse,
        /// Background verification.
        verification: JoinHandle<VerificationReport>,
    },
}

impl PurchaseOutcome {
    /// Delivered content.
    #[must_use]
    pub fn content(&self) -> &Bytes {
        match self {
            Self::Restored { content, .. } | Self::Purchased { content, .. } => content,
        }
    }

    /// Cycle sequence.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Restored { sequence, .. } | Self::Purchased { sequence, .. } => *sequence,
        }
    }
}

/// Per-purchase inputs: who buys, who signs, and the payment policy.
#[derive(Clone)]
pub struct PurchaseContext {
    /// Buyer wallet.
    pub wallet: Address,
    /// Wallet signing capability.
    pub signer: Arc<dyn SigningCapability>,
    /// Recipient every payment must go to.
    pub expected_seller: Option<Address>,
    /// Preferred transfer method.
    pub transfer_method: TransferMethod,
}

impl PurchaseContext {
    /// Context with no recipient check and the default transfer method.
    #[must_use]
    pub fn new(wallet: Address, signer: Arc<dyn SigningCapability>) -> Self {
        Self {
            wallet,
            signer,
            expected_seller: None,
            transfer_method: TransferMethod::default(),
        }
    }

    /// Require payments to go to `seller`.
    #[must_use]
    pub fn with_expected_seller(mut self, seller: Option<Address>) -> Self {
        self.expected_seller = seller;
        self
    }

    /// Prefer `method`.
    #[must_use]
    pub fn with_transfer_method(mut self, method: TransferMethod) -> Self {
        self.transfer_method = method;
        self
    }
}

/// Composes entitlement checks, payment negotiation, submission and
/// verification into one purchase.
pub struct PurchaseOrchestrator {
    api: AssetApi,
    sessions: EntitlementSessionManager,
    verifier: Arc<SettlementVerifier>,
    payloads: PaymentPayloadBuilder,
    tracker: Arc<VerificationTracker>,
    events: PurchaseEventsSender,
}

impl PurchaseOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        api: AssetApi,
        sessions: EntitlementSessionManager,
        verifier: Arc<SettlementVerifier>,
        events: PurchaseEventsSender,
    ) -> Self {
        Self {
            api,
            sessions,
            verifier,
            payloads: PaymentPayloadBuilder::new(),
            tracker: Arc::new(VerificationTracker::new()),
            events,
        }
    }

    /// Wire everything from configuration.
    #[must_use]
    pub fn from_config(
        config: &ClientConfig,
        transport: Arc<dyn HttpTransport>,
        providers: &ProviderCache,
        store: EntitlementStore,
        events: PurchaseEventsSender,
    ) -> Self {
        let api = AssetApi::new(&config.api_base_url, transport, config.request_timeout());
        let challenges =
            ChallengeMessageBuilder::new(&config.domain, &config.uri, config.chain_id);
        let sessions =
            EntitlementSessionManager::new(api.clone(), store, challenges, config.session_ttl_ms())
                .with_transfer_method(config.preferred_transfer_method);
        let verifier = Arc::new(SettlementVerifier::from_config(config, providers));
        Self::new(api, sessions, verifier, events)
    }

    /// Cycle sequencing and displayed state.
    #[must_use]
    pub fn tracker(&self) -> &Arc<VerificationTracker> {
        &self.tracker
    }

    /// Entitlement store shared with the session manager.
    #[must_use]
    pub fn store(&self) -> &EntitlementStore {
        self.sessions.store()
    }

    /// Acquire `asset_id` for `ctx.wallet`, paying only when no entitlement works.
    ///
    /// Starting a purchase supersedes any verification still running for an
    /// earlier one.
    ///
    /// # Errors
    ///
    /// Negotiation and signing errors (nothing submitted, nothing stored),
    /// [`Error::MissingSettlementConfirmation`], unexpected statuses and
    /// transport errors.
    pub async fn purchase(&self, asset_id: &str, ctx: &PurchaseContext) -> Result<PurchaseOutcome> {
        let sequence = self.tracker.begin_cycle();
        info!(
            "Purchase cycle {} for {} by {}",
            sequence,
            asset_id,
            address_key(&ctx.wallet)
        );

        match self.run(sequence, asset_id, ctx).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Purchase cycle {} failed: {}", sequence, e);
                self.enter(sequence, asset_id, PurchaseState::Failed);
                let _ = self.events.send(PurchaseEvent::Failed {
                    sequence,
                    asset_id: asset_id.to_string(),
                    message: e.user_message(),
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        sequence: u64,
        asset_id: &str,
        ctx: &PurchaseContext,
    ) -> Result<PurchaseOutcome> {
        self.enter(sequence, asset_id, PurchaseState::CheckingEntitlement);
        let reacquired = self
            .sessions
            .attempt_reacquire(asset_id, &ctx.wallet, ctx.signer.as_ref())
            .await?;
        if let Some(content) = reacquired.content.filter(|_| reacquired.ok) {
            self.enter(sequence, asset_id, PurchaseState::Restored);
            return Ok(PurchaseOutcome::Restored { sequence, content });
        }

        self.enter(sequence, asset_id, PurchaseState::NegotiatingPayment);
        let offer_credentials = DownloadCredentials {
            transfer_method: Some(ctx.transfer_method),
            ..Default::default()
        };
        let challenge = self
            .api
            .download(asset_id, &ctx.wallet, &offer_credentials)
            .await?;
        match challenge.status {
            402 => {}
            200 => {
                debug!("Server granted {} without payment", asset_id);
                let content = self.keep_receipt(asset_id, &ctx.wallet, challenge);
                self.enter(sequence, asset_id, PurchaseState::Restored);
                return Ok(PurchaseOutcome::Restored { sequence, content });
            }
            status => {
                return Err(Error::UnexpectedStatus {
                    status,
                    context: format!("payment challenge for {asset_id}"),
                })
            }
        }

        let required = challenge.payment_required()?;
        let selector = PaymentRequirementSelector::new(ctx.expected_seller, ctx.transfer_method)
            .with_chain(self.verifier.chain().clone());
        let selected = selector.select(&required.accepts)?;

        self.enter(sequence, asset_id, PurchaseState::Signing);
        let payload = self
            .payloads
            .build(selected, &ctx.wallet, ctx.signer.as_ref())
            .await?;

        self.enter(sequence, asset_id, PurchaseState::Submitting);
        let paid_credentials = DownloadCredentials {
            transfer_method: Some(ctx.transfer_method),
            payment_signature: Some(encode_header(&payload)?),
            ..Default::default()
        };
        let response = self
            .api
            .download(asset_id, &ctx.wallet, &paid_credentials)
            .await?;
        if !response.is_ok() {
            return Err(Error::UnexpectedStatus {
                status: response.status,
                context: format!("paid download of {asset_id}"),
            });
        }

        let settlement = match response.settlement() {
            Some(s) if s.is_complete() => s,
            Some(s) => {
                return Err(Error::MissingSettlementConfirmation(
                    s.error_reason
                        .unwrap_or_else(|| "incomplete settlement attestation".to_string()),
                ))
            }
            None => {
                return Err(Error::MissingSettlementConfirmation(
                    "no settlement attestation in response".to_string(),
                ))
            }
        };

        self.enter(sequence, asset_id, PurchaseState::Settled);
        let content = self.keep_receipt(asset_id, &ctx.wallet, response);
        self.sessions.store().mark_owned(&ctx.wallet, asset_id);

        let expected = SettlementExpectation::from_payload(&payload, ctx.wallet)?;
        let tx_reference = settlement.transaction.clone().unwrap_or_default();
        let conflict = settlement
            .network
            .as_deref()
            .and_then(|attested| self.network_conflict(&payload.accepted.network, attested));

        self.enter(sequence, asset_id, PurchaseState::VerifyingSettlement);
        self.tracker.resolve(
            VerificationStatus {
                sequence,
                display: VerificationDisplay::Pending,
                reason: None,
            },
            PurchaseState::VerifyingSettlement,
        );
        let verification =
            self.spawn_verification(sequence, asset_id, tx_reference, expected, conflict);

        Ok(PurchaseOutcome::Purchased {
            sequence,
            content,
            payload,
            settlement,
            verification,
        })
    }

    fn spawn_verification(
        &self,
        sequence: u64,
        asset_id: &str,
        tx_reference: String,
        expected: SettlementExpectation,
        conflict: Option<Error>,
    ) -> JoinHandle<VerificationReport> {
        let verifier = Arc::clone(&self.verifier);
        let tracker = Arc::clone(&self.tracker);
        let events = self.events.clone();
        let asset_id = asset_id.to_string();

        tokio::spawn(async move {
            let outcome = match conflict {
                Some(e) => Err(e),
                None => verifier.verify(&tx_reference, &expected).await,
            };
            let status = match outcome {
                Ok(result) => VerificationStatus {
                    sequence,
                    display: VerificationDisplay::from_result(&result),
                    reason: result.reason,
                },
                Err(e) => VerificationStatus {
                    sequence,
                    display: VerificationDisplay::Warn,
                    reason: Some(e.to_string()),
                },
            };
            let state = if status.display == VerificationDisplay::Verified {
                PurchaseState::Verified
            } else {
                PurchaseState::Warn
            };

            let applied = tracker.resolve(status.clone(), state);
            if applied {
                info!(
                    "Cycle {} verification: {}",
                    sequence,
                    status.display.label()
                );
                let _ = events.send(PurchaseEvent::StateChanged {
                    sequence,
                    asset_id: asset_id.clone(),
                    state,
                });
                let _ = events.send(PurchaseEvent::VerificationResolved {
                    sequence,
                    asset_id,
                    display: status.display,
                    reason: status.reason.clone(),
                });
            } else {
                debug!("Dropping stale verification for cycle {}", sequence);
            }

            VerificationReport { status, applied }
        })
    }

    /// A settlement attested on a different network than the one paid on.
    fn network_conflict(&self, accepted: &str, attested: &str) -> Option<Error> {
        let chain = self.verifier.chain();
        let same = attested.trim().eq_ignore_ascii_case(accepted.trim())
            || (chain.matches(attested) && chain.matches(accepted));
        if same {
            return None;
        }
        warn!(
            "Settlement attested on {} but payment was made on {}",
            attested, accepted
        );
        Some(Error::NetworkMismatch {
            expected: accepted.to_string(),
            actual: attested.to_string(),
        })
    }

    fn keep_receipt(&self, asset_id: &str, wallet: &Address, response: HttpResponse) -> Bytes {
        if let Some(receipt) = response.rotated_receipt() {
            self.sessions.store().store_receipt(wallet, asset_id, receipt);
        }
        response.body
    }

    fn enter(&self, sequence: u64, asset_id: &str, state: PurchaseState) {
        if self.tracker.transition(sequence, state) {
            debug!("Cycle {} -> {}", sequence, state);
            let _ = self.events.send(PurchaseEvent::StateChanged {
                sequence,
                asset_id: asset_id.to_string(),
                state,
            });
        }
    }
}
