//! Two-tier re-access for assets the wallet already holds proof for.
//!
//! A re-acquisition walks a small state machine:
//!
//! ```text
//! NoProof ──────────────────────────────────────────▶ requires payment
//!                                                     (no network call)
//! PassiveAttempt ── 200 ───────────────────────────▶ delivered
//!       │ 401/402
//!       ▼
//! ChallengeRequired ── sign, exchange, retry once ─▶ delivered
//!       │ 401/402
//!       ▼
//! Exhausted ───────────────────────────────────────▶ requires payment
//! ```
//!
//! Any other status is a hard failure and is not retried.

use crate::api::{AssetApi, DownloadCredentials, HttpResponse};
use crate::challenge::{ChallengeMessageBuilder, ChallengeScope};
use crate::entitlement::store::{EntitlementStore, RedownloadSession};
use crate::error::{Error, Result};
use crate::payment::{SigningCapability, TransferMethod};
use crate::wallet::address_key;
use alloy_primitives::Address;
use bytes::Bytes;
use tracing::{debug, info, warn};

/// Action and scope used for re-download session challenges.
pub const SESSION_ACTION: &str = "session";

/// Milliseconds since the epoch.
pub type Clock = fn() -> i64;

fn system_clock() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Where a re-acquisition attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReacquireState {
    /// Neither a receipt nor creator access is known.
    NoProof,
    /// Retrying with stored proof and no fresh signature.
    PassiveAttempt,
    /// A signed session is being obtained for one retry.
    ChallengeRequired,
    /// The retry was rejected too; payment is needed.
    Exhausted,
}

/// Result of [`EntitlementSessionManager::attempt_reacquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReacquireOutcome {
    /// Content was delivered.
    pub ok: bool,
    /// The caller must fall back to payment negotiation.
    pub requires_payment: bool,
    /// Delivered content when `ok`.
    pub content: Option<Bytes>,
    /// State the attempt ended in.
    pub final_state: ReacquireState,
}

impl ReacquireOutcome {
    fn delivered(content: Bytes, final_state: ReacquireState) -> Self {
        Self {
            ok: true,
            requires_payment: false,
            content: Some(content),
            final_state,
        }
    }

    fn payment_required(final_state: ReacquireState) -> Self {
        Self {
            ok: false,
            requires_payment: true,
            content: None,
            final_state,
        }
    }
}

/// Drives passive retries and signed-session escalation.
#[derive(Clone)]
pub struct EntitlementSessionManager {
    api: AssetApi,
    store: EntitlementStore,
    challenges: ChallengeMessageBuilder,
    session_ttl_ms: i64,
    transfer_method: Option<TransferMethod>,
    clock: Clock,
}

impl EntitlementSessionManager {
    /// Create a manager.
    ///
    /// `session_ttl_ms` is the lifetime assumed when the session endpoint does
    /// not report an expiry.
    #[must_use]
    pub fn new(
        api: AssetApi,
        store: EntitlementStore,
        challenges: ChallengeMessageBuilder,
        session_ttl_ms: i64,
    ) -> Self {
        Self {
            api,
            store,
            challenges,
            session_ttl_ms,
            transfer_method: None,
            clock: system_clock,
        }
    }

    /// Forward a preferred transfer method on download requests.
    #[must_use]
    pub fn with_transfer_method(mut self, method: TransferMethod) -> Self {
        self.transfer_method = Some(method);
        self
    }

    /// Replace the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The store this manager reads and writes.
    #[must_use]
    pub fn store(&self) -> &EntitlementStore {
        &self.store
    }

    /// A valid re-download session for `wallet`: the cached one while it has
    /// not expired, otherwise a fresh one from a signed challenge.
    ///
    /// # Errors
    ///
    /// Signing failures, session endpoint rejections and transport errors.
    pub async fn ensure_session(
        &self,
        wallet: &Address,
        signer: &dyn SigningCapability,
    ) -> Result<RedownloadSession> {
        let now = (self.clock)();
        if let Some(session) = self.store.session(wallet, now) {
            debug!("Reusing session for {}", address_key(wallet));
            return Ok(session);
        }

        let challenge = self.challenges.build(
            wallet,
            &ChallengeScope::session(),
            SESSION_ACTION,
            now,
        )?;
        let signature = signer.sign_message(wallet, &challenge.text).await?;
        let session = self
            .api
            .exchange_session(
                wallet,
                &signature,
                challenge.timestamp_ms,
                now,
                self.session_ttl_ms,
            )
            .await?;

        info!(
            "New re-download session for {} (expires at {})",
            address_key(wallet),
            session.expires_at_ms
        );
        self.store.store_session(wallet, session.clone());
        Ok(session)
    }

    /// Try to re-obtain `asset_id` without paying.
    ///
    /// # Errors
    ///
    /// Hard failures: statuses other than 200/401/402, signing failures, and
    /// transport errors.
    pub async fn attempt_reacquire(
        &self,
        asset_id: &str,
        wallet: &Address,
        signer: &dyn SigningCapability,
    ) -> Result<ReacquireOutcome> {
        let receipt = self.store.receipt(wallet, asset_id);
        if receipt.is_none() && !self.store.is_creator(wallet, asset_id) {
            debug!("No proof for {} under {}", asset_id, address_key(wallet));
            return Ok(ReacquireOutcome::payment_required(ReacquireState::NoProof));
        }

        let cached = self.store.session(wallet, (self.clock)());
        let mut credentials = DownloadCredentials {
            receipt,
            session: cached.as_ref().map(|s| s.token.clone()),
            transfer_method: self.transfer_method,
            payment_signature: None,
        };

        let passive = self.api.download(asset_id, wallet, &credentials).await?;
        if passive.is_ok() {
            return Ok(self.deliver(asset_id, wallet, passive, ReacquireState::PassiveAttempt));
        }
        if !passive.requires_auth_or_payment() {
            return Err(Error::UnexpectedStatus {
                status: passive.status,
                context: format!("download {asset_id}"),
            });
        }

        debug!(
            "Passive download of {} rejected with {}; signing a session challenge",
            asset_id, passive.status
        );
        if cached.is_some() {
            self.store.clear_session(wallet);
        }
        let session = self.ensure_session(wallet, signer).await?;
        credentials.session = Some(session.token);

        let retry = self.api.download(asset_id, wallet, &credentials).await?;
        if retry.is_ok() {
            return Ok(self.deliver(asset_id, wallet, retry, ReacquireState::ChallengeRequired));
        }
        if retry.requires_auth_or_payment() {
            warn!(
                "Signed session rejected for {} ({}); payment required",
                asset_id, retry.status
            );
            self.store.clear_session(wallet);
            return Ok(ReacquireOutcome::payment_required(ReacquireState::Exhausted));
        }
        Err(Error::UnexpectedStatus {
            status: retry.status,
            context: format!("download {asset_id}"),
        })
    }

    fn deliver(
        &self,
        asset_id: &str,
        wallet: &Address,
        response: HttpResponse,
        state: ReacquireState,
    ) -> ReacquireOutcome {
        if let Some(rotated) = response.rotated_receipt() {
            self.store.store_receipt(wallet, asset_id, rotated);
        }
        info!("Re-acquired {} for {}", asset_id, address_key(wallet));
        ReacquireOutcome::delivered(response.body, state)
    }
}
