//! # soulmarket
//!
//! Buyer-side purchase and entitlement core for a pay-per-request marketplace.
//!
//! A purchase runs the HTTP 402 handshake: the server answers a download with the
//! payment terms it accepts, the buyer selects one and signs a transfer
//! authorization, and the retried download returns the asset together with a
//! settlement attestation. The buyer then checks that settlement on chain
//! itself.
//!
//! Buyers who already paid skip all of that: a stored receipt, or a short-lived
//! session obtained by signing a challenge, re-opens the asset.
//!
//! ## Architecture
//!
//! - [`challenge`]: sign-in-with-wallet style challenge messages
//! - [`payment`]: requirement selection and payload signing
//! - [`settlement`]: independent on-chain verification
//! - [`entitlement`]: receipts, sessions and the re-access state machine
//! - [`purchase`]: the orchestrating state machine
//!
//! Wallet signing and blockchain RPC are traits ([`SigningCapability`],
//! [`RpcClient`]) so the core runs against any wallet or provider.
//!
//! ## Example
//!
//! ```rust,no_run
//! use soulmarket::{
//!     create_event_channel, ClientConfig, EntitlementStore, ProviderCache, PurchaseContext,
//!     PurchaseOrchestrator, ReqwestTransport, SigningCapability,
//! };
//! use std::sync::Arc;
//!
//! async fn buy(
//!     signer: Arc<dyn SigningCapability>,
//!     wallet: alloy_primitives::Address,
//! ) -> soulmarket::Result<()> {
//!     let config = ClientConfig::default();
//!     let (events, _rx) = create_event_channel();
//!     let orchestrator = PurchaseOrchestrator::from_config(
//!         &config,
//!         Arc::new(ReqwestTransport::new()),
//!         &ProviderCache::new(),
//!         EntitlementStore::with_persistence(&config.entitlements_path()),
//!         events,
//!     );
//!     let ctx = PurchaseContext::new(wallet, signer)
//!         .with_expected_seller(config.expected_seller_address());
//!     let outcome = orchestrator.purchase("soul-42", &ctx).await?;
//!     println!("{} bytes", outcome.content().len());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod challenge;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod event;
pub mod payment;
pub mod purchase;
pub mod settlement;
pub mod wallet;

pub use api::{AssetApi, DownloadCredentials, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use challenge::{ChallengeMessage, ChallengeMessageBuilder, ChallengeScope};
pub use config::ClientConfig;
pub use entitlement::{
    EntitlementSessionManager, EntitlementStore, ReacquireOutcome, ReacquireState,
    RedownloadSession,
};
pub use error::{Error, Result};
pub use event::{create_event_channel, PurchaseEvent, PurchaseEventsChannel, PurchaseEventsSender};
pub use payment::{
    PaymentPayload, PaymentPayloadBuilder, PaymentRequired, PaymentRequirement,
    PaymentRequirementSelector, SettlementResponse, SignerError, SigningCapability,
    TransferMethod,
};
pub use purchase::{
    PurchaseContext, PurchaseOrchestrator, PurchaseOutcome, PurchaseState, VerificationDisplay,
    VerificationReport, VerificationStatus, VerificationTracker,
};
pub use settlement::{
    ProviderCache, RpcClient, SettlementExpectation, SettlementFailure, SettlementResult,
    SettlementVerifier, TransferEvent,
};
pub use wallet::SupportedChain;
