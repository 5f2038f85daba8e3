//! Turns a selected requirement into a signed [`PaymentPayload`].
//!
//! Typed-data construction and signing belong to the wallet behind
//! [`SigningCapability`]; this module only assembles the authorization fields
//! from the selected requirement and wraps the signature.

use crate::error::{Error, Result};
use crate::payment::types::{
    Eip3009Authorization, Eip3009Payload, ExactPayload, PaymentPayload, PaymentRequirement,
    Permit2Authorization, Permit2Payload, Permit2Witness, TokenPermissions, TransferMethod,
    PERMIT2_ADDRESS, X402_VERSION,
};
use crate::wallet::{address_key, parse_address};
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use tracing::{debug, info};

/// Validity window used when the offer does not state one.
pub const DEFAULT_VALIDITY_SECS: u64 = 300;

/// Backdating applied to `validAfter` to tolerate clock skew.
pub const CLOCK_SKEW_SECS: u64 = 600;

/// Failure reported by a wallet signer.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// The user declined the prompt.
    #[error("rejected by user: {0}")]
    Rejected(String),
    /// Anything else (locked wallet, unsupported method, transport).
    #[error("{0}")]
    Failed(String),
}

impl From<SignerError> for Error {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::Rejected(msg) => Self::SigningRejected(msg),
            SignerError::Failed(msg) => Self::SigningCapability(msg),
        }
    }
}

/// Unsigned authorization handed to the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// Which typed-data shape to sign.
    pub method: TransferMethod,
    /// Network of the requirement.
    pub network: String,
    /// Token contract.
    pub token: Address,
    /// EIP-712 domain name of the token.
    pub token_name: Option<String>,
    /// EIP-712 domain version of the token.
    pub token_version: Option<String>,
    /// Payer (the buyer's wallet).
    pub from: Address,
    /// Recipient.
    pub to: Address,
    /// Amount in smallest units.
    pub value: U256,
    /// Unix seconds.
    pub valid_after: u64,
    /// Unix seconds.
    pub valid_before: u64,
    /// Random 32-byte nonce.
    pub nonce: B256,
    /// Permit2 spender; `None` for ERC-3009.
    pub spender: Option<Address>,
}

/// Wallet signing capability.
///
/// Either call may suspend on a user prompt for as long as the wallet UI allows.
#[async_trait]
pub trait SigningCapability: Send + Sync {
    /// Sign a plain-text message (`personal_sign`) with `wallet`.
    async fn sign_message(
        &self,
        wallet: &Address,
        message: &str,
    ) -> std::result::Result<String, SignerError>;

    /// Sign the typed data for a transfer authorization.
    async fn sign_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> std::result::Result<String, SignerError>;
}

/// Builds payment payloads.
#[derive(Debug, Clone, Default)]
pub struct PaymentPayloadBuilder;

impl PaymentPayloadBuilder {
    /// Create a builder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build a payload for `selected`, signed by `wallet` through `signer`.
    ///
    /// # Errors
    ///
    /// Signer rejections and failures are returned as-is; malformed offers fail
    /// before the signer is invoked.
    pub async fn build(
        &self,
        selected: &PaymentRequirement,
        wallet: &Address,
        signer: &dyn SigningCapability,
    ) -> Result<PaymentPayload> {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        let nonce = B256::from(rand::random::<[u8; 32]>());
        self.build_at(selected, wallet, signer, now, nonce).await
    }

    /// Same as [`build`](Self::build) with an explicit clock and nonce.
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub async fn build_at(
        &self,
        selected: &PaymentRequirement,
        wallet: &Address,
        signer: &dyn SigningCapability,
        now_secs: u64,
        nonce: B256,
    ) -> Result<PaymentPayload> {
        let request = authorization_request(selected, wallet, now_secs, nonce)?;

        debug!(
            "Requesting {} signature: from={} to={} value={}",
            request.method,
            address_key(&request.from),
            address_key(&request.to),
            request.value
        );
        let signature = signer.sign_authorization(&request).await?;

        let payload = match request.method {
            TransferMethod::Eip3009 => ExactPayload::Eip3009(Eip3009Payload {
                authorization: Eip3009Authorization {
                    from: request.from,
                    to: request.to,
                    value: request.value,
                    valid_after: request.valid_after,
                    valid_before: request.valid_before,
                    nonce: format!("0x{}", hex::encode(request.nonce.as_slice())),
                },
                signature,
            }),
            TransferMethod::Permit2 => ExactPayload::Permit2(Permit2Payload {
                permit2_authorization: Permit2Authorization {
                    from: request.from,
                    permitted: TokenPermissions {
                        token: request.token,
                        amount: request.value,
                    },
                    spender: request.spender.unwrap_or(request.to),
                    nonce: U256::from_be_bytes(request.nonce.0),
                    deadline: request.valid_before,
                    witness: Permit2Witness {
                        to: request.to,
                        valid_after: request.valid_after,
                    },
                },
                signature,
            }),
        };

        info!(
            "Payment payload signed for {} on {}",
            address_key(&request.to),
            selected.network
        );

        Ok(PaymentPayload {
            x402_version: X402_VERSION,
            accepted: selected.clone(),
            payload,
        })
    }
}

/// Assemble the unsigned fields. Amount and recipient are copied verbatim.
fn authorization_request(
    selected: &PaymentRequirement,
    wallet: &Address,
    now_secs: u64,
    nonce: B256,
) -> Result<AuthorizationRequest> {
    let method = selected
        .transfer_method()
        .parse::<TransferMethod>()
        .map_err(|_| Error::UnsupportedTransferMethod {
            preferred: selected.transfer_method().to_string(),
            available: vec![
                TransferMethod::Eip3009.to_string(),
                TransferMethod::Permit2.to_string(),
            ],
        })?;

    let token = parse_address(&selected.asset)?;
    let to = parse_address(&selected.pay_to)?;

    let spender = match method {
        TransferMethod::Eip3009 => None,
        TransferMethod::Permit2 => Some(parse_address(
            selected.extra.spender.as_deref().unwrap_or(PERMIT2_ADDRESS),
        )?),
    };

    let window = if selected.max_timeout_seconds == 0 {
        DEFAULT_VALIDITY_SECS
    } else {
        selected.max_timeout_seconds
    };

    Ok(AuthorizationRequest {
        method,
        network: selected.network.clone(),
        token,
        token_name: selected.extra.name.clone(),
        token_version: selected.extra.version.clone(),
        from: *wallet,
        to,
        value: selected.amount,
        valid_after: now_secs.saturating_sub(CLOCK_SKEW_SECS),
        valid_before: now_secs.saturating_add(window),
        nonce,
        spender,
    })
}
