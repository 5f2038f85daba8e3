//! Client-side confirmation that a settlement moved the agreed funds.
//!
//! The server's settlement attestation is not taken on faith: the verifier
//! fetches the receipt itself and looks for an ERC-20 `Transfer` that pays the
//! expected recipient, from the expected payer, at least the expected amount.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::payment::PaymentPayload;
use crate::settlement::rpc::{ProviderCache, ReceiptLog, RpcClient, TransactionReceipt};
use crate::wallet::{address_key, normalize_address, parse_address, parse_tx_hash, SupportedChain};
use alloy_primitives::{keccak256, Address, B256, U256};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Canonical ERC-20 transfer event signature.
pub const TRANSFER_EVENT_SIGNATURE: &str = "Transfer(address,address,uint256)";

/// What the buyer expects the settlement to show. Unset fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettlementExpectation {
    /// Token contract whose transfers count.
    pub token: Option<Address>,
    /// Recipient.
    pub pay_to: Option<Address>,
    /// Payer.
    pub payer: Option<Address>,
    /// Minimum amount.
    pub amount: Option<U256>,
    /// Network the payment was made on.
    pub network: Option<String>,
}

impl SettlementExpectation {
    /// Derive the expectation from the payload that was actually submitted.
    ///
    /// Every field comes from the client's own record of the accepted
    /// requirement; nothing the server attests about the settlement feeds in.
    ///
    /// # Errors
    ///
    /// Returns an error if the accepted requirement carries malformed addresses.
    pub fn from_payload(payload: &PaymentPayload, payer: Address) -> Result<Self> {
        Ok(Self {
            token: Some(parse_address(&payload.accepted.asset)?),
            pay_to: Some(parse_address(&payload.accepted.pay_to)?),
            payer: Some(payer),
            amount: Some(payload.accepted.amount),
            network: Some(payload.accepted.network.clone()),
        })
    }
}

/// A decoded ERC-20 transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferEvent {
    /// Emitting token contract.
    pub token: Address,
    /// Sender.
    pub from: Address,
    /// Recipient.
    pub to: Address,
    /// Amount.
    pub amount: U256,
    /// Position of the log in the receipt.
    pub log_index: usize,
}

/// A field on which an observed transfer disagreed with the expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum FieldMismatch {
    /// Paid someone else.
    Recipient,
    /// Paid by someone else.
    Payer,
    /// Paid less than expected.
    AmountBelowExpected,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Recipient => "recipient mismatch",
            Self::Payer => "payer mismatch",
            Self::AmountBelowExpected => "amount below expected",
        })
    }
}

/// Why a verification run did not confirm the settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SettlementFailure {
    /// Not mined or not indexed yet; worth re-checking later.
    ReceiptNotFound,
    /// The transaction reverted.
    Reverted,
    /// The receipt holds no transfer from the expected token.
    NoTokenTransfer,
    /// Transfers exist but none satisfies every expected field.
    FieldMismatch(Vec<FieldMismatch>),
}

impl SettlementFailure {
    /// Soft negatives that may still turn into a confirmation.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::ReceiptNotFound)
    }
}

impl fmt::Display for SettlementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReceiptNotFound => f.write_str("receipt not found yet"),
            Self::Reverted => f.write_str("reverted"),
            Self::NoTokenTransfer => f.write_str("no transfer from the expected token"),
            Self::FieldMismatch(fields) => {
                let parts: Vec<String> = fields.iter().map(ToString::to_string).collect();
                write!(f, "no matching transfer: {}", parts.join(", "))
            }
        }
    }
}

/// Outcome of one verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementResult {
    /// True when a transfer satisfied every expected field.
    pub verified: bool,
    /// The matching transfer, or the closest candidate on failure.
    pub actual: Option<TransferEvent>,
    /// What was checked.
    pub expected: SettlementExpectation,
    /// Structured failure, `None` when verified.
    pub failure: Option<SettlementFailure>,
    /// Human-readable form of `failure`.
    pub reason: Option<String>,
}

impl SettlementResult {
    fn confirmed(actual: TransferEvent, expected: SettlementExpectation) -> Self {
        Self {
            verified: true,
            actual: Some(actual),
            expected,
            failure: None,
            reason: None,
        }
    }

    fn failed(
        failure: SettlementFailure,
        actual: Option<TransferEvent>,
        expected: SettlementExpectation,
    ) -> Self {
        Self {
            verified: false,
            actual,
            expected,
            reason: Some(failure.to_string()),
            failure: Some(failure),
        }
    }

    /// True when the only problem is that the receipt is not available yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.failure.as_ref().is_some_and(SettlementFailure::is_pending)
    }
}

/// Verifies settlements against one chain through an RPC provider.
pub struct SettlementVerifier {
    chain: SupportedChain,
    provider: Arc<dyn RpcClient>,
    timeout: Duration,
}

impl SettlementVerifier {
    /// Create a verifier.
    #[must_use]
    pub fn new(chain: SupportedChain, provider: Arc<dyn RpcClient>, timeout: Duration) -> Self {
        Self {
            chain,
            provider,
            timeout,
        }
    }

    /// Build a verifier for the configured chain, reusing the cached provider for
    /// the configured RPC URL.
    #[must_use]
    pub fn from_config(config: &ClientConfig, providers: &ProviderCache) -> Self {
        let timeout = config.rpc_timeout();
        Self::new(
            config.chain(),
            providers.provider(&config.rpc_url, timeout),
            timeout,
        )
    }

    /// The chain this verifier accepts.
    #[must_use]
    pub fn chain(&self) -> &SupportedChain {
        &self.chain
    }

    /// Verify that `tx_reference` settled `expected`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidReference`] for a malformed transaction hash (no RPC call)
    /// - [`Error::NetworkMismatch`] if `expected.network` names another chain (no RPC call)
    /// - transport errors from the RPC provider, including [`Error::NetworkTimeout`]
    pub async fn verify(
        &self,
        tx_reference: &str,
        expected: &SettlementExpectation,
    ) -> Result<SettlementResult> {
        let tx_hash = parse_tx_hash(tx_reference)?;

        if let Some(network) = expected.network.as_deref() {
            if !self.chain.matches(network) {
                return Err(Error::NetworkMismatch {
                    expected: self.chain.caip2(),
                    actual: network.to_string(),
                });
            }
        }

        let receipt = tokio::time::timeout(self.timeout, self.provider.transaction_receipt(&tx_hash))
            .await
            .map_err(|_| Error::NetworkTimeout(format!("receipt lookup for {tx_reference}")))??;

        let result = match receipt {
            None => {
                debug!("Receipt for {} not found yet", tx_reference);
                SettlementResult::failed(SettlementFailure::ReceiptNotFound, None, expected.clone())
            }
            Some(receipt) => evaluate_receipt(&receipt, expected),
        };

        if result.verified {
            info!("Settlement {} verified", tx_reference);
        } else if !result.is_pending() {
            warn!(
                "Settlement {} not verified: {}",
                tx_reference,
                result.reason.as_deref().unwrap_or("unknown")
            );
        }

        Ok(result)
    }
}

/// Check a receipt against an expectation. Pure; exposed for reuse by callers
/// that already hold a receipt.
#[must_use]
pub fn evaluate_receipt(
    receipt: &TransactionReceipt,
    expected: &SettlementExpectation,
) -> SettlementResult {
    if receipt.is_reverted() {
        return SettlementResult::failed(SettlementFailure::Reverted, None, expected.clone());
    }

    let transfers: Vec<TransferEvent> = receipt
        .logs
        .iter()
        .enumerate()
        .filter_map(|(index, log)| decode_transfer(log, index))
        .filter(|t| expected.token.map_or(true, |token| t.token == token))
        .collect();

    if transfers.is_empty() {
        return SettlementResult::failed(SettlementFailure::NoTokenTransfer, None, expected.clone());
    }

    // First satisfying transfer in log order wins.
    let mut observed: Vec<FieldMismatch> = Vec::new();
    let mut best: Option<(usize, &TransferEvent)> = None;
    for transfer in &transfers {
        let mismatches = mismatches(transfer, expected);
        if mismatches.is_empty() {
            return SettlementResult::confirmed(transfer.clone(), expected.clone());
        }
        if best.map_or(true, |(count, _)| mismatches.len() < count) {
            best = Some((mismatches.len(), transfer));
        }
        for m in mismatches {
            if !observed.contains(&m) {
                observed.push(m);
            }
        }
    }
    observed.sort();

    SettlementResult::failed(
        SettlementFailure::FieldMismatch(observed),
        best.map(|(_, t)| t.clone()),
        expected.clone(),
    )
}

fn mismatches(transfer: &TransferEvent, expected: &SettlementExpectation) -> Vec<FieldMismatch> {
    let mut out = Vec::new();
    if expected.pay_to.is_some_and(|to| transfer.to != to) {
        out.push(FieldMismatch::Recipient);
    }
    if expected.payer.is_some_and(|from| transfer.from != from) {
        out.push(FieldMismatch::Payer);
    }
    if expected.amount.is_some_and(|amount| transfer.amount < amount) {
        out.push(FieldMismatch::AmountBelowExpected);
    }
    out
}

/// Decode a log as an ERC-20 `Transfer`, or `None` if it is something else.
#[must_use]
pub fn decode_transfer(log: &ReceiptLog, log_index: usize) -> Option<TransferEvent> {
    if log.topics.len() < 3 {
        return None;
    }
    if parse_word(&log.topics[0])? != keccak256(TRANSFER_EVENT_SIGNATURE) {
        return None;
    }

    let token = normalize_address(&log.address)?;
    let from = Address::from_word(parse_word(&log.topics[1])?);
    let to = Address::from_word(parse_word(&log.topics[2])?);

    let data = hex::decode(log.data.trim().trim_start_matches("0x")).ok()?;
    if data.len() < 32 {
        return None;
    }
    let amount = U256::try_from_be_slice(&data[..32])?;

    Some(TransferEvent {
        token,
        from,
        to,
        amount,
        log_index,
    })
}

fn parse_word(hex_word: &str) -> Option<B256> {
    let bytes = hex::decode(hex_word.trim().trim_start_matches("0x")).ok()?;
    (bytes.len() == 32).then(|| B256::from_slice(&bytes))
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} ({})",
            self.amount,
            address_key(&self.from),
            address_key(&self.to),
            address_key(&self.token)
        )
    }
}
