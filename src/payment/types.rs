//! Wire types for the HTTP 402 payment exchange.
//!
//! Structures travel as base64-encoded JSON in headers (`PAYMENT-REQUIRED`,
//! `PAYMENT-SIGNATURE`, `PAYMENT-RESPONSE`) or as plain JSON bodies.

use crate::error::{Error, Result};
use alloy_primitives::{Address, U256};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Protocol version written into every payload.
pub const X402_VERSION: u8 = 2;

/// HTTP header for payment requirements (server → client).
pub const PAYMENT_REQUIRED_HEADER: &str = "PAYMENT-REQUIRED";

/// HTTP header for the signed payment payload (client → server).
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";

/// HTTP header for settlement results (server → client).
pub const PAYMENT_RESPONSE_HEADER: &str = "PAYMENT-RESPONSE";

/// Legacy header for settlement results.
pub const X_PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// Canonical Permit2 contract, used as spender when the offer names none.
pub const PERMIT2_ADDRESS: &str = "0x000000000022D473030F116dDEE9F6B43aC78BA3";

/// How the buyer authorises the token transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    /// ERC-3009 `transferWithAuthorization`.
    #[default]
    Eip3009,
    /// Uniswap Permit2 signature transfer.
    Permit2,
}

impl TransferMethod {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eip3009 => "eip3009",
            Self::Permit2 => "permit2",
        }
    }
}

impl fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eip3009" => Ok(Self::Eip3009),
            "permit2" => Ok(Self::Permit2),
            other => Err(Error::Config(format!("unknown transfer method: {other}"))),
        }
    }
}

/// Serde helper: integers carried as decimal strings (numbers are accepted on input).
pub(crate) mod decimal {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    pub fn serialize<T: Display, S: Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(d: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
        }

        let raw = match Raw::deserialize(d)? {
            Raw::Str(s) => s,
            Raw::Num(n) => n.to_string(),
        };
        raw.trim().parse().map_err(de::Error::custom)
    }
}

/// Optional extra fields attached to a requirement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementExtra {
    /// EIP-712 domain name of the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// EIP-712 domain version of the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Transfer method; absent means `eip3009`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_method: Option<String>,
    /// Permit2 spender (proxy) when not the canonical contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spender: Option<String>,
}

/// One acceptable way to pay for a resource, as offered by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    /// Payment scheme, e.g. `exact`.
    pub scheme: String,
    /// Chain identifier, e.g. `eip155:8453`.
    pub network: String,
    /// Amount in the token's smallest unit.
    #[serde(with = "decimal", alias = "maxAmountRequired")]
    pub amount: U256,
    /// Token contract.
    pub asset: String,
    /// Recipient address.
    pub pay_to: String,
    /// Validity window the server accepts for the authorization.
    #[serde(default)]
    pub max_timeout_seconds: u64,
    /// Extra scheme data.
    #[serde(default)]
    pub extra: RequirementExtra,
}

impl PaymentRequirement {
    /// Transfer method named by the offer (`eip3009` when unspecified).
    #[must_use]
    pub fn transfer_method(&self) -> &str {
        self.extra
            .transfer_method
            .as_deref()
            .unwrap_or(TransferMethod::Eip3009.as_str())
    }
}

/// Body (or decoded `PAYMENT-REQUIRED` header) of a 402 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version used by the server.
    #[serde(default)]
    pub x402_version: u8,
    /// Human-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Offered requirements, in server preference order.
    #[serde(default)]
    pub accepts: Vec<PaymentRequirement>,
}

/// ERC-3009 authorization fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip3009Authorization {
    /// Payer.
    pub from: Address,
    /// Recipient.
    pub to: Address,
    /// Amount.
    #[serde(with = "decimal")]
    pub value: U256,
    /// Unix seconds after which the authorization is valid.
    #[serde(with = "decimal")]
    pub valid_after: u64,
    /// Unix seconds before which the authorization is valid.
    #[serde(with = "decimal")]
    pub valid_before: u64,
    /// 32-byte random nonce, hex.
    pub nonce: String,
}

/// Signed ERC-3009 payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eip3009Payload {
    /// Authorization that was signed.
    pub authorization: Eip3009Authorization,
    /// Signature over the EIP-712 typed data.
    pub signature: String,
}

/// Token and amount a Permit2 signature covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPermissions {
    /// Token contract.
    pub token: Address,
    /// Amount.
    #[serde(with = "decimal")]
    pub amount: U256,
}

/// Witness binding the Permit2 transfer to its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permit2Witness {
    /// Recipient.
    pub to: Address,
    /// Unix seconds after which the transfer is valid.
    #[serde(with = "decimal")]
    pub valid_after: u64,
}

/// Permit2 authorization fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permit2Authorization {
    /// Payer.
    pub from: Address,
    /// Token permissions.
    pub permitted: TokenPermissions,
    /// Contract allowed to pull the funds.
    pub spender: Address,
    /// Permit2 nonce (decimal).
    #[serde(with = "decimal")]
    pub nonce: U256,
    /// Unix seconds deadline.
    #[serde(with = "decimal")]
    pub deadline: u64,
    /// Recipient witness.
    pub witness: Permit2Witness,
}

/// Signed Permit2 payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permit2Payload {
    /// Authorization that was signed.
    pub permit2_authorization: Permit2Authorization,
    /// Signature over the EIP-712 typed data.
    pub signature: String,
}

/// Scheme-specific signed data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExactPayload {
    /// ERC-3009 authorization.
    Eip3009(Eip3009Payload),
    /// Permit2 authorization.
    Permit2(Permit2Payload),
}

impl ExactPayload {
    /// Signature carried by the payload.
    #[must_use]
    pub fn signature(&self) -> &str {
        match self {
            Self::Eip3009(p) => &p.signature,
            Self::Permit2(p) => &p.signature,
        }
    }
}

/// Signed payment sent in the `PAYMENT-SIGNATURE` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Protocol version.
    pub x402_version: u8,
    /// The requirement this payload pays.
    pub accepted: PaymentRequirement,
    /// Signed authorization.
    pub payload: ExactPayload,
}

/// Settlement attestation returned with a paid download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    /// Whether the server reports the settlement as successful.
    #[serde(default)]
    pub success: bool,
    /// Settlement transaction hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// Network the settlement happened on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Payer as seen by the settling party.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    /// Failure reason, when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl SettlementResponse {
    /// A confirmation counts only when it succeeded and names both transaction and network.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.success
            && self.transaction.as_deref().is_some_and(|t| !t.trim().is_empty())
            && self.network.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

/// Encode a value as base64 JSON for a header.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode_header<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    Ok(BASE64.encode(json))
}

/// Decode a base64 JSON header value.
///
/// # Errors
///
/// Returns an error if the value is not base64 or not the expected JSON.
pub fn decode_header<T: DeserializeOwned>(value: &str) -> Result<T> {
    let json = BASE64
        .decode(value.trim())
        .map_err(|e| Error::Protocol(format!("invalid base64 header: {e}")))?;
    Ok(serde_json::from_slice(&json)?)
}
