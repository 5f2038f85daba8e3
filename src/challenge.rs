//! Sign-in-with-wallet challenge messages.
//!
//! The message text is parsed and re-derived by the server before it checks the
//! signature, so the field set and line order below are part of the wire format:
//!
//! ```text
//! {domain} wants you to sign in with your Ethereum account:
//! {wallet}
//!
//! Authenticate wallet ownership for {action}. No token transfer or approval.
//!
//! URI: {uri}
//! Version: 1
//! Chain ID: {chain_id}
//! Nonce: {nonce}
//! Issued At: {issued_at}
//! Expiration Time: {issued_at + 5 min}
//! Request ID: {action}:{scope}
//! Resources:
//! - urn:soulmarket:action:{action}
//! - urn:soulmarket:{scope|soul}:{id}
//! ```

use crate::error::{Error, Result};
use alloy_primitives::Address;
use chrono::{DateTime, SecondsFormat};
use sha2::{Digest, Sha256};

/// Lifetime encoded in the `Expiration Time` field.
pub const CHALLENGE_TTL_MS: i64 = 5 * 60 * 1000;

/// Hex characters kept from the nonce digest.
pub const NONCE_LENGTH: usize = 16;

/// What a challenge authorises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeScope {
    /// A named scope, e.g. `session`.
    Scope(String),
    /// A single asset, identified by its soul id.
    Soul(String),
}

impl ChallengeScope {
    /// The session scope used for re-download sessions.
    #[must_use]
    pub fn session() -> Self {
        Self::Scope("session".to_string())
    }

    fn id(&self) -> &str {
        match self {
            Self::Scope(id) | Self::Soul(id) => id,
        }
    }

    fn urn_kind(&self) -> &'static str {
        match self {
            Self::Scope(_) => "scope",
            Self::Soul(_) => "soul",
        }
    }
}

/// A rendered challenge, ready to hand to the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMessage {
    /// Exact text to sign.
    pub text: String,
    /// Milliseconds since the epoch; sent back as `X-AUTH-TIMESTAMP`.
    pub timestamp_ms: i64,
    /// Nonce embedded in the text.
    pub nonce: String,
}

/// Builds challenge messages for one site and chain.
#[derive(Debug, Clone)]
pub struct ChallengeMessageBuilder {
    domain: String,
    uri: String,
    chain_id: u64,
}

impl ChallengeMessageBuilder {
    /// Create a builder bound to a domain, URI and chain.
    #[must_use]
    pub fn new(domain: impl Into<String>, uri: impl Into<String>, chain_id: u64) -> Self {
        Self {
            domain: domain.into(),
            uri: uri.into(),
            chain_id,
        }
    }

    /// Render the challenge for `wallet` to perform `action` on `scope` at `timestamp_ms`.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamp cannot be represented as a calendar date.
    pub fn build(
        &self,
        wallet: &Address,
        scope: &ChallengeScope,
        action: &str,
        timestamp_ms: i64,
    ) -> Result<ChallengeMessage> {
        let nonce = derive_nonce(scope.id(), action, timestamp_ms);
        let issued_at = iso8601(timestamp_ms)?;
        let expires_at = iso8601(timestamp_ms.saturating_add(CHALLENGE_TTL_MS))?;

        let lines = [
            format!("{} wants you to sign in with your Ethereum account:", self.domain),
            wallet.to_checksum(None),
            String::new(),
            format!("Authenticate wallet ownership for {action}. No token transfer or approval."),
            String::new(),
            format!("URI: {}", self.uri),
            "Version: 1".to_string(),
            format!("Chain ID: {}", self.chain_id),
            format!("Nonce: {nonce}"),
            format!("Issued At: {issued_at}"),
            format!("Expiration Time: {expires_at}"),
            format!("Request ID: {action}:{}", scope.id()),
            "Resources:".to_string(),
            format!("- urn:soulmarket:action:{action}"),
            format!("- urn:soulmarket:{}:{}", scope.urn_kind(), scope.id()),
        ];

        Ok(ChallengeMessage {
            text: lines.join("\n"),
            timestamp_ms,
            nonce,
        })
    }
}

/// Nonce = first [`NONCE_LENGTH`] hex chars of `SHA-256("{id}|{action}|{timestamp_ms}")`.
#[must_use]
pub fn derive_nonce(id: &str, action: &str, timestamp_ms: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{id}|{action}|{timestamp_ms}").as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..NONCE_LENGTH].to_string()
}

fn iso8601(timestamp_ms: i64) -> Result<String> {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| Error::Protocol(format!("timestamp out of range: {timestamp_ms}")))
}
