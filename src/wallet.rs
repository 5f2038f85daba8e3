//! EVM address and transaction reference handling.
//!
//! Every address that crosses a trust boundary (seller, `payTo`, payer, token)
//! goes through [`parse_address`] so comparisons happen on the canonical 20-byte
//! form instead of on whatever casing the server or wallet used.

use crate::error::{Error, Result};
use alloy_primitives::{Address, B256};

/// Parse an EVM address string (`0x` + 40 hex characters, any casing).
///
/// # Errors
///
/// Returns an error if the address format is invalid.
pub fn parse_address(address: &str) -> Result<Address> {
    let address = address.trim();
    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(Error::Protocol(format!(
            "invalid address format: must start with '0x', got: {address}"
        )));
    }

    if address.len() != 42 {
        return Err(Error::Protocol(format!(
            "invalid address length: expected 42 characters, got {}",
            address.len()
        )));
    }

    let bytes = hex::decode(&address[2..])
        .map_err(|e| Error::Protocol(format!("invalid address {address}: {e}")))?;

    Ok(Address::from_slice(&bytes))
}

/// Canonical form of an address, or `None` if it does not parse.
#[must_use]
pub fn normalize_address(address: &str) -> Option<Address> {
    parse_address(address).ok()
}

/// Lowercase `0x` form used in request headers and store keys.
#[must_use]
pub fn address_key(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// Parse a transaction hash (`0x` + 64 hex characters).
///
/// # Errors
///
/// Returns [`Error::InvalidReference`] if the reference is not well formed.
pub fn parse_tx_hash(reference: &str) -> Result<B256> {
    let reference = reference.trim();
    let Some(hex_part) = reference
        .strip_prefix("0x")
        .or_else(|| reference.strip_prefix("0X"))
    else {
        return Err(Error::InvalidReference(reference.to_string()));
    };

    if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidReference(reference.to_string()));
    }

    let bytes = hex::decode(hex_part).map_err(|_| Error::InvalidReference(reference.to_string()))?;
    Ok(B256::from_slice(&bytes))
}

/// The one chain this client settles and verifies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedChain {
    /// EIP-155 chain id.
    pub chain_id: u64,
}

impl SupportedChain {
    /// Create a chain descriptor.
    #[must_use]
    pub const fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    /// CAIP-2 identifier, e.g. `eip155:8453`.
    #[must_use]
    pub fn caip2(&self) -> String {
        format!("eip155:{}", self.chain_id)
    }

    /// Short network name servers sometimes use instead of CAIP-2.
    #[must_use]
    pub fn alias(&self) -> Option<&'static str> {
        match self.chain_id {
            8453 => Some("base"),
            84532 => Some("base-sepolia"),
            1 => Some("ethereum"),
            _ => None,
        }
    }

    /// Whether a network string names this chain.
    #[must_use]
    pub fn matches(&self, network: &str) -> bool {
        let network = network.trim();
        network.eq_ignore_ascii_case(&self.caip2())
            || self
                .alias()
                .is_some_and(|alias| network.eq_ignore_ascii_case(alias))
    }
}
