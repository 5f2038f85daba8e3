//! Chooses one payment requirement out of the server's offer list.
//!
//! The recipient check runs before anything else touches the offer: if the seller
//! the buyer expects is not among the offered recipients, selection fails and no
//! signature may be requested. Offers on a chain the client does not verify are
//! dropped next, so a foreign-chain authorization is never signed.

use crate::error::{Error, Result};
use crate::payment::types::{PaymentRequirement, TransferMethod};
use crate::wallet::{address_key, normalize_address, SupportedChain};
use alloy_primitives::Address;
use tracing::{debug, warn};

/// Selection policy: expected recipient, supported chain and preferred transfer method.
#[derive(Debug, Clone, Default)]
pub struct PaymentRequirementSelector {
    expected_seller: Option<Address>,
    preferred_method: TransferMethod,
    chain: Option<SupportedChain>,
}

impl PaymentRequirementSelector {
    /// Create a selector.
    #[must_use]
    pub fn new(expected_seller: Option<Address>, preferred_method: TransferMethod) -> Self {
        Self {
            expected_seller,
            preferred_method,
            chain: None,
        }
    }

    /// Only accept offers that settle on `chain`.
    #[must_use]
    pub fn with_chain(mut self, chain: SupportedChain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// The method this selector prefers.
    #[must_use]
    pub fn preferred_method(&self) -> TransferMethod {
        self.preferred_method
    }

    /// Pick exactly one requirement from `accepts`.
    ///
    /// The returned reference always points into `accepts`.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyOffer`] if `accepts` is empty
    /// - [`Error::RecipientMismatch`] if an expected seller is set and no offer pays it
    /// - [`Error::UnsupportedNetwork`] if a chain is set and no remaining offer settles on it
    /// - [`Error::UnsupportedTransferMethod`] if no remaining offer uses the preferred method
    pub fn select<'a>(&self, accepts: &'a [PaymentRequirement]) -> Result<&'a PaymentRequirement> {
        if accepts.is_empty() {
            return Err(Error::EmptyOffer);
        }

        let candidates: Vec<&PaymentRequirement> = match &self.expected_seller {
            Some(seller) => {
                let matching: Vec<_> = accepts
                    .iter()
                    .filter(|req| normalize_address(&req.pay_to).as_ref() == Some(seller))
                    .collect();
                if matching.is_empty() {
                    warn!(
                        "No offer pays expected seller {} ({} offers)",
                        address_key(seller),
                        accepts.len()
                    );
                    return Err(Error::RecipientMismatch {
                        expected: address_key(seller),
                        offered: accepts.iter().map(|req| req.pay_to.clone()).collect(),
                    });
                }
                matching
            }
            None => accepts.iter().collect(),
        };

        let candidates = match &self.chain {
            Some(chain) => {
                let (supported, foreign): (Vec<_>, Vec<_>) = candidates
                    .into_iter()
                    .partition(|req| chain.matches(&req.network));
                if supported.is_empty() {
                    warn!(
                        "No offer settles on {} ({} offers on other networks)",
                        chain.caip2(),
                        foreign.len()
                    );
                    return Err(Error::UnsupportedNetwork {
                        expected: chain.caip2(),
                        offered: foreign.iter().map(|req| req.network.clone()).collect(),
                    });
                }
                supported
            }
            None => candidates,
        };

        let preferred = self.preferred_method.as_str();
        if let Some(selected) = candidates
            .iter()
            .find(|req| req.transfer_method().eq_ignore_ascii_case(preferred))
        {
            debug!(
                "Selected offer: network={} amount={} method={}",
                selected.network,
                selected.amount,
                selected.transfer_method()
            );
            return Ok(*selected);
        }

        let mut available: Vec<String> = Vec::new();
        for req in &candidates {
            let method = req.transfer_method().to_ascii_lowercase();
            if !available.contains(&method) {
                available.push(method);
            }
        }

        Err(Error::UnsupportedTransferMethod {
            preferred: preferred.to_string(),
            available,
        })
    }
}

/// Free-function form of [`PaymentRequirementSelector::select`].
///
/// # Errors
///
/// See [`PaymentRequirementSelector::select`].
pub fn select_requirement<'a>(
    accepts: &'a [PaymentRequirement],
    expected_seller: Option<&Address>,
    preferred_method: TransferMethod,
) -> Result<&'a PaymentRequirement> {
    PaymentRequirementSelector::new(expected_seller.copied(), preferred_method).select(accepts)
}
