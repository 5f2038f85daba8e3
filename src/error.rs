//! Error types for soulmarket.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating, signing, submitting or verifying a purchase.
#[derive(Error, Debug)]
pub enum Error {
    /// The server offered no payment requirements.
    #[error("server offered no payment options")]
    EmptyOffer,

    /// No offered requirement pays the expected seller.
    #[error("recipient mismatch: expected seller {expected}, offered {offered:?}")]
    RecipientMismatch {
        /// Expected seller (canonical form).
        expected: String,
        /// Recipients actually offered by the server.
        offered: Vec<String>,
    },

    /// No offered requirement uses the preferred transfer method.
    #[error("unsupported transfer method: wanted {preferred}, available {available:?}")]
    UnsupportedTransferMethod {
        /// Method the buyer asked for.
        preferred: String,
        /// Methods the server offered.
        available: Vec<String>,
    },

    /// No offered requirement settles on the chain this client verifies.
    #[error("unsupported network: expected {expected}, offered {offered:?}")]
    UnsupportedNetwork {
        /// The configured network (CAIP-2).
        expected: String,
        /// Networks the remaining offers named.
        offered: Vec<String>,
    },

    /// The wallet holder declined the signature request.
    #[error("signature rejected: {0}")]
    SigningRejected(String),

    /// The signing capability failed for a reason other than user rejection.
    #[error("signer error: {0}")]
    SigningCapability(String),

    /// A network call exceeded its timeout.
    #[error("network timeout: {0}")]
    NetworkTimeout(String),

    /// Transport level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a status this step cannot handle.
    #[error("unexpected status {status} from {context}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Which request produced it.
        context: String,
    },

    /// A paid download succeeded without a complete settlement attestation.
    #[error("missing settlement confirmation: {0}")]
    MissingSettlementConfirmation(String),

    /// Not a well-formed transaction hash.
    #[error("invalid transaction reference: {0}")]
    InvalidReference(String),

    /// Settlement was reported on a chain this client does not verify.
    #[error("network mismatch: expected {expected}, got {actual}")]
    NetworkMismatch {
        /// The network the client expected.
        expected: String,
        /// The network named by the settlement.
        actual: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Malformed protocol message.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// True for negotiation and signing failures, which abort before anything is
    /// submitted or persisted.
    #[must_use]
    pub fn aborts_without_side_effects(&self) -> bool {
        matches!(
            self,
            Self::EmptyOffer
                | Self::RecipientMismatch { .. }
                | Self::UnsupportedTransferMethod { .. }
                | Self::UnsupportedNetwork { .. }
                | Self::SigningRejected(_)
                | Self::SigningCapability(_)
        )
    }

    /// Single human-readable line for a terminal failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyOffer => "Purchase failed: the seller offered no way to pay.".to_string(),
            Self::RecipientMismatch { .. } => {
                "Purchase blocked: the payment recipient does not match the seller.".to_string()
            }
            Self::UnsupportedTransferMethod { preferred, .. } => {
                format!("Purchase failed: the seller does not accept {preferred} payments.")
            }
            Self::UnsupportedNetwork { expected, .. } => {
                format!("Purchase failed: the seller does not accept payment on {expected}.")
            }
            Self::SigningRejected(_) => {
                "Purchase cancelled: the signature request was rejected.".to_string()
            }
            Self::SigningCapability(e) => format!("Purchase failed: wallet error ({e})."),
            Self::NetworkTimeout(_) => "Purchase failed: the request timed out.".to_string(),
            Self::Network(_) => "Purchase failed: network error.".to_string(),
            Self::UnexpectedStatus { status, .. } => {
                format!("Purchase failed: server responded with status {status}.")
            }
            Self::MissingSettlementConfirmation(_) => {
                "Purchase failed: payment settlement was not confirmed.".to_string()
            }
            other => format!("Purchase failed: {other}."),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
