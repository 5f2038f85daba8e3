//! Payment negotiation for soulmarket.
//!
//! This module turns a server's 402 challenge into a signed payment:
//! 1. Decode the offered requirements (header or body)
//! 2. Select one, enforcing the expected recipient before anything is signed
//! 3. Build and sign the payment payload through the wallet's signing capability
//!
//! # Architecture
//!
//! ```text
//! 402 response
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Decode offers       │
//! └─────────┬───────────┘
//!           │
//!           ▼
//! ┌─────────────────────┐     no match
//! │ Recipient check     │────────────────▶ RecipientMismatch (stop)
//! └─────────┬───────────┘
//!           │
//!           ▼
//! ┌─────────────────────┐     none
//! │ Transfer method     │────────────────▶ UnsupportedTransferMethod (stop)
//! └─────────┬───────────┘
//!           │
//!           ▼
//!     Sign + wrap payload
//! ```

mod payload;
mod selector;
mod types;

pub use payload::{
    AuthorizationRequest, PaymentPayloadBuilder, SignerError, SigningCapability,
    CLOCK_SKEW_SECS, DEFAULT_VALIDITY_SECS,
};
pub use selector::{select_requirement, PaymentRequirementSelector};
pub use types::{
    decode_header, encode_header, Eip3009Authorization, Eip3009Payload, ExactPayload,
    PaymentPayload, PaymentRequired, PaymentRequirement, Permit2Authorization, Permit2Payload,
    Permit2Witness, RequirementExtra, SettlementResponse, TokenPermissions, TransferMethod,
    PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER, PAYMENT_SIGNATURE_HEADER, PERMIT2_ADDRESS,
    X402_VERSION, X_PAYMENT_RESPONSE_HEADER,
};
