//! Independent confirmation of on-chain settlement.
//!
//! After a paid download the server hands back a settlement attestation. The
//! client re-checks it against the chain:
//!
//! ```text
//! tx reference ──▶ well-formed? ──no──▶ InvalidReference
//!                      │
//!                      ▼
//!               supported network? ──no──▶ NetworkMismatch
//!                      │
//!                      ▼
//!               receipt (cached provider per RPC URL)
//!                      │
//!        ┌─────────────┼──────────────┐
//!        ▼             ▼              ▼
//!    not found      reverted     Transfer logs
//!   (pending)                         │
//!                                     ▼
//!                       to / from / amount >= expected
//! ```

mod rpc;
mod verifier;

pub use rpc::{
    CacheStats, JsonRpcClient, ProviderCache, ReceiptLog, RpcClient, TransactionReceipt,
};
pub use verifier::{
    decode_transfer, evaluate_receipt, FieldMismatch, SettlementExpectation, SettlementFailure,
    SettlementResult, SettlementVerifier, TransferEvent, TRANSFER_EVENT_SIGNATURE,
};
