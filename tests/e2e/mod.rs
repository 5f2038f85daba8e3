//! E2E tests for the soulmarket purchase core.
//!
//! Everything runs in-process against scripted collaborators: a fake
//! marketplace behind the HTTP transport, a fake chain behind the RPC client,
//! and a fake wallet behind the signing capability.
//!
//! ## Architecture
//!
//! ```text
//! TestHarness
//!     ├── PurchaseOrchestrator (built from ClientConfig)
//!     ├── FakeMarket  (download + session endpoints)
//!     ├── FakeChain   (receipts, mined on paid download)
//!     └── FakeSigner  (records prompts, can reject)
//! ```

mod harness;

#[cfg(test)]
mod purchase_flow;

#[cfg(test)]
mod reacquire;

pub use harness::{FakeChain, FakeMarket, FakeSigner, SettlementMode, TestHarness};
