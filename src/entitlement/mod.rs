//! Entitlements: proof that a wallet may re-obtain an asset without paying again.

mod session;
mod store;

pub use session::{
    Clock, EntitlementSessionManager, ReacquireOutcome, ReacquireState, SESSION_ACTION,
};
pub use store::{EntitlementStore, RedownloadSession};
