//! Purchase event system.

use crate::purchase::{PurchaseState, VerificationDisplay};
use tokio::sync::broadcast;

/// Events emitted while purchasing or restoring an asset.
///
/// Every event carries the orchestration cycle it belongs to, so listeners can
/// ignore anything older than the cycle they are displaying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseEvent {
    /// The purchase state machine moved.
    StateChanged {
        /// Orchestration cycle.
        sequence: u64,
        /// Asset being acquired.
        asset_id: String,
        /// New state.
        state: PurchaseState,
    },

    /// Settlement verification for a still-current cycle finished.
    VerificationResolved {
        /// Orchestration cycle.
        sequence: u64,
        /// Asset that was bought.
        asset_id: String,
        /// How to present the outcome.
        display: VerificationDisplay,
        /// Why it did not verify, if it did not.
        reason: Option<String>,
    },

    /// The cycle ended in failure.
    Failed {
        /// Orchestration cycle.
        sequence: u64,
        /// Asset being acquired.
        asset_id: String,
        /// Single-line message for the user.
        message: String,
    },
}

impl PurchaseEvent {
    /// Cycle the event belongs to.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            Self::StateChanged { sequence, .. }
            | Self::VerificationResolved { sequence, .. }
            | Self::Failed { sequence, .. } => *sequence,
        }
    }
}

/// Channel for receiving purchase events.
pub type PurchaseEventsChannel = broadcast::Receiver<PurchaseEvent>;

/// Sender for purchase events.
pub type PurchaseEventsSender = broadcast::Sender<PurchaseEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (PurchaseEventsSender, PurchaseEventsChannel) {
    broadcast::channel(256)
}
