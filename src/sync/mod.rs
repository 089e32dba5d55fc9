//! Saved-deal queue and its reconciliation with the server.

mod orchestrator;
mod saved;

pub use orchestrator::{SkipReason, SyncOrchestrator, SyncOutcome, SyncReport};
pub use saved::{PendingDeletion, SavedDealRecord, SavedDeals};
