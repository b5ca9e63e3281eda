//! Server-side storage: the committed keyed table and its single-writer
//! transaction coordinator.

mod coordinator;
mod error;
mod keyed_store;
pub mod transaction_dst;

pub use coordinator::{
    CommitSummary, CoordinatorStats, TransactionCoordinator, TransactionId, TransactionState,
    UpsertOutcome, WriteKind, WriteTransaction,
};
pub use error::StoreError;
pub use keyed_store::KeyedStore;
pub use transaction_dst::{
    run_coordinator_batch, summarize_coordinator_batch, CoordinatorDSTConfig, CoordinatorDSTHarness,
    CoordinatorDSTResult,
};
