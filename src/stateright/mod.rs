//! Stateright Model Checking for port-ingest
//!
//! Exhaustive state-space exploration of the import transaction protocol,
//! alongside the seeded simulation in `store::transaction_dst`.
//!
//! ## Available Models
//!
//! - `transaction_slot`: single-writer transaction, commit/abort visibility
//!
//! ## Running Model Checks
//!
//! ```bash
//! # Marked #[ignore] for CI speed
//! cargo test stateright -- --ignored --nocapture
//! ```

pub mod transaction_slot;
