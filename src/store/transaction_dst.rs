//! Deterministic Simulation Testing for the Transaction Coordinator
//!
//! Shadow-state harness for import transaction semantics:
//! - single writer (a second start fails while one is open)
//! - commit publishes every valid write, abort publishes nothing
//! - a transaction reads its own writes, outsiders only see committed rows
//! - operations without a transaction fail and change nothing
//! - cancellation before commit leaves the committed table untouched
//!
//! ## Design
//!
//! Each scenario drives the real [`TransactionCoordinator`] and a plain
//! `BTreeMap` model side by side, then compares the committed table against
//! the model. Scenario choice and record contents come from a seeded RNG, so
//! every failure reproduces from its seed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! for seed in 0..100 {
//!     let mut harness = CoordinatorDSTHarness::with_seed(seed);
//!     harness.run(200);
//!     assert!(harness.result().is_success(), "Seed {} failed", seed);
//! }
//! ```

use super::coordinator::{TransactionCoordinator, WriteKind, WriteTransaction};
use super::error::StoreError;
use crate::domain::{Coordinates, Record, RecordFields};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Simulated RNG - deterministic based on seed
struct SimulatedRng {
    inner: ChaCha8Rng,
}

impl SimulatedRng {
    fn new(seed: u64) -> Self {
        SimulatedRng {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        self.inner.gen_range(min..max)
    }

    fn gen_bool(&mut self, probability: f64) -> bool {
        self.inner.gen_bool(probability.clamp(0.0, 1.0))
    }
}

/// Configuration for Coordinator DST
#[derive(Debug, Clone)]
pub struct CoordinatorDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Number of distinct record ids
    pub num_keys: usize,
    /// Upper bound on upserts per transaction
    pub max_batch: usize,
    /// Probability a generated record has an empty name
    pub invalid_prob: f64,
    /// Probability of the abort scenario
    pub abort_prob: f64,
    /// Probability of a misuse scenario (no transaction, double start)
    pub misuse_prob: f64,
    /// Probability of a cancellation scenario
    pub cancel_prob: f64,
}

impl Default for CoordinatorDSTConfig {
    fn default() -> Self {
        CoordinatorDSTConfig {
            seed: 0,
            num_keys: 20,
            max_batch: 8,
            invalid_prob: 0.1,
            abort_prob: 0.2,
            misuse_prob: 0.1,
            cancel_prob: 0.1,
        }
    }
}

impl CoordinatorDSTConfig {
    pub fn new(seed: u64) -> Self {
        CoordinatorDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Few keys, large batches: mostly replaces
    pub fn high_overlap(seed: u64) -> Self {
        CoordinatorDSTConfig {
            seed,
            num_keys: 4,
            max_batch: 16,
            ..Default::default()
        }
    }

    pub fn fault_heavy(seed: u64) -> Self {
        CoordinatorDSTConfig {
            seed,
            invalid_prob: 0.3,
            abort_prob: 0.3,
            misuse_prob: 0.2,
            cancel_prob: 0.2,
            ..Default::default()
        }
    }
}

/// Scenario description for logging
#[derive(Debug, Clone)]
pub enum CoordinatorOp {
    Commit(String),
    Abort(String),
    DoubleStart(String),
    NoTransaction(String),
    CancelledWrite(String),
    CancelledCommit(String),
}

/// Result of a Coordinator DST run
#[derive(Debug, Clone)]
pub struct CoordinatorDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub commits: u64,
    pub aborts: u64,
    pub double_starts: u64,
    pub no_transaction: u64,
    pub cancelled_writes: u64,
    pub cancelled_commits: u64,
    pub rejected_records: u64,
    pub invariant_violations: Vec<String>,
    pub last_op: Option<CoordinatorOp>,
}

impl CoordinatorDSTResult {
    pub fn new(seed: u64) -> Self {
        CoordinatorDSTResult {
            seed,
            total_operations: 0,
            commits: 0,
            aborts: 0,
            double_starts: 0,
            no_transaction: 0,
            cancelled_writes: 0,
            cancelled_commits: 0,
            rejected_records: 0,
            invariant_violations: Vec::new(),
            last_op: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops (commit:{}, abort:{}, double_start:{}, no_txn:{}, cancel_write:{}, cancel_commit:{}, rejected:{}), {} violations",
            self.seed,
            self.total_operations,
            self.commits,
            self.aborts,
            self.double_starts,
            self.no_transaction,
            self.cancelled_writes,
            self.cancelled_commits,
            self.rejected_records,
            self.invariant_violations.len()
        )
    }
}

/// DST harness for the transaction coordinator
pub struct CoordinatorDSTHarness {
    config: CoordinatorDSTConfig,
    rng: SimulatedRng,
    coordinator: Arc<TransactionCoordinator>,
    /// Committed rows as they should be
    model: BTreeMap<String, RecordFields>,
    live: CancellationToken,
    result: CoordinatorDSTResult,
}

impl CoordinatorDSTHarness {
    pub fn new(config: CoordinatorDSTConfig) -> Self {
        let rng = SimulatedRng::new(config.seed);
        CoordinatorDSTHarness {
            result: CoordinatorDSTResult::new(config.seed),
            config,
            rng,
            coordinator: Arc::new(TransactionCoordinator::new()),
            model: BTreeMap::new(),
            live: CancellationToken::new(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(CoordinatorDSTConfig::new(seed))
    }

    fn random_record(&mut self) -> Record {
        let key = self.rng.gen_range(0, self.config.num_keys as u64);
        let mut fields = if self.rng.gen_bool(self.config.invalid_prob) {
            RecordFields::default()
        } else {
            RecordFields::named(format!("Port {}", self.rng.gen_range(0, 1000)))
        };
        if self.rng.gen_bool(0.5) {
            fields.city = Some(format!("City {}", self.rng.gen_range(0, 50)));
        }
        if self.rng.gen_bool(0.3) {
            let lon = self.rng.gen_range(0, 360) as f64 - 180.0;
            let lat = self.rng.gen_range(0, 180) as f64 - 90.0;
            fields.coordinates = Some(Coordinates::new(lon, lat));
        }
        Record::new(format!("port:{}", key), fields)
    }

    fn random_batch(&mut self) -> Vec<Record> {
        let len = self.rng.gen_range(1, self.config.max_batch as u64 + 1);
        (0..len).map(|_| self.random_record()).collect()
    }

    // =========================================================================
    // Scenario Runners
    // =========================================================================

    fn run_single_op(&mut self) {
        let roll = self.rng.gen_range(0, 100);

        let misuse_threshold = (self.config.misuse_prob * 100.0) as u64;
        let cancel_threshold = misuse_threshold + (self.config.cancel_prob * 100.0) as u64;
        let abort_threshold = cancel_threshold + (self.config.abort_prob * 100.0) as u64;

        if roll < misuse_threshold {
            if self.rng.gen_bool(0.5) {
                self.run_double_start_scenario();
            } else {
                self.run_no_transaction_scenario();
            }
        } else if roll < cancel_threshold {
            if self.rng.gen_bool(0.5) {
                self.run_cancelled_write_scenario();
            } else {
                self.run_cancelled_commit_scenario();
            }
        } else if roll < abort_threshold {
            self.run_abort_scenario();
        } else {
            self.run_commit_scenario();
        }

        self.check_committed();
    }

    /// Apply a batch inside `txn`, returning the overlay the model expects.
    fn write_batch(
        &mut self,
        txn: &WriteTransaction,
        batch: Vec<Record>,
    ) -> BTreeMap<String, RecordFields> {
        let mut overlay: BTreeMap<String, RecordFields> = BTreeMap::new();
        let live = self.live.clone();

        for record in batch {
            let id = record.id.clone();
            let valid = record.validate().is_ok();
            let expected_prev = overlay.get(&id).or_else(|| self.model.get(&id)).cloned();
            let fields = record.fields.clone();

            match txn.upsert(record, &live) {
                Ok(outcome) if valid => {
                    let expected_kind = if expected_prev.is_some() {
                        WriteKind::Replaced
                    } else {
                        WriteKind::Inserted
                    };
                    if outcome.applied != expected_kind {
                        self.violation(&format!(
                            "upsert {} applied {:?}, expected {:?}",
                            id, outcome.applied, expected_kind
                        ));
                    }
                    if outcome.previous.map(|r| r.fields) != expected_prev {
                        self.violation(&format!("upsert {} reported wrong previous record", id));
                    }
                    overlay.insert(id.clone(), fields.clone());
                }
                Ok(_) => self.violation(&format!("record {} with empty name was accepted", id)),
                Err(StoreError::InvalidRecord { .. }) if !valid => {
                    self.result.rejected_records += 1;
                }
                Err(e) => self.violation(&format!("upsert {} failed: {}", id, e)),
            }

            // Read-your-writes
            let expected = overlay.get(&id).or_else(|| self.model.get(&id)).cloned();
            match txn.get_by_id(&id, &live) {
                Ok(found) if found.as_ref().map(|r| &r.fields) == expected.as_ref() => {}
                Ok(found) => self.violation(&format!(
                    "get {} inside transaction returned {:?}, expected {:?}",
                    id, found, expected
                )),
                Err(e) => self.violation(&format!("get {} failed: {}", id, e)),
            }

            // Outsiders see only committed rows
            let committed = self.coordinator.read_committed(&id).map(|r| r.fields);
            if committed != self.model.get(&id).cloned() {
                self.violation(&format!("uncommitted write to {} is visible", id));
            }
        }

        overlay
    }

    fn begin(&mut self) -> Option<WriteTransaction> {
        let live = self.live.clone();
        match self.coordinator.begin(&live) {
            Ok(txn) => Some(txn),
            Err(e) => {
                self.violation(&format!("begin failed with no open transaction: {}", e));
                None
            }
        }
    }

    /// Scenario: batch of upserts then commit -> all valid writes visible
    fn run_commit_scenario(&mut self) {
        let batch = self.random_batch();
        self.result.last_op = Some(CoordinatorOp::Commit(format!("{} upserts", batch.len())));
        self.result.commits += 1;

        let Some(txn) = self.begin() else { return };
        let overlay = self.write_batch(&txn, batch);

        let live = self.live.clone();
        match txn.commit(&live) {
            Ok(summary) => {
                if summary.records_written != overlay.len() {
                    self.violation(&format!(
                        "commit wrote {} records, expected {}",
                        summary.records_written,
                        overlay.len()
                    ));
                }
                self.model.extend(overlay);
            }
            Err(e) => self.violation(&format!("commit failed: {}", e)),
        }
    }

    /// Scenario: batch of upserts then abort (explicit or by drop) -> nothing visible
    fn run_abort_scenario(&mut self) {
        let batch = self.random_batch();
        let by_drop = self.rng.gen_bool(0.5);
        self.result.last_op = Some(CoordinatorOp::Abort(format!(
            "{} upserts, by_drop={}",
            batch.len(),
            by_drop
        )));
        self.result.aborts += 1;

        let Some(txn) = self.begin() else { return };
        let _ = self.write_batch(&txn, batch);
        if by_drop {
            drop(txn);
        } else {
            txn.abort();
        }
    }

    /// Scenario: second start while one is open -> TransactionAlreadyExists
    fn run_double_start_scenario(&mut self) {
        self.result.last_op = Some(CoordinatorOp::DoubleStart("start twice".into()));
        self.result.double_starts += 1;

        let Some(txn) = self.begin() else { return };
        let live = self.live.clone();
        match self.coordinator.start_transaction(&live) {
            Err(StoreError::TransactionAlreadyExists) => {}
            other => self.violation(&format!(
                "second start returned {:?}, expected TransactionAlreadyExists",
                other
            )),
        }
        let commit = self.rng.gen_bool(0.5);
        if commit {
            if let Err(e) = txn.commit(&live) {
                self.violation(&format!("empty commit failed: {}", e));
            }
        } else {
            txn.abort();
        }
    }

    /// Scenario: operations with no transaction -> TransactionRequired, no effect
    fn run_no_transaction_scenario(&mut self) {
        let record = self.random_record();
        self.result.last_op = Some(CoordinatorOp::NoTransaction(record.id.clone()));
        self.result.no_transaction += 1;

        let live = self.live.clone();
        let id = record.id.clone();
        if self.coordinator.upsert(record, &live) != Err(StoreError::TransactionRequired) {
            self.violation("upsert without transaction did not fail");
        }
        if self.coordinator.get_by_id(&id, &live) != Err(StoreError::TransactionRequired) {
            self.violation("get without transaction did not fail");
        }
        if self.coordinator.commit(&live) != Err(StoreError::TransactionRequired) {
            self.violation("commit without transaction did not fail");
        }
        if self.coordinator.abort().is_some() {
            self.violation("abort without transaction reported a transaction");
        }
    }

    /// Scenario: cancelled write mid-batch -> Cancelled, transaction then aborted
    fn run_cancelled_write_scenario(&mut self) {
        let batch = self.random_batch();
        let extra = self.random_record();
        self.result.last_op = Some(CoordinatorOp::CancelledWrite(extra.id.clone()));
        self.result.cancelled_writes += 1;

        let Some(txn) = self.begin() else { return };
        let _ = self.write_batch(&txn, batch);

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        if txn.upsert(extra, &cancelled) != Err(StoreError::Cancelled) {
            self.violation("upsert with cancelled token did not fail");
        }
        if !self.coordinator.has_open_transaction() {
            self.violation("cancelled upsert closed the transaction");
        }
        drop(txn);
    }

    /// Scenario: commit with a cancelled token -> Cancelled, guard aborts
    fn run_cancelled_commit_scenario(&mut self) {
        let batch = self.random_batch();
        self.result.last_op = Some(CoordinatorOp::CancelledCommit(format!(
            "{} upserts",
            batch.len()
        )));
        self.result.cancelled_commits += 1;

        let Some(txn) = self.begin() else { return };
        let _ = self.write_batch(&txn, batch);

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        if txn.commit(&cancelled) != Err(StoreError::Cancelled) {
            self.violation("commit with cancelled token did not fail");
        }
    }

    // =========================================================================
    // Assertion Helpers
    // =========================================================================

    fn check_committed(&mut self) {
        if self.coordinator.has_open_transaction() {
            self.violation("transaction left open after scenario");
        }

        let snapshot = self.coordinator.snapshot();
        if snapshot.len() != self.model.len() {
            self.violation(&format!(
                "committed table has {} rows, model has {}",
                snapshot.len(),
                self.model.len()
            ));
        }
        let mismatches: Vec<String> = self
            .model
            .iter()
            .filter_map(|(id, fields)| match snapshot.get(id) {
                Some(record) if &record.fields == fields => None,
                other => Some(format!(
                    "committed row {} is {:?}, expected {:?}",
                    id, other, fields
                )),
            })
            .collect();
        for msg in mismatches {
            self.violation(&msg);
        }

        let stats = self.coordinator.stats();
        if stats.started != stats.committed + stats.aborted {
            self.violation(&format!(
                "stats: {} started but {} committed + {} aborted",
                stats.started, stats.committed, stats.aborted
            ));
        }
    }

    fn violation(&mut self, msg: &str) {
        self.result.invariant_violations.push(format!(
            "Op #{}: {:?} - {}",
            self.result.total_operations, self.result.last_op, msg
        ));
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Run specified number of operations
    pub fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            self.result.total_operations += 1;
            self.run_single_op();

            if !self.result.invariant_violations.is_empty() {
                break;
            }
        }
    }

    /// Get the result
    pub fn result(&self) -> &CoordinatorDSTResult {
        &self.result
    }
}

/// Run a batch of coordinator DST tests
pub fn run_coordinator_batch(
    start_seed: u64,
    num_seeds: usize,
    ops_per_seed: usize,
    config_fn: fn(u64) -> CoordinatorDSTConfig,
) -> Vec<CoordinatorDSTResult> {
    (0..num_seeds)
        .map(|i| {
            let seed = start_seed + i as u64;
            let config = config_fn(seed);
            let mut harness = CoordinatorDSTHarness::new(config);
            harness.run(ops_per_seed);
            harness.result().clone()
        })
        .collect()
}

/// Summarize batch results
pub fn summarize_coordinator_batch(results: &[CoordinatorDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed = total - passed;
    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();

    let mut summary = format!(
        "Coordinator DST Summary\n\
         =======================\n\
         Seeds: {} total, {} passed, {} failed\n\
         Total operations: {}\n",
        total, passed, failed, total_ops
    );

    if failed > 0 {
        summary.push_str("\nFailed seeds:\n");
        for result in results.iter().filter(|r| !r.is_success()) {
            summary.push_str(&format!("  Seed {}: {}\n", result.seed, result.summary()));
            for violation in &result.invariant_violations {
                summary.push_str(&format!("    - {}\n", violation));
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_dst_single_seed() {
        let mut harness = CoordinatorDSTHarness::with_seed(12345);
        harness.run(100);
        let result = harness.result();
        println!("{}", result.summary());
        for v in &result.invariant_violations {
            println!("  VIOLATION: {}", v);
        }
        assert!(result.is_success(), "Seed 12345 failed");
        assert!(result.commits > 0);
    }

    #[test]
    fn test_coordinator_dst_high_overlap() {
        let mut harness = CoordinatorDSTHarness::new(CoordinatorDSTConfig::high_overlap(42));
        harness.run(200);
        let result = harness.result();
        println!("High overlap: {}", result.summary());
        assert!(result.is_success());
    }

    #[test]
    fn test_coordinator_dst_fault_heavy() {
        let mut harness = CoordinatorDSTHarness::new(CoordinatorDSTConfig::fault_heavy(99));
        harness.run(200);
        let result = harness.result();
        println!("Fault heavy: {}", result.summary());
        assert!(result.is_success());
        assert!(
            result.cancelled_writes + result.cancelled_commits > 0,
            "Fault-heavy config should produce cancellations"
        );
        assert!(result.rejected_records > 0);
    }

    #[test]
    fn test_coordinator_dst_10_seeds() {
        let results = run_coordinator_batch(0, 10, 200, CoordinatorDSTConfig::new);
        let summary = summarize_coordinator_batch(&results);
        println!("{}", summary);

        let passed = results.iter().filter(|r| r.is_success()).count();
        assert_eq!(passed, 10, "All 10 seeds should pass");
    }
}
