//! Transaction Coordinator Deterministic Simulation Tests
//!
//! VOPR-style tests for single-writer import transactions: commit publishes,
//! abort discards, misuse and cancellation leave the committed table intact.

use port_ingest::store::{
    run_coordinator_batch, summarize_coordinator_batch, CoordinatorDSTConfig,
    CoordinatorDSTHarness,
};

// =============================================================================
// Standard Configuration Tests - 100+ Seeds
// =============================================================================

#[test]
fn test_coordinator_dst_100_seeds_standard() {
    let results = run_coordinator_batch(0, 100, 200, CoordinatorDSTConfig::new);
    let summary = summarize_coordinator_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 100, "All 100 seeds should pass with standard config");
}

#[test]
fn test_coordinator_dst_100_seeds_high_overlap() {
    let results = run_coordinator_batch(1000, 100, 200, CoordinatorDSTConfig::high_overlap);
    let summary = summarize_coordinator_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 100, "All 100 high-overlap seeds should pass");
}

#[test]
fn test_coordinator_dst_100_seeds_fault_heavy() {
    let results = run_coordinator_batch(2000, 100, 200, CoordinatorDSTConfig::fault_heavy);
    let summary = summarize_coordinator_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 100, "All 100 fault-heavy seeds should pass");

    let cancellations: u64 = results
        .iter()
        .map(|r| r.cancelled_writes + r.cancelled_commits)
        .sum();
    assert!(
        cancellations > 100,
        "Fault-heavy config should produce many cancellations, got {}",
        cancellations
    );
}

// =============================================================================
// Stress Tests
// =============================================================================

#[test]
fn test_coordinator_dst_stress_1000_ops() {
    let mut harness = CoordinatorDSTHarness::with_seed(42);
    harness.run(1000);
    let result = harness.result();
    println!("Stress 1000 ops: {}", result.summary());
    assert!(result.is_success(), "1000 ops should maintain invariants");
}

// =============================================================================
// Edge Case Tests
// =============================================================================

#[test]
fn test_coordinator_dst_single_key() {
    let config = CoordinatorDSTConfig {
        seed: 77777,
        num_keys: 1,
        max_batch: 4,
        invalid_prob: 0.2,
        abort_prob: 0.3,
        misuse_prob: 0.1,
        cancel_prob: 0.1,
    };

    let mut harness = CoordinatorDSTHarness::new(config);
    harness.run(500);
    let result = harness.result();
    println!("Single key: {}", result.summary());
    assert!(result.is_success(), "Single key should maintain invariants");
}

#[test]
fn test_coordinator_dst_all_scenarios_exercised() {
    let mut harness = CoordinatorDSTHarness::with_seed(42);
    harness.run(500);
    let result = harness.result();

    println!("{}", result.summary());
    assert!(result.is_success());

    assert!(result.commits > 0, "Should exercise commits");
    assert!(result.aborts > 0, "Should exercise aborts");
    assert!(result.double_starts > 0, "Should exercise double start");
    assert!(result.no_transaction > 0, "Should exercise missing transaction");
    assert!(result.cancelled_writes > 0, "Should exercise cancelled writes");
    assert!(result.cancelled_commits > 0, "Should exercise cancelled commits");
    assert!(result.rejected_records > 0, "Should exercise invalid records");
}

// =============================================================================
// Longer Tests (ignored by default for CI speed)
// =============================================================================

#[test]
#[ignore]
fn test_coordinator_dst_500_seeds() {
    let results = run_coordinator_batch(0, 500, 200, CoordinatorDSTConfig::new);
    let summary = summarize_coordinator_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 500, "All 500 seeds should pass");
}
