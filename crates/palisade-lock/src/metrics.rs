//! Lock coordinator metrics.
//!
//! Counters for acquisition outcomes, version-tag conflict retries, and
//! waiter promotions. These complement the structured logging already in
//! place.

use metrics::{counter, describe_counter};

/// Acquisition attempt counter, labelled by outcome.
pub const ACQUIRE_ATTEMPTS: &str = "palisade_acquire_attempts_total";

/// Version-tag conflict retry counter, labelled by operation.
pub const MERGE_CONFLICT_RETRIES: &str = "palisade_merge_conflict_retries_total";

/// Waiter promotion counter.
pub const WAITER_PROMOTIONS: &str = "palisade_waiter_promotions_total";

/// Journal invariant anomaly counter (multiple active rows observed).
pub const INVARIANT_ANOMALIES: &str = "palisade_invariant_anomalies_total";

/// Registers all coordinator metric descriptions.
///
/// Call this once at application startup after initializing the metrics
/// recorder.
pub fn register_metrics() {
    describe_counter!(
        ACQUIRE_ATTEMPTS,
        "Total lease acquisition attempts by outcome"
    );
    describe_counter!(
        MERGE_CONFLICT_RETRIES,
        "Total journal merge retries caused by version-tag conflicts"
    );
    describe_counter!(WAITER_PROMOTIONS, "Total queued waiters promoted to holders");
    describe_counter!(
        INVARIANT_ANOMALIES,
        "Total availability queries that observed multiple active rows"
    );
}

/// Records one acquisition attempt outcome
/// (`acquired`, `unavailable`, `gate_contended`).
pub fn record_acquire_outcome(outcome: &'static str) {
    counter!(ACQUIRE_ATTEMPTS, "outcome" => outcome).increment(1);
}

/// Records one merge retry after a version-tag conflict.
pub fn record_merge_conflict(operation: &'static str) {
    counter!(MERGE_CONFLICT_RETRIES, "operation" => operation).increment(1);
}

/// Records one waiter promotion.
pub fn record_waiter_promotion() {
    counter!(WAITER_PROMOTIONS).increment(1);
}

/// Records one observed journal invariant anomaly.
pub fn record_invariant_anomaly() {
    counter!(INVARIANT_ANOMALIES).increment(1);
}
