//! Cancellation propagation and conflict-retry behaviour.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use palisade_lock::{GlobalLock, LockConfig, LockError};

use support::{BlobOp, JournalOp, TracingBlobStore, TracingJournalStore};

fn coordinator(
    journal: &Arc<TracingJournalStore>,
    blobs: &Arc<TracingBlobStore>,
) -> GlobalLock {
    let config = LockConfig::new("UseDevelopmentStorage=true")
        .with_acquirement_interval_seconds(1);
    GlobalLock::new(&config, Arc::clone(journal) as _, Arc::clone(blobs) as _)
        .expect("construct coordinator")
}

/// A pre-cancelled token fails before any backend call is made.
#[tokio::test]
async fn pre_cancelled_acquire_touches_no_backend() {
    let journal = Arc::new(TracingJournalStore::new());
    let blobs = Arc::new(TracingBlobStore::new());
    let lock = coordinator(&journal, &blobs);

    let ct = CancellationToken::new();
    ct.cancel();

    let result = lock.try_acquire("tenant-1", &ct).await;
    assert!(matches!(result, Err(LockError::Cancelled)));
    assert!(journal.operations().is_empty(), "journal was called");
    assert!(blobs.operations().is_empty(), "blob store was called");
}

/// Losing the blob lease mid-insert aborts the write: the acquisition
/// reports cancellation and no journal row is created.
#[tokio::test]
async fn gate_expiry_mid_insert_cancels_without_a_record() {
    // Journal calls slower than the gate's local countdown: the guarded
    // re-check passes, then the insert outlives the gate.
    let journal = Arc::new(TracingJournalStore::with_latency(Duration::from_millis(300)));
    let blobs = Arc::new(TracingBlobStore::new());
    let lock = coordinator(&journal, &blobs)
        .with_blob_lease_ttl(Duration::from_millis(500));

    let ct = CancellationToken::new();
    let result = lock.try_acquire("tenant-1", &ct).await;
    assert!(matches!(result, Err(LockError::Cancelled)));

    assert!(journal.dump().is_empty(), "no row may survive a lost gate");
    // The gate was entered and released despite the inner cancellation.
    assert!(blobs.operations().contains(&BlobOp::AcquireLease));
    assert!(blobs.operations().contains(&BlobOp::ReleaseLease));
}

/// Cancelling the caller's token mid-acquisition still releases the gate.
#[tokio::test]
async fn caller_cancellation_still_releases_the_gate() {
    let journal = Arc::new(TracingJournalStore::with_latency(Duration::from_millis(100)));
    let blobs = Arc::new(TracingBlobStore::new());
    let lock = coordinator(&journal, &blobs);

    let ct = CancellationToken::new();
    let canceller = {
        let ct = ct.clone();
        async move {
            // Fire after the pre-check; the guarded section is in flight.
            tokio::time::sleep(Duration::from_millis(150)).await;
            ct.cancel();
        }
    };
    let (result, ()) = tokio::join!(lock.try_acquire("tenant-1", &ct), canceller);
    assert!(matches!(result, Err(LockError::Cancelled)));

    // The gate's best-effort release runs on a spawned task; give it a
    // moment, then a fresh acquisition must succeed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let retry_ct = CancellationToken::new();
    let lease = lock
        .try_acquire("tenant-1", &retry_ct)
        .await
        .expect("acquire after cancelled attempt");
    assert!(lease.is_acquired());
}

/// One version conflict on release is resolved by exactly one re-read and a
/// follow-up merge.
#[tokio::test]
async fn single_conflict_on_release_retries_once() {
    let journal = Arc::new(TracingJournalStore::new());
    let blobs = Arc::new(TracingBlobStore::new());
    let lock = coordinator(&journal, &blobs);
    let ct = CancellationToken::new();

    let lease = lock.try_acquire("tenant-1", &ct).await.expect("acquire");
    let lease_id = lease.lease_id().expect("lease id");

    journal.clear_operations();
    journal.force_merge_conflicts(1);
    lock.release(&lease_id, &ct).await.expect("release");

    assert_eq!(
        journal.operations(),
        vec![
            JournalOp::Query,
            JournalOp::Merge,
            JournalOp::Query,
            JournalOp::Merge,
        ],
        "expected read, conflicted merge, re-read, successful merge"
    );
}

/// One version conflict on extension likewise retries from the read.
#[tokio::test]
async fn single_conflict_on_extend_retries_once() {
    let journal = Arc::new(TracingJournalStore::new());
    let blobs = Arc::new(TracingBlobStore::new());
    let lock = coordinator(&journal, &blobs);
    let ct = CancellationToken::new();

    let lease = lock.try_acquire("tenant-1", &ct).await.expect("acquire");
    let lease_id = lease.lease_id().expect("lease id");
    let before = journal.dump()[0].expires_at;

    journal.clear_operations();
    journal.force_merge_conflicts(1);
    let extended = lock
        .try_extend_by(&lease_id, Duration::from_secs(60), &ct)
        .await
        .expect("extend");
    assert!(extended);
    assert_eq!(journal.count(JournalOp::Query), 2);
    assert_eq!(journal.count(JournalOp::Merge), 2);
    assert_eq!(
        journal.dump()[0].expires_at,
        before + chrono::Duration::seconds(60)
    );
}

/// Conflicts past the retry budget surface as a conflict error.
#[tokio::test]
async fn persistent_conflicts_exhaust_the_retry_budget() {
    let journal = Arc::new(TracingJournalStore::new());
    let blobs = Arc::new(TracingBlobStore::new());
    let lock = coordinator(&journal, &blobs);
    let ct = CancellationToken::new();

    let lease = lock.try_acquire("tenant-1", &ct).await.expect("acquire");
    let lease_id = lease.lease_id().expect("lease id");

    journal.force_merge_conflicts(u32::MAX);
    let result = lock.release(&lease_id, &ct).await;
    assert!(matches!(result, Err(LockError::Conflict { .. })));
}

/// Cancelling between conflict retries surfaces cancellation.
#[tokio::test]
async fn cancellation_between_retries_is_observed() {
    let journal = Arc::new(TracingJournalStore::new());
    let blobs = Arc::new(TracingBlobStore::new());
    let lock = coordinator(&journal, &blobs);
    let ct = CancellationToken::new();

    let lease = lock.try_acquire("tenant-1", &ct).await.expect("acquire");
    let lease_id = lease.lease_id().expect("lease id");

    journal.force_merge_conflicts(u32::MAX);
    let release_ct = CancellationToken::new();
    let canceller = {
        let release_ct = release_ct.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            release_ct.cancel();
        }
    };
    let (result, ()) = tokio::join!(lock.release(&lease_id, &release_ct), canceller);
    assert!(matches!(result, Err(LockError::Cancelled)));
}
