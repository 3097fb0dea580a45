//! Mutual-exclusion tests under contention.

mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use palisade_core::journal::completed_sentinel;
use palisade_core::{MemoryBlobStore, MemoryJournalStore};
use palisade_lock::{GlobalLock, LockConfig};

use support::TracingJournalStore;

/// Many tasks cycle acquire → critical section → release on one resource.
/// No two critical sections may overlap, and every cycle must complete.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_cycles_never_overlap() {
    const TASKS: u32 = 32;
    const ITERATIONS: u32 = 4;

    let journal = Arc::new(TracingJournalStore::new());
    let config = LockConfig::new("UseDevelopmentStorage=true")
        .with_acquirement_interval_seconds(1);
    let lock = GlobalLock::new(
        &config,
        Arc::clone(&journal) as _,
        Arc::new(MemoryBlobStore::new()),
    )
    .expect("construct coordinator");

    let in_section = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let lock = lock.clone();
            let in_section = Arc::clone(&in_section);
            let peak = Arc::clone(&peak);

            tokio::spawn(async move {
                let ct = CancellationToken::new();
                for _ in 0..ITERATIONS {
                    let lease = lock.try_acquire("shared", &ct).await.expect("acquire");
                    if !lease.is_acquired() {
                        lease.wait(&ct).await.expect("wait");
                    }
                    assert!(lease.is_acquired());

                    let depth = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(depth, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    in_section.fetch_sub(1, Ordering::SeqCst);

                    lease.release(&ct).await.expect("release");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("join");
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1, "critical sections overlapped");

    let rows = journal.dump();
    assert_eq!(rows.len(), (TASKS * ITERATIONS) as usize);
    assert!(
        rows.iter().all(|r| r.completed_at > completed_sentinel()),
        "every cycle must have completed its row"
    );
}

/// Two coordinator instances over one shared backend model two processes.
/// At most one active row may exist at any instant.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_coordinators_grant_at_most_one_lease() {
    let journal = Arc::new(MemoryJournalStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let config = LockConfig::new("UseDevelopmentStorage=true")
        .with_acquirement_interval_seconds(1);

    let build = || {
        GlobalLock::new(&config, Arc::clone(&journal) as _, Arc::clone(&blobs) as _)
            .expect("construct coordinator")
    };
    let first = build();
    let second = build();

    let ct = CancellationToken::new();
    for _round in 0..10 {
        let (a, b) = tokio::join!(
            first.try_acquire("shared", &ct),
            second.try_acquire("shared", &ct),
        );
        let a = a.expect("acquire a");
        let b = b.expect("acquire b");

        let granted = u32::from(a.is_acquired()) + u32::from(b.is_acquired());
        assert!(granted <= 1, "both processes won the same round");

        let now = chrono::Utc::now();
        let active = journal
            .dump()
            .expect("dump")
            .into_iter()
            .filter(|r| r.is_active(now))
            .count();
        assert!(active <= 1, "journal shows {active} active rows");

        for lease in [a, b] {
            if lease.is_acquired() {
                lease.release(&ct).await.expect("release");
            }
        }
    }
}

/// In-process contenders for one key are promoted in the order they parked.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn local_waiters_are_served_in_fifo_order() {
    let journal = Arc::new(TracingJournalStore::new());
    let config = LockConfig::new("UseDevelopmentStorage=true")
        .with_acquirement_interval_seconds(1);
    let lock = GlobalLock::new(
        &config,
        Arc::clone(&journal) as _,
        Arc::new(MemoryBlobStore::new()),
    )
    .expect("construct coordinator");

    let ct = CancellationToken::new();
    let holder = lock.try_acquire("shared", &ct).await.expect("acquire");
    assert!(holder.is_acquired());

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for index in 0..4_u32 {
        let lock = lock.clone();
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            let ct = CancellationToken::new();
            let lease = lock.try_acquire("shared", &ct).await.expect("acquire");
            assert!(!lease.is_acquired());
            lease.wait(&ct).await.expect("wait");

            order.lock().expect("order").push(index);
            lease.release(&ct).await.expect("release");
        }));
        // Park each waiter before spawning the next so queue order is known.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    holder.release(&ct).await.expect("release holder");
    for handle in handles {
        handle.await.expect("join");
    }

    let observed = order.lock().expect("order").clone();
    assert_eq!(observed, (0..4).collect::<Vec<_>>());
}
