//! Test storage wrappers with operation tracing.
//!
//! Wraps the in-memory stores so tests can assert call counts, inject
//! latency, and force version-tag conflicts.

// Each integration test binary compiles this module; not all of them use
// every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use palisade_core::blob::{BlobStore, LeaseAcquire, LeaseRelease};
use palisade_core::error::Result;
use palisade_core::journal::{
    JournalRecord, JournalStore, JournalWrite, RecordFilter, VersionedRecord,
};
use palisade_core::{MemoryBlobStore, MemoryJournalStore};

/// Record of a journal operation for test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalOp {
    CreateTable,
    Query,
    Insert,
    Merge,
}

/// In-memory journal store with operation tracing.
#[derive(Default)]
pub struct TracingJournalStore {
    inner: MemoryJournalStore,
    operations: Mutex<Vec<JournalOp>>,
    latency: Option<Duration>,
    forced_conflicts: AtomicU32,
}

impl TracingJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose every operation takes `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Makes the next `count` merges report a version conflict.
    pub fn force_merge_conflicts(&self, count: u32) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn operations(&self) -> Vec<JournalOp> {
        self.operations.lock().expect("operations lock").clone()
    }

    pub fn clear_operations(&self) {
        self.operations.lock().expect("operations lock").clear();
    }

    pub fn count(&self, op: JournalOp) -> usize {
        self.operations().iter().filter(|o| **o == op).count()
    }

    pub fn dump(&self) -> Vec<JournalRecord> {
        self.inner.dump().expect("dump")
    }

    async fn observe(&self, op: JournalOp) {
        self.operations.lock().expect("operations lock").push(op);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl JournalStore for TracingJournalStore {
    async fn create_table_if_absent(&self) -> Result<()> {
        self.observe(JournalOp::CreateTable).await;
        self.inner.create_table_if_absent().await
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<VersionedRecord>> {
        self.observe(JournalOp::Query).await;
        self.inner.query(filter).await
    }

    async fn insert(&self, record: &JournalRecord) -> Result<JournalWrite> {
        self.observe(JournalOp::Insert).await;
        self.inner.insert(record).await
    }

    async fn merge(&self, record: &JournalRecord, etag: &str) -> Result<JournalWrite> {
        self.observe(JournalOp::Merge).await;
        if self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
        {
            return Ok(JournalWrite::PreconditionFailed);
        }
        self.inner.merge(record, etag).await
    }
}

/// Record of a blob operation for test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobOp {
    CreateContainer,
    CreateBlob,
    AcquireLease,
    ReleaseLease,
}

/// In-memory blob store with operation tracing.
#[derive(Default)]
pub struct TracingBlobStore {
    inner: MemoryBlobStore,
    operations: Mutex<Vec<BlobOp>>,
}

impl TracingBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> Vec<BlobOp> {
        self.operations.lock().expect("operations lock").clone()
    }

    fn observe(&self, op: BlobOp) {
        self.operations.lock().expect("operations lock").push(op);
    }
}

#[async_trait]
impl BlobStore for TracingBlobStore {
    async fn create_container_if_absent(&self, container: &str) -> Result<()> {
        self.observe(BlobOp::CreateContainer);
        self.inner.create_container_if_absent(container).await
    }

    async fn create_blob_if_absent(&self, container: &str, blob: &str) -> Result<()> {
        self.observe(BlobOp::CreateBlob);
        self.inner.create_blob_if_absent(container, blob).await
    }

    async fn acquire_lease(
        &self,
        container: &str,
        blob: &str,
        duration: Duration,
    ) -> Result<LeaseAcquire> {
        self.observe(BlobOp::AcquireLease);
        self.inner.acquire_lease(container, blob, duration).await
    }

    async fn release_lease(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
    ) -> Result<LeaseRelease> {
        self.observe(BlobOp::ReleaseLease);
        self.inner.release_lease(container, blob, lease_id).await
    }
}
