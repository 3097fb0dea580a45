//! Journal table model and collaborator contract.
//!
//! The journal is the operation log of the lock service: one row per
//! acquired lease, active and historical. Rows are addressed by
//! (`partition_key`, `row_key`) and carry an opaque backend version tag
//! (ETag) used for optimistic concurrency on updates.
//!
//! A row is **active** while its `completed_at` still holds the sentinel
//! epoch and its `expires_at` lies in the future. The lock invariant (at
//! most one active row per (resource, scope)) is maintained by the
//! coordinator, not by the table; the table only provides conditional
//! insert/merge and filtered queries.
//!
//! ## Backend mapping
//!
//! The contract is designed for cloud table semantics:
//! - Azure Tables: entities with `ETag`, `If-Match` merges, OData filters
//! - DynamoDB: items with a version attribute and conditional expressions
//!
//! `MemoryJournalStore` is the in-memory implementation used in tests.

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::RecordId;

static COMPLETED_SENTINEL: LazyLock<DateTime<Utc>> = LazyLock::new(|| {
    Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
});

/// The sentinel epoch marking a record as not yet completed.
///
/// Chosen to predate any real completion timestamp so equality against it is
/// unambiguous in query filters.
#[must_use]
pub fn completed_sentinel() -> DateTime<Utc> {
    *COMPLETED_SENTINEL
}

/// One journal row: a single lease grant, active or historical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalRecord {
    /// Partition key: `md5_hex(scope)`.
    pub partition_key: String,
    /// Row key: a fresh lower-case hex UUID per acquisition.
    pub row_key: String,
    /// Normalised resource name.
    pub resource: String,
    /// Normalised scope name.
    pub scope: String,
    /// When the lease was granted. Set once at insert.
    pub created_at: DateTime<Utc>,
    /// When the lease expires. Advanced monotonically by extension.
    pub expires_at: DateTime<Utc>,
    /// Sentinel epoch while active; the release time afterwards.
    pub completed_at: DateTime<Utc>,
}

impl JournalRecord {
    /// Returns whether this record represents a live lease at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.completed_at == completed_sentinel() && self.expires_at > now
    }

    /// Returns the record id addressing this row.
    #[must_use]
    pub fn record_id(&self) -> RecordId {
        RecordId::new(self.row_key.clone(), self.partition_key.clone())
    }
}

/// A record together with the version tag observed at read time.
///
/// The tag must be echoed back on a subsequent [`JournalStore::merge`] for
/// the write to succeed.
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    /// The row content.
    pub record: JournalRecord,
    /// Opaque backend version tag.
    pub etag: String,
}

/// Conjunctive filter over journal rows.
///
/// Equality on the string fields, a strict lower bound on `expires_at`, and
/// an optional page size. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Equality on the partition key.
    pub partition_key: Option<String>,
    /// Equality on the row key.
    pub row_key: Option<String>,
    /// Equality on the resource name.
    pub resource: Option<String>,
    /// Equality on the completion timestamp (sentinel selects active rows).
    pub completed_at: Option<DateTime<Utc>>,
    /// Strict lower bound on the expiry timestamp.
    pub expires_after: Option<DateTime<Utc>>,
    /// Maximum number of rows to return.
    pub page_size: Option<usize>,
}

impl RecordFilter {
    fn matches(&self, record: &JournalRecord) -> bool {
        self.partition_key
            .as_ref()
            .is_none_or(|p| *p == record.partition_key)
            && self.row_key.as_ref().is_none_or(|r| *r == record.row_key)
            && self
                .resource
                .as_ref()
                .is_none_or(|r| *r == record.resource)
            && self
                .completed_at
                .as_ref()
                .is_none_or(|c| *c == record.completed_at)
            && self
                .expires_after
                .as_ref()
                .is_none_or(|e| record.expires_at > *e)
    }
}

/// Result of a conditional journal write.
///
/// A failed precondition is a normal result, never an error: the caller is
/// expected to re-read and retry.
#[derive(Debug, Clone)]
pub enum JournalWrite {
    /// Write succeeded; returns the new version tag.
    Success {
        /// The version tag after the write.
        etag: String,
    },
    /// The version precondition was not met (concurrent update), or the row
    /// vanished between read and write.
    PreconditionFailed,
}

/// Journal-table collaborator contract.
///
/// Implementations are constructed for one table (connection credentials and
/// table name are backend constructor concerns) and must be safe to share
/// across tasks.
#[async_trait]
pub trait JournalStore: Send + Sync + 'static {
    /// Creates the backing table if it does not exist. Idempotent.
    async fn create_table_if_absent(&self) -> Result<()>;

    /// Returns the rows matching `filter`, at most `page_size` of them.
    ///
    /// Ordering is stable for a given store but otherwise unspecified.
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<VersionedRecord>>;

    /// Inserts a new row; the (partition, row) pair must not exist yet.
    async fn insert(&self, record: &JournalRecord) -> Result<JournalWrite>;

    /// Replaces a row's content if its current version tag equals `etag`.
    ///
    /// A missing row reports [`JournalWrite::PreconditionFailed`] rather
    /// than an error; the follow-up read resolves which case occurred.
    async fn merge(&self, record: &JournalRecord, etag: &str) -> Result<JournalWrite>;
}

/// In-memory journal store for tests and local development.
///
/// Thread-safe via `RwLock`. Version tags are numeric strings incremented on
/// every successful write, simulating backend ETag behaviour.
#[derive(Debug, Default)]
pub struct MemoryJournalStore {
    rows: RwLock<HashMap<(String, String), StoredRow>>,
}

#[derive(Debug, Clone)]
struct StoredRow {
    record: JournalRecord,
    version: i64,
}

impl MemoryJournalStore {
    /// Creates a new empty journal store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored row, for test assertions.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn dump(&self) -> Result<Vec<JournalRecord>> {
        let rows = self.rows.read().map_err(|_| Error::Internal {
            message: "journal store lock poisoned".into(),
        })?;
        let mut records: Vec<_> = rows.values().map(|r| r.record.clone()).collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.row_key.cmp(&b.row_key))
        });
        Ok(records)
    }
}

#[async_trait]
impl JournalStore for MemoryJournalStore {
    async fn create_table_if_absent(&self) -> Result<()> {
        Ok(())
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<VersionedRecord>> {
        let rows = self.rows.read().map_err(|_| Error::Internal {
            message: "journal store lock poisoned".into(),
        })?;

        let mut matches: Vec<_> = rows
            .values()
            .filter(|row| filter.matches(&row.record))
            .map(|row| VersionedRecord {
                record: row.record.clone(),
                etag: row.version.to_string(),
            })
            .collect();
        drop(rows);

        matches.sort_by(|a, b| {
            a.record
                .created_at
                .cmp(&b.record.created_at)
                .then_with(|| a.record.row_key.cmp(&b.record.row_key))
        });
        if let Some(limit) = filter.page_size {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn insert(&self, record: &JournalRecord) -> Result<JournalWrite> {
        let mut rows = self.rows.write().map_err(|_| Error::Internal {
            message: "journal store lock poisoned".into(),
        })?;

        let key = (record.partition_key.clone(), record.row_key.clone());
        if rows.contains_key(&key) {
            return Ok(JournalWrite::PreconditionFailed);
        }
        rows.insert(
            key,
            StoredRow {
                record: record.clone(),
                version: 1,
            },
        );
        Ok(JournalWrite::Success { etag: "1".into() })
    }

    async fn merge(&self, record: &JournalRecord, etag: &str) -> Result<JournalWrite> {
        let mut rows = self.rows.write().map_err(|_| Error::Internal {
            message: "journal store lock poisoned".into(),
        })?;

        let key = (record.partition_key.clone(), record.row_key.clone());
        let Some(row) = rows.get_mut(&key) else {
            return Ok(JournalWrite::PreconditionFailed);
        };
        if row.version.to_string() != etag {
            return Ok(JournalWrite::PreconditionFailed);
        }
        row.record = record.clone();
        row.version += 1;
        Ok(JournalWrite::Success {
            etag: row.version.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{new_row_key, partition_key};

    fn sample_record(resource: &str, scope: &str) -> JournalRecord {
        let now = Utc::now();
        JournalRecord {
            partition_key: partition_key(scope),
            row_key: new_row_key(),
            resource: resource.into(),
            scope: scope.into(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(24),
            completed_at: completed_sentinel(),
        }
    }

    #[test]
    fn sentinel_is_the_fixed_epoch() {
        let sentinel = completed_sentinel();
        assert_eq!(sentinel.to_rfc3339(), "1601-01-01T00:00:00+00:00");
    }

    #[test]
    fn active_requires_sentinel_and_future_expiry() {
        let now = Utc::now();
        let mut record = sample_record("tenant-1", "default");
        assert!(record.is_active(now));

        record.completed_at = now;
        assert!(!record.is_active(now));

        record.completed_at = completed_sentinel();
        record.expires_at = now - chrono::Duration::seconds(1);
        assert!(!record.is_active(now));
    }

    #[tokio::test]
    async fn insert_then_query_round_trip() {
        let store = MemoryJournalStore::new();
        let record = sample_record("tenant-1", "default");

        let outcome = store.insert(&record).await.expect("insert");
        assert!(matches!(outcome, JournalWrite::Success { ref etag } if etag == "1"));

        let found = store
            .query(&RecordFilter {
                partition_key: Some(record.partition_key.clone()),
                row_key: Some(record.row_key.clone()),
                ..RecordFilter::default()
            })
            .await
            .expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record, record);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_row() {
        let store = MemoryJournalStore::new();
        let record = sample_record("tenant-1", "default");

        store.insert(&record).await.expect("first insert");
        let outcome = store.insert(&record).await.expect("second insert");
        assert!(matches!(outcome, JournalWrite::PreconditionFailed));
    }

    #[tokio::test]
    async fn merge_requires_current_etag() {
        let store = MemoryJournalStore::new();
        let mut record = sample_record("tenant-1", "default");
        store.insert(&record).await.expect("insert");

        record.expires_at += chrono::Duration::minutes(1);
        let outcome = store.merge(&record, "1").await.expect("merge");
        let JournalWrite::Success { etag } = outcome else {
            panic!("expected merge success");
        };
        assert_eq!(etag, "2");

        // Stale tag no longer matches.
        let stale = store.merge(&record, "1").await.expect("stale merge");
        assert!(matches!(stale, JournalWrite::PreconditionFailed));
    }

    #[tokio::test]
    async fn merge_on_missing_row_fails_precondition() {
        let store = MemoryJournalStore::new();
        let record = sample_record("tenant-1", "default");
        let outcome = store.merge(&record, "1").await.expect("merge");
        assert!(matches!(outcome, JournalWrite::PreconditionFailed));
    }

    #[tokio::test]
    async fn query_filters_and_pages() {
        let store = MemoryJournalStore::new();
        let active = sample_record("tenant-1", "default");
        let mut completed = sample_record("tenant-1", "default");
        completed.completed_at = Utc::now();
        let other_scope = sample_record("tenant-1", "reports");

        for record in [&active, &completed, &other_scope] {
            store.insert(record).await.expect("insert");
        }

        let now = Utc::now();
        let found = store
            .query(&RecordFilter {
                partition_key: Some(partition_key("default")),
                resource: Some("tenant-1".into()),
                completed_at: Some(completed_sentinel()),
                expires_after: Some(now),
                page_size: Some(2),
                ..RecordFilter::default()
            })
            .await
            .expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record.row_key, active.row_key);
    }
}
