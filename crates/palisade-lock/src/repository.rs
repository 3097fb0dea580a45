//! Journal repository: lease rows with optimistic-concurrency updates.
//!
//! Wraps the [`JournalStore`] collaborator with the lock service's row
//! semantics: availability checks, grant inserts, extension, and
//! completion. Updates are optimistic: read the row and its version tag,
//! write conditionally, and on a version conflict retry from the read. Each
//! retry observes fresh state, so a vanished row terminates the loop
//! immediately; the retry budget only guards against a pathological stream
//! of conflicts.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use palisade_core::identity::{new_row_key, partition_key, RecordId};
use palisade_core::journal::{
    completed_sentinel, JournalRecord, JournalStore, JournalWrite, RecordFilter, VersionedRecord,
};

use crate::cancel::cancellable;
use crate::error::{LockError, Result};
use crate::metrics::{record_invariant_anomaly, record_merge_conflict};

/// Maximum conditional-merge attempts before reporting a conflict.
pub const MAX_MERGE_ATTEMPTS: u32 = 8;

/// Base backoff between merge attempts.
const MERGE_BACKOFF_BASE: Duration = Duration::from_millis(25);

/// Maximum backoff between merge attempts.
const MERGE_BACKOFF_MAX: Duration = Duration::from_millis(250);

/// Lease-row repository over one journal table.
pub struct JournalRepository {
    store: Arc<dyn JournalStore>,
    table_ready: OnceCell<()>,
}

impl JournalRepository {
    /// Creates a repository over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn JournalStore>) -> Self {
        Self {
            store,
            table_ready: OnceCell::new(),
        }
    }

    /// Returns whether no active lease row exists for (resource, scope).
    ///
    /// Queries with page size 2 so a duplicated active row (the invariant
    /// the coordinator defends) is still observable. Seeing two rows is a
    /// tolerated data anomaly: it is logged and the resource reported
    /// unavailable, so no further insert widens the violation.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when `ct` fires, or the storage failure.
    pub async fn is_resource_available(
        &self,
        resource: &str,
        scope: &str,
        ct: &CancellationToken,
    ) -> Result<bool> {
        if ct.is_cancelled() {
            return Err(LockError::Cancelled);
        }
        let filter = RecordFilter {
            partition_key: Some(partition_key(scope)),
            resource: Some(resource.to_string()),
            completed_at: Some(completed_sentinel()),
            expires_after: Some(Utc::now()),
            page_size: Some(2),
            ..RecordFilter::default()
        };
        let matches = cancellable(ct, self.store.query(&filter)).await?;
        match matches.len() {
            0 => Ok(true),
            1 => Ok(false),
            _ => {
                warn!(
                    resource,
                    scope, "multiple active lease rows observed for one resource"
                );
                record_invariant_anomaly();
                Ok(false)
            }
        }
    }

    /// Inserts a fresh lease row for (resource, scope) expiring after
    /// `lifespan`.
    ///
    /// Callers must hold the blob-lease gate and have re-checked
    /// availability; the insert itself only guards against row-key reuse.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when `ct` fires, `OutOfRange` for a lifespan the
    /// timestamp arithmetic cannot represent, or the storage failure.
    pub async fn insert(
        &self,
        resource: &str,
        scope: &str,
        lifespan: Duration,
        ct: &CancellationToken,
    ) -> Result<JournalRecord> {
        if ct.is_cancelled() {
            return Err(LockError::Cancelled);
        }
        self.ensure_table().await?;

        let lifespan = chrono::Duration::from_std(lifespan)
            .map_err(|_| LockError::out_of_range("lease lifespan exceeds representable range"))?;
        let now = Utc::now();
        let record = JournalRecord {
            partition_key: partition_key(scope),
            row_key: new_row_key(),
            resource: resource.to_string(),
            scope: scope.to_string(),
            created_at: now,
            expires_at: now + lifespan,
            completed_at: completed_sentinel(),
        };

        match cancellable(ct, self.store.insert(&record)).await? {
            JournalWrite::Success { .. } => Ok(record),
            JournalWrite::PreconditionFailed => Err(LockError::Conflict {
                message: format!("journal row already exists for key {}", record.row_key),
            }),
        }
    }

    /// Extends the active row `id` by `period`.
    ///
    /// Returns false when no active row matches (released, expired, or never
    /// granted). The new expiry is the *previous* expiry plus `period`, so
    /// extension conserves whatever remained of the old lifespan.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when `ct` fires, `Conflict` after the retry
    /// budget, or the storage failure.
    pub async fn prolong(
        &self,
        id: &RecordId,
        period: Duration,
        ct: &CancellationToken,
    ) -> Result<bool> {
        let period = chrono::Duration::from_std(period)
            .map_err(|_| LockError::out_of_range("extension period exceeds representable range"))?;

        for attempt in 0..MAX_MERGE_ATTEMPTS {
            if ct.is_cancelled() {
                return Err(LockError::Cancelled);
            }
            let Some(found) = self.find_active(id, ct).await? else {
                return Ok(false);
            };

            let mut record = found.record;
            record.expires_at += period;
            match cancellable(ct, self.store.merge(&record, &found.etag)).await? {
                JournalWrite::Success { .. } => return Ok(true),
                JournalWrite::PreconditionFailed => {
                    record_merge_conflict("prolong");
                    debug!(row_key = %id.row_key, attempt, "version conflict extending lease, retrying from read");
                    backoff_sleep(attempt, ct).await?;
                }
            }
        }
        Err(LockError::Conflict {
            message: format!("could not extend lease after {MAX_MERGE_ATTEMPTS} attempts"),
        })
    }

    /// Marks the active row `id` completed. Idempotent: a missing, expired,
    /// or already-completed row returns silently.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when `ct` fires, `Conflict` after the retry
    /// budget, or the storage failure.
    pub async fn end(&self, id: &RecordId, ct: &CancellationToken) -> Result<()> {
        for attempt in 0..MAX_MERGE_ATTEMPTS {
            if ct.is_cancelled() {
                return Err(LockError::Cancelled);
            }
            let Some(found) = self.find_active(id, ct).await? else {
                return Ok(());
            };

            let mut record = found.record;
            record.completed_at = Utc::now();
            match cancellable(ct, self.store.merge(&record, &found.etag)).await? {
                JournalWrite::Success { .. } => return Ok(()),
                JournalWrite::PreconditionFailed => {
                    record_merge_conflict("end");
                    debug!(row_key = %id.row_key, attempt, "version conflict completing lease, retrying from read");
                    backoff_sleep(attempt, ct).await?;
                }
            }
        }
        Err(LockError::Conflict {
            message: format!("could not complete lease after {MAX_MERGE_ATTEMPTS} attempts"),
        })
    }

    async fn find_active(
        &self,
        id: &RecordId,
        ct: &CancellationToken,
    ) -> Result<Option<VersionedRecord>> {
        let filter = RecordFilter {
            partition_key: Some(id.partition_key.clone()),
            row_key: Some(id.row_key.clone()),
            completed_at: Some(completed_sentinel()),
            expires_after: Some(Utc::now()),
            page_size: Some(1),
            ..RecordFilter::default()
        };
        Ok(cancellable(ct, self.store.query(&filter))
            .await?
            .into_iter()
            .next())
    }

    async fn ensure_table(&self) -> Result<()> {
        self.table_ready
            .get_or_try_init(|| self.store.create_table_if_absent())
            .await?;
        Ok(())
    }
}

async fn backoff_sleep(attempt: u32, ct: &CancellationToken) -> Result<()> {
    let exponential = MERGE_BACKOFF_BASE.saturating_mul(1 << attempt.min(4));
    let delay = exponential.min(MERGE_BACKOFF_MAX) + Duration::from_millis(merge_jitter());
    tokio::select! {
        () = ct.cancelled() => Err(LockError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Generates random jitter for backoff (0-25ms).
fn merge_jitter() -> u64 {
    // Subsecond clock noise is plenty here; avoids a rand dependency.
    let seed = u64::from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    seed % 25
}
