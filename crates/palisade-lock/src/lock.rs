//! The lock coordinator: composes the per-key serialiser, the blob-lease
//! gate, and the journal repository into a correct distributed lock.
//!
//! # Acquisition protocol
//!
//! For one (resource, scope), executed under the per-key serialiser:
//!
//! 1. **Pre-check** availability in the journal. Taken resources return an
//!    unacquired lease without touching the gate.
//! 2. **Enter the gate**: a short server-side blob lease on the resource
//!    UID. A gate held elsewhere also returns an unacquired lease.
//! 3. **Re-check** availability inside the gate, under a context linked to
//!    the caller's token, the shutdown token, and the gate's expiry signal.
//! 4. **Insert** a fresh journal row while the gate still holds.
//! 5. **Release the gate** on every exit path, using the caller's outer
//!    token so release survives inner cancellation.
//!
//! The blob lease serialises writers across processes; the re-check inside
//! the gate prevents inserting over an existing active row; the linked
//! expiry signal aborts an insert the backend might otherwise land after
//! the gate has already passed to another process.
//!
//! Contenders that did not acquire may park on the lease via
//! [`Lease::wait`]; a periodic ticker (and an out-of-band tick on every
//! release) re-drives the head of each waiter queue through the same
//! protocol.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument as _};

use palisade_core::blob::BlobStore;
use palisade_core::identity::{normalize, RecordId, DEFAULT_SCOPE};
use palisade_core::journal::JournalStore;
use palisade_core::observability::lock_span;

use crate::cancel::LinkedCancellation;
use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::gate::BlobLeaseGate;
use crate::keyed::KeyedMutex;
use crate::lease::{Grant, Lease, LeaseState};
use crate::metrics::{record_acquire_outcome, record_waiter_promotion};
use crate::repository::JournalRepository;
use crate::waiter::{HeadInspect, WaiterQueue};

/// Distributed mutual-exclusion coordinator.
///
/// Cheap to clone; clones share one coordinator. Construction spawns the
/// promotion ticker, so a Tokio runtime must be current.
///
/// # Example
///
/// ```rust,ignore
/// let config = LockConfig::new(connection_string);
/// let lock = GlobalLock::new(&config, journal_store, blob_store)?;
///
/// let lease = lock.try_acquire("tenant-1", &ct).await?;
/// if lease.is_acquired() {
///     // critical section
///     lease.release(&ct).await?;
/// }
/// ```
pub struct GlobalLock {
    inner: Arc<LockInner>,
}

impl Clone for GlobalLock {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct LockInner {
    default_lifespan: Duration,
    journal: JournalRepository,
    gate: BlobLeaseGate,
    keyed: KeyedMutex,
    waiters: WaiterQueue,
    shutdown: CancellationToken,
    tick_notify: Arc<Notify>,
}

impl GlobalLock {
    /// Creates a coordinator over the given storage collaborators.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` or `OutOfRange` when `config` does not
    /// validate.
    pub fn new(
        config: &LockConfig,
        journal_store: Arc<dyn JournalStore>,
        blob_store: Arc<dyn BlobStore>,
    ) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new(LockInner {
            default_lifespan: config.default_lease_lifespan(),
            journal: JournalRepository::new(journal_store),
            gate: BlobLeaseGate::new(blob_store, config.container_name.clone()),
            keyed: KeyedMutex::new(),
            waiters: WaiterQueue::new(),
            shutdown: CancellationToken::new(),
            tick_notify: Arc::new(Notify::new()),
        });
        spawn_ticker(&inner, config.acquirement_interval());
        Ok(Self { inner })
    }

    /// Overrides the backend blob-lease duration.
    ///
    /// Only meaningful right after construction, before the coordinator is
    /// cloned or shared.
    #[must_use]
    pub fn with_blob_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.gate.set_lease_ttl(lease_ttl);
        }
        self
    }

    /// Attempts to acquire `resource` in the default scope with the default
    /// lifespan.
    ///
    /// # Errors
    ///
    /// See [`GlobalLock::try_acquire_scoped`].
    pub async fn try_acquire(&self, resource: &str, ct: &CancellationToken) -> Result<Lease> {
        self.try_acquire_scoped(resource, DEFAULT_SCOPE, self.inner.default_lifespan, ct)
            .await
    }

    /// Attempts to acquire `resource` within `scope` for `lifespan`.
    ///
    /// Always returns a [`Lease`]; a contended resource yields one with
    /// `is_acquired() == false`, which the caller may park on via
    /// [`Lease::wait`]. "Did not acquire" is never an error.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty or whitespace resource or
    /// scope, `OutOfRange` for a zero lifespan, `Cancelled` when `ct` is
    /// already cancelled (before any backend call) or fires mid-flight, and
    /// the storage failure otherwise.
    pub async fn try_acquire_scoped(
        &self,
        resource: &str,
        scope: &str,
        lifespan: Duration,
        ct: &CancellationToken,
    ) -> Result<Lease> {
        let resource = required(resource, "resource")?;
        let scope = required(scope, "scope")?;
        if lifespan.is_zero() {
            return Err(LockError::out_of_range("lease lifespan must be positive"));
        }
        if ct.is_cancelled() {
            return Err(LockError::Cancelled);
        }

        let state = Arc::new(LeaseState::new(resource, scope, lifespan));
        let inner = Arc::clone(&self.inner);
        let work_state = Arc::clone(&state);
        let work_ct = ct.clone();
        let grant = self
            .inner
            .keyed
            .run(state.uid(), ct, async move {
                inner.attempt(&work_state, &work_ct).await
            })
            .await?;

        if let Some(grant) = grant {
            state.set_grant(grant);
        }
        Ok(Lease::new(state, Arc::downgrade(&self.inner)))
    }

    /// Extends the lease behind `lease_id` by the default lifespan.
    ///
    /// # Errors
    ///
    /// See [`GlobalLock::try_extend_by`].
    pub async fn try_extend(&self, lease_id: &str, ct: &CancellationToken) -> Result<bool> {
        self.try_extend_by(lease_id, self.inner.default_lifespan, ct)
            .await
    }

    /// Extends the lease behind `lease_id` by `period`.
    ///
    /// Returns false when the lease is no longer active (released, expired,
    /// or unknown).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty or malformed lease id,
    /// `OutOfRange` for a zero period, `Cancelled` when `ct` fires,
    /// `Conflict` past the version-conflict retry budget, and the storage
    /// failure otherwise.
    pub async fn try_extend_by(
        &self,
        lease_id: &str,
        period: Duration,
        ct: &CancellationToken,
    ) -> Result<bool> {
        let id = decode_lease_id(lease_id)?;
        if period.is_zero() {
            return Err(LockError::out_of_range("extension period must be positive"));
        }
        if ct.is_cancelled() {
            return Err(LockError::Cancelled);
        }
        self.inner.journal.prolong(&id, period, ct).await
    }

    /// Releases the lease behind `lease_id` and schedules one promotion
    /// tick. Idempotent: an already-completed or unknown lease returns
    /// silently.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty or malformed lease id,
    /// `Cancelled` when `ct` fires, `Conflict` past the version-conflict
    /// retry budget, and the storage failure otherwise.
    pub async fn release(&self, lease_id: &str, ct: &CancellationToken) -> Result<()> {
        let id = decode_lease_id(lease_id)?;
        if ct.is_cancelled() {
            return Err(LockError::Cancelled);
        }
        self.inner.journal.end(&id, ct).await?;
        self.inner.schedule_tick();
        Ok(())
    }

    /// Cancels the process-wide token and stops the ticker. In-flight
    /// operations observe the cancellation at their next suspension point.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl LockInner {
    pub(crate) fn journal(&self) -> &JournalRepository {
        &self.journal
    }

    pub(crate) fn waiters(&self) -> &WaiterQueue {
        &self.waiters
    }

    /// Schedules one out-of-band promotion tick.
    ///
    /// Runs nothing in place: the ticker task picks the notification up, so
    /// a release never re-enters the acquisition path on the caller's task.
    pub(crate) fn schedule_tick(&self) {
        self.tick_notify.notify_one();
    }

    /// Runs the acquisition protocol for `lease`. Must be called under the
    /// per-key serialiser for `lease.uid()`.
    pub(crate) async fn attempt(
        &self,
        lease: &LeaseState,
        ct: &CancellationToken,
    ) -> Result<Option<Grant>> {
        if ct.is_cancelled() || self.shutdown.is_cancelled() {
            return Err(LockError::Cancelled);
        }

        let span = lock_span("try_acquire", lease.resource(), lease.scope());
        async {
            if !self
                .journal
                .is_resource_available(lease.resource(), lease.scope(), ct)
                .await?
            {
                record_acquire_outcome("unavailable");
                debug!("resource already held, returning unacquired");
                return Ok(None);
            }

            let mut gate = self.gate.try_acquire(lease.uid(), ct).await?;
            if !gate.is_acquired() {
                record_acquire_outcome("gate_contended");
                debug!("gate held by another process, returning unacquired");
                return Ok(None);
            }

            let linked = LinkedCancellation::new(ct, &self.shutdown, gate.expired());
            let guarded = self.guarded_insert(lease, linked.token()).await;
            drop(linked);

            // Outer token: the release must survive inner cancellation.
            let release_outcome = gate.release(ct).await;
            let grant = guarded?;
            release_outcome?;

            if grant.is_some() {
                record_acquire_outcome("acquired");
            }
            Ok(grant)
        }
        .instrument(span)
        .await
    }

    /// The gate-guarded section: re-check, then insert.
    async fn guarded_insert(
        &self,
        lease: &LeaseState,
        linked: &CancellationToken,
    ) -> Result<Option<Grant>> {
        if !self
            .journal
            .is_resource_available(lease.resource(), lease.scope(), linked)
            .await?
        {
            record_acquire_outcome("unavailable");
            debug!("resource taken between pre-check and gate entry");
            return Ok(None);
        }
        let record = self
            .journal
            .insert(lease.resource(), lease.scope(), lease.lifespan(), linked)
            .await?;
        Ok(Some(Grant {
            record_id: record.record_id(),
            expires_at: record.expires_at,
        }))
    }

    /// One promotion pass for `key`'s waiter queue. Must be called under
    /// the per-key serialiser for `key`.
    async fn try_acquire_pending(&self, key: &str) -> Result<()> {
        let (lease, ct) = match self.waiters.inspect_head(key) {
            HeadInspect::Empty | HeadInspect::Swept => return Ok(()),
            HeadInspect::Pending(lease, ct) => (lease, ct),
        };

        match self.attempt(&lease, &ct).await {
            Ok(Some(grant)) => {
                lease.set_grant(grant);
                record_waiter_promotion();
                if let Some(request) = self.waiters.pop_head(key) {
                    let _ = request.done.send(());
                }
                Ok(())
            }
            // Still contended; the head stays parked for the next tick.
            Ok(None) => Ok(()),
            // The head's token fired mid-attempt; it is swept next pass.
            Err(LockError::Cancelled) => Ok(()),
            Err(error) => {
                warn!(key = %key, error = %error, "waiter promotion attempt failed");
                Ok(())
            }
        }
    }

    /// Posts one promotion pass per queued key through the serialiser.
    fn run_tick(self: &Arc<Self>) {
        for key in self.waiters.keys() {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let shutdown = inner.shutdown.clone();
                let worker = Arc::clone(&inner);
                let work_key = key.clone();
                let outcome = inner
                    .keyed
                    .run(&key, &shutdown, async move {
                        worker.try_acquire_pending(&work_key).await
                    })
                    .await;
                if let Err(error) = outcome {
                    debug!(key = %key, error = %error, "promotion pass ended early");
                }
            });
        }
    }
}

impl Drop for LockInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_ticker(inner: &Arc<LockInner>, period: Duration) {
    let weak: Weak<LockInner> = Arc::downgrade(inner);
    let shutdown = inner.shutdown.clone();
    let notify = Arc::clone(&inner.tick_notify);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately; consume it.
        ticker.tick().await;
        loop {
            // No strong reference is held while idle, so dropping the last
            // coordinator handle tears the ticker down via its Drop.
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                () = notify.notified() => {}
            }
            let Some(inner) = weak.upgrade() else { break };
            inner.run_tick();
        }
    });
}

fn required(value: &str, what: &str) -> Result<String> {
    let normalized = normalize(value);
    if normalized.is_empty() {
        return Err(LockError::invalid_argument(format!(
            "{what} must not be empty"
        )));
    }
    Ok(normalized)
}

fn decode_lease_id(lease_id: &str) -> Result<RecordId> {
    let trimmed = lease_id.trim();
    if trimmed.is_empty() {
        return Err(LockError::invalid_argument("lease id must not be empty"));
    }
    RecordId::decode(trimmed)
        .ok_or_else(|| LockError::invalid_argument("lease id is not a valid encoded record id"))
}
