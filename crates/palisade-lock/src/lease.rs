//! The user-visible lease handle.
//!
//! A [`Lease`] is returned by every acquisition attempt, acquired or not.
//! Its shared state is also what a queued waiter request points at, so a
//! promotion by the ticker becomes visible through the same handle the
//! caller already holds.

use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use palisade_core::identity::{resource_uid, RecordId};

use crate::error::{LockError, Result};
use crate::lock::LockInner;

/// The granted journal row: its id and current expiry.
#[derive(Debug, Clone)]
pub(crate) struct Grant {
    pub(crate) record_id: RecordId,
    pub(crate) expires_at: DateTime<Utc>,
}

/// Shared lease state: the identity of the request plus the grant, if any.
pub(crate) struct LeaseState {
    resource: String,
    scope: String,
    lifespan: Duration,
    uid: String,
    grant: StdMutex<Option<Grant>>,
}

impl LeaseState {
    /// Creates unacquired state for normalised (resource, scope).
    pub(crate) fn new(resource: String, scope: String, lifespan: Duration) -> Self {
        let uid = resource_uid(&resource, &scope);
        Self {
            resource,
            scope,
            lifespan,
            uid,
            grant: StdMutex::new(None),
        }
    }

    pub(crate) fn resource(&self) -> &str {
        &self.resource
    }

    pub(crate) fn scope(&self) -> &str {
        &self.scope
    }

    pub(crate) fn lifespan(&self) -> Duration {
        self.lifespan
    }

    pub(crate) fn uid(&self) -> &str {
        &self.uid
    }

    /// Acquired means granted and not yet past its expiry.
    pub(crate) fn is_acquired(&self) -> bool {
        self.with_grant(|grant| {
            grant
                .as_ref()
                .is_some_and(|g| g.expires_at > Utc::now())
        })
    }

    pub(crate) fn lease_id(&self) -> Option<String> {
        self.with_grant(|grant| grant.as_ref().map(|g| g.record_id.encode()))
    }

    pub(crate) fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.with_grant(|grant| grant.as_ref().map(|g| g.expires_at))
    }

    pub(crate) fn set_grant(&self, new_grant: Grant) {
        self.with_grant(|grant| *grant = Some(new_grant));
    }

    /// Takes the grant if the lease is still acquired; expired grants are
    /// left in place so `lease_id()` keeps reporting the historical id.
    pub(crate) fn take_active_grant(&self) -> Option<Grant> {
        self.with_grant(|grant| {
            if grant.as_ref().is_some_and(|g| g.expires_at > Utc::now()) {
                grant.take()
            } else {
                None
            }
        })
    }

    fn with_grant<T>(&self, f: impl FnOnce(&mut Option<Grant>) -> T) -> T {
        let mut guard = self.grant.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// A time-bounded, exclusive grant on a (resource, scope) pair, or the
/// still-unacquired intent to obtain one.
///
/// Dropping an acquired lease releases it best-effort; call
/// [`Lease::release`] for a release whose outcome you can observe.
pub struct Lease {
    state: Arc<LeaseState>,
    coordinator: Weak<LockInner>,
}

impl Lease {
    pub(crate) fn new(state: Arc<LeaseState>, coordinator: Weak<LockInner>) -> Self {
        Self { state, coordinator }
    }

    /// The normalised resource name this lease addresses.
    #[must_use]
    pub fn resource(&self) -> &str {
        self.state.resource()
    }

    /// The normalised scope this lease addresses.
    #[must_use]
    pub fn scope(&self) -> &str {
        self.state.scope()
    }

    /// The opaque lease id, once granted. Stays populated after expiry so
    /// late bookkeeping can still reference the historical grant.
    #[must_use]
    pub fn lease_id(&self) -> Option<String> {
        self.state.lease_id()
    }

    /// Whether this lease currently holds the resource: granted and not yet
    /// past its expiry. Flips to false once the lifespan elapses.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        self.state.is_acquired()
    }

    /// The grant's current expiry, if granted.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.state.expires_at()
    }

    /// Waits until this lease is acquired.
    ///
    /// Returns immediately when already acquired; otherwise parks a request
    /// with the waiter system and completes when the ticker promotes it.
    /// Repeated calls are allowed and park independent requests.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when `ct` fires, or when the coordinator has
    /// shut down. The parked request is swept at its queue's next
    /// inspection.
    pub async fn wait(&self, ct: &CancellationToken) -> Result<()> {
        if self.state.is_acquired() {
            return Ok(());
        }
        if ct.is_cancelled() {
            return Err(LockError::Cancelled);
        }
        let Some(coordinator) = self.coordinator.upgrade() else {
            return Err(LockError::Cancelled);
        };

        // The request owns a child of the caller's token, so its lifetime
        // ends with the request instead of leaking past a cancelled wait.
        let promise = coordinator
            .waiters()
            .enqueue(Arc::clone(&self.state), ct.child_token());
        drop(coordinator);

        tokio::select! {
            () = ct.cancelled() => Err(LockError::Cancelled),
            outcome = promise => match outcome {
                Ok(()) => Ok(()),
                // The request was swept; only valid if a sibling request
                // already acquired for us.
                Err(_) if self.state.is_acquired() => Ok(()),
                Err(_) => Err(LockError::Cancelled),
            },
        }
    }

    /// Releases this lease if currently acquired; a no-op otherwise.
    ///
    /// Completes the journal row and schedules one promotion tick so the
    /// next local waiter is considered promptly.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when `ct` fires, or the storage failure. The
    /// grant is restored on failure so the release can be retried.
    pub async fn release(&self, ct: &CancellationToken) -> Result<()> {
        if ct.is_cancelled() {
            return Err(LockError::Cancelled);
        }
        let Some(grant) = self.state.take_active_grant() else {
            return Ok(());
        };
        let Some(coordinator) = self.coordinator.upgrade() else {
            return Ok(());
        };

        match coordinator.journal().end(&grant.record_id, ct).await {
            Ok(()) => {
                coordinator.schedule_tick();
                Ok(())
            }
            Err(error) => {
                self.state.set_grant(grant);
                Err(error)
            }
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(grant) = self.state.take_active_grant() else {
            return;
        };
        let Some(coordinator) = self.coordinator.upgrade() else {
            return;
        };
        // Best-effort scoped release; prefer calling release() explicitly.
        tokio::spawn(async move {
            let ct = CancellationToken::new();
            if coordinator.journal().end(&grant.record_id, &ct).await.is_ok() {
                coordinator.schedule_tick();
            }
        });
    }
}
