//! Blob-lease gate: the cross-process critical-section guard.
//!
//! The gate is a short server-side blob lease taken on the resource's
//! coordination blob. It serialises *writers* across processes around the
//! journal's check-then-insert; it never represents the user-visible lease
//! itself.
//!
//! Alongside the backend lease, the gate runs a local countdown slightly
//! shorter than the backend TTL. The countdown fires an edge-triggered
//! expiry signal used to abort any in-flight journal write whose version
//! check could otherwise succeed after the backend has already expired the
//! lease and another process has entered the gate. The backend remains the
//! authoritative clock; the countdown is only a safety margin.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use palisade_core::blob::{BlobStore, LeaseAcquire, LeaseRelease};

use crate::cancel::cancellable;
use crate::error::{LockError, Result};

/// Server-side blob lease duration.
pub const BLOB_LEASE_TTL: Duration = Duration::from_secs(30);

/// Margin subtracted from the backend TTL for the local countdown.
const EXPIRY_MARGIN: Duration = Duration::from_secs(1);

/// Factory for per-resource gates over one blob container.
pub struct BlobLeaseGate {
    store: Arc<dyn BlobStore>,
    container: String,
    lease_ttl: Duration,
}

impl BlobLeaseGate {
    /// Creates a gate factory over `container` in `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
            lease_ttl: BLOB_LEASE_TTL,
        }
    }

    /// Overrides the backend lease duration.
    ///
    /// Useful for backends with a different lease window and for tests that
    /// need the expiry signal to fire quickly.
    #[must_use]
    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    pub(crate) fn set_lease_ttl(&mut self, lease_ttl: Duration) {
        self.lease_ttl = lease_ttl;
    }

    /// Attempts to enter the gate for `resource_uid`.
    ///
    /// Ensures the container and the zero-byte coordination blob exist, then
    /// tries the lease. A lease held elsewhere yields a gate with
    /// `is_acquired() == false`; that is a normal outcome.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when `ct` fires, or the storage failure.
    pub async fn try_acquire(&self, resource_uid: &str, ct: &CancellationToken) -> Result<Gate> {
        if ct.is_cancelled() {
            return Err(LockError::Cancelled);
        }
        cancellable(ct, self.store.create_container_if_absent(&self.container)).await?;
        cancellable(
            ct,
            self.store.create_blob_if_absent(&self.container, resource_uid),
        )
        .await?;

        let outcome = cancellable(
            ct,
            self.store
                .acquire_lease(&self.container, resource_uid, self.lease_ttl),
        )
        .await?;

        let mut gate = Gate {
            store: Arc::clone(&self.store),
            container: self.container.clone(),
            blob: resource_uid.to_string(),
            lease_id: None,
            expired: CancellationToken::new(),
            countdown: None,
            released: false,
        };

        if let LeaseAcquire::Acquired { lease_id } = outcome {
            gate.lease_id = Some(lease_id);
            gate.start_countdown(local_countdown(self.lease_ttl));
        }
        Ok(gate)
    }
}

/// The local countdown runs shorter than the backend TTL so the expiry
/// signal always precedes the backend's own expiration.
fn local_countdown(lease_ttl: Duration) -> Duration {
    lease_ttl.saturating_sub(EXPIRY_MARGIN.min(lease_ttl / 10))
}

/// One entered (or refused) gate on a resource's coordination blob.
pub struct Gate {
    store: Arc<dyn BlobStore>,
    container: String,
    blob: String,
    lease_id: Option<String>,
    expired: CancellationToken,
    countdown: Option<JoinHandle<()>>,
    released: bool,
}

impl Gate {
    /// Returns whether this gate currently holds the blob lease.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        self.lease_id.is_some() && !self.released
    }

    /// Edge-triggered signal fired once when the local countdown elapses
    /// before the gate is released.
    #[must_use]
    pub fn expired(&self) -> &CancellationToken {
        &self.expired
    }

    fn start_countdown(&mut self, after: Duration) {
        let signal = self.expired.clone();
        self.countdown = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            signal.cancel();
        }));
    }

    /// Releases the gate. Idempotent.
    ///
    /// Uses the caller's *outer* token so release still runs when an inner
    /// (linked) context was cancelled. "Lease no longer held" is swallowed
    /// with a warning; the backend had already reclaimed it.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when `ct` fires, or the storage failure.
    pub async fn release(&mut self, ct: &CancellationToken) -> Result<()> {
        if self.released {
            return Ok(());
        }
        if ct.is_cancelled() {
            return Err(LockError::Cancelled);
        }

        if let Some(countdown) = self.countdown.take() {
            countdown.abort();
        }
        self.released = true;

        if let Some(lease_id) = self.lease_id.take() {
            let outcome = cancellable(
                ct,
                self.store
                    .release_lease(&self.container, &self.blob, &lease_id),
            )
            .await?;
            if outcome == LeaseRelease::NotHeld {
                warn!(blob = %self.blob, "blob lease was no longer held at release");
            }
        }
        Ok(())
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        if let Some(countdown) = self.countdown.take() {
            countdown.abort();
        }
        if self.released {
            return;
        }
        if let Some(lease_id) = self.lease_id.take() {
            // Best-effort async release in destructor; prefer calling
            // release() explicitly.
            let store = Arc::clone(&self.store);
            let container = self.container.clone();
            let blob = self.blob.clone();
            tokio::spawn(async move {
                let _ = store.release_lease(&container, &blob, &lease_id).await;
            });
        }
    }
}
