//! Blob-store collaborator contract for server-side leases.
//!
//! The coordinator uses one zero-byte blob per resource UID and acquires a
//! short server-side lease on it as a critical-section guard. The contract
//! is deliberately narrow: create-if-absent for containers and blobs, and
//! lease acquire/release with an integer-second duration.
//!
//! "Lease already present" and "lease no longer held" are distinguished
//! *outcomes*, not errors: contention and late release are normal operation
//! for a lock service.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Result of a lease acquisition attempt.
#[derive(Debug, Clone)]
pub enum LeaseAcquire {
    /// The lease was granted; `lease_id` is the backend's native lease id.
    Acquired {
        /// Native lease id, required for release.
        lease_id: String,
    },
    /// Another holder currently owns the lease.
    AlreadyLeased,
}

/// Result of a lease release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseRelease {
    /// The lease was held and has been released.
    Released,
    /// The lease was no longer held (expired or broken); nothing to do.
    NotHeld,
}

/// Blob-store collaborator contract.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Creates the container if it does not exist. Idempotent.
    async fn create_container_if_absent(&self, container: &str) -> Result<()>;

    /// Creates a zero-byte blob if it does not exist. Idempotent.
    async fn create_blob_if_absent(&self, container: &str, blob: &str) -> Result<()>;

    /// Attempts to acquire a server-side lease on `blob` for `duration`.
    ///
    /// Returns [`LeaseAcquire::AlreadyLeased`] while another lease is live;
    /// that is a normal outcome, not an error.
    async fn acquire_lease(
        &self,
        container: &str,
        blob: &str,
        duration: Duration,
    ) -> Result<LeaseAcquire>;

    /// Releases a previously acquired lease.
    ///
    /// Returns [`LeaseRelease::NotHeld`] when `lease_id` no longer matches
    /// the live lease (it expired or was broken).
    async fn release_lease(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
    ) -> Result<LeaseRelease>;
}

/// In-memory blob store for tests and local development.
///
/// Leases expire by wall clock (`Instant`), matching backend behaviour where
/// an expired lease can be taken over by the next acquirer.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    containers: RwLock<HashMap<String, HashMap<String, BlobState>>>,
}

#[derive(Debug, Default, Clone)]
struct BlobState {
    lease: Option<ActiveLease>,
}

#[derive(Debug, Clone)]
struct ActiveLease {
    id: String,
    expires_at: Instant,
}

impl MemoryBlobStore {
    /// Creates a new empty blob store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create_container_if_absent(&self, container: &str) -> Result<()> {
        let mut containers = self.containers.write().map_err(|_| Error::Internal {
            message: "blob store lock poisoned".into(),
        })?;
        containers.entry(container.to_string()).or_default();
        Ok(())
    }

    async fn create_blob_if_absent(&self, container: &str, blob: &str) -> Result<()> {
        let mut containers = self.containers.write().map_err(|_| Error::Internal {
            message: "blob store lock poisoned".into(),
        })?;
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| Error::NotFound(format!("container not found: {container}")))?;
        blobs.entry(blob.to_string()).or_default();
        Ok(())
    }

    async fn acquire_lease(
        &self,
        container: &str,
        blob: &str,
        duration: Duration,
    ) -> Result<LeaseAcquire> {
        let mut containers = self.containers.write().map_err(|_| Error::Internal {
            message: "blob store lock poisoned".into(),
        })?;
        let state = containers
            .get_mut(container)
            .and_then(|blobs| blobs.get_mut(blob))
            .ok_or_else(|| Error::NotFound(format!("blob not found: {container}/{blob}")))?;

        if let Some(lease) = &state.lease {
            if lease.expires_at > Instant::now() {
                return Ok(LeaseAcquire::AlreadyLeased);
            }
        }

        let lease_id = Uuid::new_v4().simple().to_string();
        state.lease = Some(ActiveLease {
            id: lease_id.clone(),
            expires_at: Instant::now() + duration,
        });
        Ok(LeaseAcquire::Acquired { lease_id })
    }

    async fn release_lease(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
    ) -> Result<LeaseRelease> {
        let mut containers = self.containers.write().map_err(|_| Error::Internal {
            message: "blob store lock poisoned".into(),
        })?;
        let state = containers
            .get_mut(container)
            .and_then(|blobs| blobs.get_mut(blob))
            .ok_or_else(|| Error::NotFound(format!("blob not found: {container}/{blob}")))?;

        match &state.lease {
            Some(lease) if lease.id == lease_id && lease.expires_at > Instant::now() => {
                state.lease = None;
                Ok(LeaseRelease::Released)
            }
            _ => Ok(LeaseRelease::NotHeld),
        }
    }
}
