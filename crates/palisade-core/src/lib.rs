//! # palisade-core
//!
//! Core contracts for Palisade, a distributed mutual-exclusion service that
//! grants time-bounded leases on named resources without a dedicated lock
//! server. All coordination state lives in an external storage backend.
//!
//! This crate provides the pieces shared by every Palisade component:
//!
//! - **Resource Identity**: hashing of (resource, scope) pairs into journal
//!   keys and blob names, plus the opaque lease-id codec
//! - **Journal Model**: the lease record schema and the journal-table
//!   collaborator contract with conditional (ETag) writes
//! - **Blob Leases**: the blob-store collaborator contract for short
//!   server-side leases used as critical-section guards
//! - **Error Types**: shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `palisade-core` defines the storage seam only. The coordinator that
//! composes these primitives into a correct distributed lock lives in
//! `palisade-lock`; real backend SDK bindings live outside this repository
//! and implement the traits defined here. In-memory implementations are
//! provided for tests and local development.
//!
//! ## Example
//!
//! ```rust
//! use palisade_core::identity::{new_row_key, partition_key, resource_uid, RecordId};
//!
//! let uid = resource_uid("tenant-1", "default");
//! assert_eq!(uid.len(), 32);
//!
//! let id = RecordId::new(new_row_key(), partition_key("default"));
//! let lease_id = id.encode();
//! assert_eq!(RecordId::decode(&lease_id), Some(id));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod blob;
pub mod error;
pub mod identity;
pub mod journal;
pub mod observability;

pub use blob::{BlobStore, LeaseAcquire, LeaseRelease, MemoryBlobStore};
pub use error::{Error, Result};
pub use identity::{new_row_key, normalize, partition_key, resource_uid, RecordId, DEFAULT_SCOPE};
pub use journal::{
    completed_sentinel, JournalRecord, JournalStore, JournalWrite, MemoryJournalStore,
    RecordFilter, VersionedRecord,
};
pub use observability::{init_logging, LogFormat};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use palisade_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::blob::{BlobStore, LeaseAcquire, LeaseRelease, MemoryBlobStore};
    pub use crate::error::{Error, Result};
    pub use crate::identity::{
        new_row_key, normalize, partition_key, resource_uid, RecordId, DEFAULT_SCOPE,
    };
    pub use crate::journal::{
        completed_sentinel, JournalRecord, JournalStore, JournalWrite, MemoryJournalStore,
        RecordFilter, VersionedRecord,
    };
}
