//! # palisade-lock
//!
//! Distributed mutual-exclusion coordinator for Palisade.
//!
//! Grants mutually exclusive, time-bounded leases on named resources to
//! processes on different machines, without a dedicated lock server. All
//! coordination state lives in two weak storage primitives:
//!
//! - a **journal table** with conditional (version-tag) record updates, and
//! - a short server-side **blob lease** with a hard expiration.
//!
//! The coordinator composes them: the blob lease acts purely as a
//! critical-section guard around a check-then-insert on the journal, an
//! in-process serialiser orders local contenders per resource, and a ticker
//! re-drives parked waiters.
//!
//! ## Guarantees
//!
//! - At most one active journal row per (resource, scope): cross-process
//!   mutual exclusion.
//! - FIFO ordering of contenders *within* one process; cross-process order
//!   follows whoever wins the blob lease.
//! - Contention is never an error: callers receive an unacquired
//!   [`Lease`] they can park on.
//!
//! ## Non-guarantees
//!
//! - No strict cross-process FIFO fairness.
//! - No automatic lease renewal: extend explicitly via
//!   [`GlobalLock::try_extend`].
//! - Under a network partition, acquisition may keep returning unacquired
//!   leases until the backend is reachable again.
//!
//! ## Example
//!
//! ```rust,ignore
//! use palisade_core::{MemoryBlobStore, MemoryJournalStore};
//! use palisade_lock::{GlobalLock, LockConfig};
//!
//! let config = LockConfig::new(connection_string);
//! let lock = GlobalLock::new(&config, journal_store, blob_store)?;
//!
//! let lease = lock.try_acquire("tenant-1", &ct).await?;
//! if !lease.is_acquired() {
//!     lease.wait(&ct).await?; // park until promoted
//! }
//! // ... critical section ...
//! lease.release(&ct).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

mod cancel;
pub mod config;
pub mod error;
pub mod gate;
mod keyed;
pub mod lease;
pub mod lock;
pub mod metrics;
pub mod repository;
mod waiter;

pub use config::LockConfig;
pub use error::{LockError, Result};
pub use gate::{BlobLeaseGate, Gate};
pub use lease::Lease;
pub use lock::GlobalLock;
pub use repository::JournalRepository;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::LockConfig;
    pub use crate::error::{LockError, Result};
    pub use crate::lease::Lease;
    pub use crate::lock::GlobalLock;
}
