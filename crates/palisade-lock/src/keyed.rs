//! Per-key serialisation of acquisition work.
//!
//! Every acquisition attempt and waiter promotion for a resource UID runs
//! through a capacity-1 async mutex keyed by that UID, so at most one
//! in-process task works a given resource at a time. Tokio mutexes wake
//! waiters in FIFO order, which gives local contenders fair ordering.
//!
//! Mutexes are created on demand and held in the map as weak references:
//! once no task references a key's mutex it is reclaimed, and dead entries
//! are purged whenever a new key is inserted. A reclaimed mutex can never be
//! observed locked, since reclamation requires every owner (and therefore
//! every guard) to be gone.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{LockError, Result};

/// Map of per-key capacity-1 mutexes with weak caching.
#[derive(Debug, Default)]
pub(crate) struct KeyedMutex {
    entries: StdMutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl KeyedMutex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Runs `work` while holding `key`'s mutex, releasing on every exit
    /// path. Waiting for the mutex is aborted when `ct` fires.
    pub(crate) async fn run<T, F>(&self, key: &str, ct: &CancellationToken, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mutex = self.handle(key);
        let _guard = tokio::select! {
            () = ct.cancelled() => return Err(LockError::Cancelled),
            guard = Arc::clone(&mutex).lock_owned() => guard,
        };
        work.await
    }

    fn handle(&self, key: &str) -> Arc<Mutex<()>> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = entries.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        let fresh = Arc::new(Mutex::new(()));
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.insert(key.to_string(), Arc::downgrade(&fresh));
        fresh
    }

    #[cfg(test)]
    fn cached_keys(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
