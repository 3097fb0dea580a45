//! Queues of local waiters, keyed by resource UID.
//!
//! A contender that did not acquire can park a request here; the ticker
//! periodically re-drives the head of each queue through the acquisition
//! protocol. Queue edits happen under one process-wide mutex so an enqueue
//! is atomic with respect to a tick-side dequeue of the same queue.
//!
//! Requests complete through a oneshot promise. A request whose token has
//! fired, or whose lease got acquired through another request, is no longer
//! *pending* and is swept when the queue head is next inspected.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::lease::LeaseState;

/// One parked acquisition request.
pub(crate) struct LeaseRequest {
    pub(crate) lease: Arc<LeaseState>,
    pub(crate) done: oneshot::Sender<()>,
    pub(crate) ct: CancellationToken,
}

impl LeaseRequest {
    /// A request stays pending until its token fires or its lease is
    /// acquired (possibly through a sibling request for the same handle).
    pub(crate) fn is_pending(&self) -> bool {
        !self.ct.is_cancelled() && !self.lease.is_acquired()
    }
}

/// Outcome of one head inspection.
pub(crate) enum HeadInspect {
    /// No queue, or the queue was empty (entry dropped).
    Empty,
    /// The head was no longer pending and has been dequeued.
    Swept,
    /// The head is pending; run the protocol for it.
    Pending(Arc<LeaseState>, CancellationToken),
}

/// Per-resource-UID FIFO queues of parked requests.
#[derive(Default)]
pub(crate) struct WaiterQueue {
    requests: StdMutex<HashMap<String, VecDeque<LeaseRequest>>>,
}

impl WaiterQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Parks a request for `lease` and returns its completion promise.
    pub(crate) fn enqueue(
        &self,
        lease: Arc<LeaseState>,
        ct: CancellationToken,
    ) -> oneshot::Receiver<()> {
        let (done, promise) = oneshot::channel();
        let mut requests = self.lock();
        requests
            .entry(lease.uid().to_string())
            .or_default()
            .push_back(LeaseRequest { lease, done, ct });
        promise
    }

    /// Returns the keys that currently have a queue.
    pub(crate) fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Inspects the head request for `key`, sweeping as it goes: an empty
    /// queue drops its map entry, a non-pending head is dequeued (and its
    /// promise completed when the lease was acquired through a sibling
    /// request).
    pub(crate) fn inspect_head(&self, key: &str) -> HeadInspect {
        let mut requests = self.lock();
        let Some(queue) = requests.get_mut(key) else {
            return HeadInspect::Empty;
        };
        let Some(front) = queue.front() else {
            requests.remove(key);
            return HeadInspect::Empty;
        };
        if front.is_pending() {
            return HeadInspect::Pending(Arc::clone(&front.lease), front.ct.clone());
        }
        if let Some(request) = queue.pop_front() {
            if request.lease.is_acquired() {
                let _ = request.done.send(());
            }
        }
        HeadInspect::Swept
    }

    /// Dequeues the head request for `key`.
    pub(crate) fn pop_head(&self, key: &str) -> Option<LeaseRequest> {
        self.lock().get_mut(key)?.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn queued(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, VecDeque::len)
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<LeaseRequest>>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
