//! Composition of independent cancellation signals.
//!
//! `CancellationToken` hierarchies only propagate parent-to-child, but the
//! guarded section of the acquisition protocol must abort when *any* of the
//! caller's token, the process-shutdown token, or the gate's expiry signal
//! fires. `LinkedCancellation` bridges the three through a forwarder task
//! whose lifetime is tied to the link itself.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{LockError, Result};

/// Awaits a storage call, aborting it when `ct` fires.
///
/// Storage futures are dropped on cancellation, which is what makes the
/// gate's expiry signal able to stop an in-flight journal write.
pub(crate) async fn cancellable<T>(
    ct: &CancellationToken,
    call: impl Future<Output = palisade_core::Result<T>>,
) -> Result<T> {
    tokio::select! {
        () = ct.cancelled() => Err(LockError::Cancelled),
        result = call => result.map_err(LockError::from),
    }
}

/// A token cancelled as soon as any of its source tokens is cancelled.
#[derive(Debug)]
pub(crate) struct LinkedCancellation {
    token: CancellationToken,
    forwarder: JoinHandle<()>,
}

impl LinkedCancellation {
    /// Links three independent tokens into one.
    pub(crate) fn new(
        first: &CancellationToken,
        second: &CancellationToken,
        third: &CancellationToken,
    ) -> Self {
        let token = CancellationToken::new();
        let fired = token.clone();
        let (first, second, third) = (first.clone(), second.clone(), third.clone());
        let forwarder = tokio::spawn(async move {
            tokio::select! {
                () = first.cancelled() => {}
                () = second.cancelled() => {}
                () = third.cancelled() => {}
            }
            fired.cancel();
        });
        Self { token, forwarder }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for LinkedCancellation {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
