//! Bookkeeping for in-flight requests.
//!
//! Each live request owns a [`CancellationToken`] registered under its id. The entry is
//! removed by the [`RequestGuard`] when the request finishes, however it finishes.
use super::{HandlerError, RequestId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct InFlightRequest {
    /// Distinguishes successive requests that reuse the same id.
    seq: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct RequestRegistry {
    requests: Mutex<HashMap<RequestId, InFlightRequest>>,
    next_seq: AtomicU64,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` as live. Fails if a request with that id is still running.
    pub fn register(&self, id: RequestId) -> Result<RequestGuard<'_>, HandlerError> {
        let mut requests = self.lock();
        if requests.contains_key(&id) {
            return Err(HandlerError::RequestInProgress(id));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        requests.insert(
            id,
            InFlightRequest {
                seq,
                cancel: cancel.clone(),
            },
        );

        Ok(RequestGuard {
            registry: self,
            id,
            seq,
            cancel,
        })
    }

    /// Fires the cancellation token of `id`. Returns `false` when no such request is live.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.lock().get(&id) {
            Some(request) => {
                request.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self, id: RequestId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, InFlightRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a request registered for as long as it lives.
#[derive(Debug)]
pub struct RequestGuard<'a> {
    registry: &'a RequestRegistry,
    id: RequestId,
    seq: u64,
    cancel: CancellationToken,
}

impl RequestGuard<'_> {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        let mut requests = self.registry.lock();
        if requests.get(&self.id).is_some_and(|r| r.seq == self.seq) {
            requests.remove(&self.id);
        }
    }
}
