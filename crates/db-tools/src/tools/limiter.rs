//! Bounded concurrency with a bounded FIFO wait queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::outcome::Failure;

/// Admits at most `limit` concurrent holders; up to `queue_depth` more wait in
/// arrival order. Anything beyond that is refused with backpressure.
#[derive(Debug)]
pub struct Limiter {
    scope: String,
    limit: usize,
    queue_depth: usize,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
}

impl Limiter {
    pub fn new(scope: impl Into<String>, limit: usize, queue_depth: usize) -> Self {
        Self {
            scope: scope.into(),
            limit,
            queue_depth,
            semaphore: Arc::new(Semaphore::new(limit)),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Acquire a slot, waiting if necessary. The slot is released when the
    /// returned permit is dropped, including when this future is cancelled.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, Failure> {
        // Tokio hands released permits straight to queued waiters, so this
        // only succeeds when nobody is ahead of us.
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(permit);
        }

        if self.waiting.fetch_add(1, Ordering::SeqCst) >= self.queue_depth {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(Failure::backpressure(&self.scope));
        }
        let _waiting = WaitingGuard(&self.waiting);

        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Failure::backpressure(&self.scope))
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
