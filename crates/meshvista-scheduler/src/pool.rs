use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Bounded pool for collector work.
///
/// Each unit holds a semaphore permit while it runs. Spawned units are
/// tracked so [`WorkerPool::shutdown`] can wait for stragglers, including
/// runs whose caller already gave up on them after a timeout.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Units spawned and not yet finished, including ones waiting for a permit.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Spawn `work` once a permit is free. Returns `None` after shutdown.
    ///
    /// Cancelling `cancel` only stops a unit that has not started yet; a unit
    /// that already holds a permit runs to completion. The task resolves to
    /// `None` when it was cancelled before starting.
    pub fn submit<F, Fut>(
        &self,
        cancel: CancellationToken,
        work: F,
    ) -> Option<JoinHandle<Option<Fut::Output>>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        if self.tracker.is_closed() {
            return None;
        }
        let permits = self.permits.clone();
        Some(self.tracker.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("work cancelled before start");
                    return None;
                }
                permit = permits.acquire_owned() => permit.ok()?,
            };
            Some(work().await)
        }))
    }

    /// Stop accepting work and wait for every spawned unit to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "waiting for in-flight collector work");
        }
        self.tracker.wait().await;
    }

    /// Accept work again after a shutdown.
    pub fn reopen(&self) {
        self.tracker.reopen();
    }
}
