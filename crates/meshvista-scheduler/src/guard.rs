use std::future::Future;
use std::time::{Duration, Instant};

use meshvista_collectors::{CollectorId, RunResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::pool::WorkerPool;
use crate::state::CollectorTable;

/// Re-entrancy check plus deadline around one collector invocation.
#[derive(Clone)]
pub struct ExecutionGuard {
    table: CollectorTable,
    pool: WorkerPool,
}

/// Clears the running flag when the guarded call ends, however it ends.
struct RunningFlag<'a> {
    table: &'a CollectorTable,
    id: CollectorId,
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.table.release(self.id);
    }
}

impl ExecutionGuard {
    pub fn new(table: CollectorTable, pool: WorkerPool) -> Self {
        Self { table, pool }
    }

    pub fn table(&self) -> &CollectorTable {
        &self.table
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run `work` for collector `id` on the worker pool, waiting at most
    /// `timeout`.
    ///
    /// A run that is already live for `id` makes this return
    /// [`RunResult::skipped`] without calling `work`, as does a pool that is
    /// already shut down. On timeout the work is
    /// left to finish in the background (and may still commit); only a unit
    /// still waiting for a permit is cancelled.
    pub async fn run_guarded<F, Fut>(
        &self,
        id: CollectorId,
        work: F,
        timeout: Duration,
    ) -> RunResult
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = RunResult> + Send + 'static,
    {
        if !self.table.try_claim(id) {
            debug!(collector = %id, "previous run still in progress, skipping");
            return RunResult::skipped();
        }
        let _running = RunningFlag {
            table: &self.table,
            id,
        };

        let started = Instant::now();
        let cancel = CancellationToken::new();
        let Some(handle) = self.pool.submit(cancel.clone(), work) else {
            warn!(collector = %id, "worker pool is shut down, not running");
            return RunResult::skipped_because("worker pool is shut down");
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Some(result))) => result,
            Ok(Ok(None)) => RunResult::skipped_because("run cancelled before start"),
            Ok(Err(e)) => {
                error!(collector = %id, error = %e, "collector task panicked");
                RunResult::failed(format!("collector task failed: {e}"))
                    .with_duration(started.elapsed())
            }
            Err(_) => {
                cancel.cancel();
                warn!(
                    collector = %id,
                    timeout_secs = timeout.as_secs(),
                    "collector timed out; work may still complete in the background"
                );
                RunResult::timed_out(timeout)
            }
        }
    }
}
