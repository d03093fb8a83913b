use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meshvista_api::MeshApi;
use meshvista_storage::{MigrationReport, MigrationRunner};
use tracing::{debug, error, info};

/// What [`MigrationRetry::maybe_retry`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    AlreadyAttempted,
    NotAuthenticated,
    Completed(MigrationReport),
    Failed(String),
}

/// One-shot rerun of migrations that were skipped at startup for lack of API
/// access. Attempted at most once per process, whether it succeeds or not.
pub struct MigrationRetry {
    runner: Arc<dyn MigrationRunner>,
    skipped: Vec<String>,
    attempted: AtomicBool,
}

impl MigrationRetry {
    pub fn new(runner: Arc<dyn MigrationRunner>, skipped: Vec<String>) -> Self {
        Self {
            runner,
            skipped,
            attempted: AtomicBool::new(false),
        }
    }

    pub fn attempted(&self) -> bool {
        self.attempted.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub async fn maybe_retry(&self, api: &dyn MeshApi) -> RetryOutcome {
        if self.attempted() {
            return RetryOutcome::AlreadyAttempted;
        }
        if !api.is_authenticated() {
            debug!("migration retry deferred: API not authenticated");
            return RetryOutcome::NotAuthenticated;
        }
        // claim before running so concurrent successes cannot both retry
        if self
            .attempted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return RetryOutcome::AlreadyAttempted;
        }

        info!(skipped = ?self.skipped, "retrying auth-dependent migrations");
        match self.runner.run(Some(api), true).await {
            Ok(report) => {
                info!(
                    applied = ?report.applied,
                    still_skipped = report.skipped_needs_auth.len(),
                    "migration retry completed"
                );
                RetryOutcome::Completed(report)
            }
            Err(e) => {
                error!(error = %e, "migration retry failed");
                RetryOutcome::Failed(e.to_string())
            }
        }
    }
}
