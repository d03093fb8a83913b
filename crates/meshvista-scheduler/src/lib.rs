//! `meshvista-scheduler`: background collection scheduling.
//!
//! # Overview
//!
//! The [`Scheduler`] owns one trigger per collector plus a daily retention
//! cleanup. A single engine task ticks every second and dispatches due jobs
//! onto their own tasks. Each collector run goes through the
//! [`ExecutionGuard`]:
//!
//! 1. skip if the same collector is still running (check-and-set under the
//!    shared [`CollectorTable`] lock),
//! 2. run on the bounded [`WorkerPool`],
//! 3. stop waiting after the configured timeout; the work itself is not
//!    interrupted and `stop()` drains it.
//!
//! Outcomes feed the [`HealthTracker`]. A clean device success additionally
//! triggers the one-shot [`MigrationRetry`] and DNS regeneration.

pub mod engine;
pub mod error;
pub mod guard;
pub mod health;
pub mod pool;
pub mod retry;
pub mod schedule;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

pub use engine::{DnsRegenerator, Scheduler, SchedulerConfig, SchedulerDeps};
pub use error::{Result, SchedulerError};
pub use guard::ExecutionGuard;
pub use health::{CollectorHealth, HealthStatus, HealthTracker};
pub use pool::WorkerPool;
pub use retry::{MigrationRetry, RetryOutcome};
pub use state::CollectorTable;
pub use types::{CollectorJob, JobId, Trigger};
