use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshvista_api::MeshApi;
use meshvista_collectors::{run_collector, Collector, CollectorId, RunResult};
use meshvista_core::config::{MeshvistaConfig, ROUTING_INTERVAL_SECS};
use meshvista_storage::{Database, RetentionCleanup};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::guard::ExecutionGuard;
use crate::health::{CollectorHealth, HealthTracker};
use crate::pool::WorkerPool;
use crate::retry::MigrationRetry;
use crate::schedule::compute_next_run;
use crate::state::CollectorTable;
use crate::types::{CollectorJob, JobId, Trigger};

/// Regenerates DNS host entries after a successful device collection.
#[async_trait]
pub trait DnsRegenerator: Send + Sync {
    /// Returns the number of host entries written.
    async fn regenerate(&self) -> Result<usize>;
}

/// Plain knobs for the scheduler, usually derived from [`MeshvistaConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub device_interval: Duration,
    pub network_interval: Duration,
    pub speedtest_interval: Duration,
    pub routing_interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub alert_every: u32,
    pub worker_pool_size: usize,
    pub retention_days: u32,
    pub cleanup_hour: u8,
    pub cleanup_minute: u8,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&MeshvistaConfig::default())
    }
}

impl From<&MeshvistaConfig> for SchedulerConfig {
    fn from(config: &MeshvistaConfig) -> Self {
        let c = &config.collection;
        Self {
            device_interval: Duration::from_secs(c.device_interval_secs),
            network_interval: Duration::from_secs(c.network_interval_secs),
            speedtest_interval: Duration::from_secs(c.network_interval_secs),
            routing_interval: Duration::from_secs(ROUTING_INTERVAL_SECS),
            timeout: Duration::from_secs(c.timeout_secs),
            failure_threshold: c.failure_threshold,
            alert_every: c.alert_every,
            worker_pool_size: c.worker_pool_size,
            retention_days: config.retention.days,
            cleanup_hour: config.retention.cleanup_hour,
            cleanup_minute: config.retention.cleanup_minute,
        }
    }
}

impl SchedulerConfig {
    pub fn interval_for(&self, id: CollectorId) -> Duration {
        match id {
            CollectorId::Device => self.device_interval,
            CollectorId::Network => self.network_interval,
            CollectorId::Speedtest => self.speedtest_interval,
            CollectorId::Routing => self.routing_interval,
        }
    }
}

/// Collaborators the scheduler calls into.
pub struct SchedulerDeps {
    pub api: Arc<dyn MeshApi>,
    pub db: Database,
    pub collectors: Vec<Arc<dyn Collector>>,
    pub cleanup: Arc<dyn RetentionCleanup>,
    /// Present when startup skipped auth-dependent migrations.
    pub migration_retry: Option<Arc<MigrationRetry>>,
    pub dns: Option<Arc<dyn DnsRegenerator>>,
}

struct Inner {
    deps: SchedulerDeps,
    config: SchedulerConfig,
    guard: ExecutionGuard,
    health: HealthTracker,
    /// Tracks dispatched job callbacks so `stop()` can wait for them.
    dispatch: TaskTracker,
    jobs: Mutex<Vec<CollectorJob>>,
}

struct EngineHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the collection triggers and their lifecycle: `stopped → running →
/// stopped`.
pub struct Scheduler {
    inner: Arc<Inner>,
    engine: Mutex<Option<EngineHandle>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler {
    pub fn new(mut deps: SchedulerDeps, config: SchedulerConfig) -> Self {
        deps.collectors.sort_by_key(|c| c.id());
        deps.collectors.dedup_by_key(|c| c.id());

        let min_pool = deps.collectors.len() * 2;
        let pool_size = if config.worker_pool_size < min_pool {
            warn!(
                configured = config.worker_pool_size,
                using = min_pool,
                "worker pool too small for a hung run per collector, enlarging"
            );
            min_pool
        } else {
            config.worker_pool_size
        };

        let table = CollectorTable::new(deps.collectors.iter().map(|c| c.id()));
        let guard = ExecutionGuard::new(table.clone(), WorkerPool::new(pool_size));
        let health = HealthTracker::new(table, config.failure_threshold, config.alert_every);

        Self {
            inner: Arc::new(Inner {
                deps,
                config,
                guard,
                health,
                dispatch: TaskTracker::new(),
                jobs: Mutex::new(Vec::new()),
            }),
            engine: Mutex::new(None),
        }
    }

    /// Register triggers, start the engine, then run every collector once.
    ///
    /// Calling this while already running logs a warning and does nothing.
    pub async fn start(&self) {
        {
            let mut engine = lock(&self.engine);
            if engine.is_some() {
                warn!("scheduler already running");
                return;
            }

            self.inner.guard.pool().reopen();
            self.inner.dispatch.reopen();
            let jobs = self.inner.build_jobs(Utc::now());
            for job in &jobs {
                info!(
                    job = %job.id,
                    trigger = ?job.trigger,
                    next_run = ?job.next_run,
                    "job registered"
                );
            }
            *lock(&self.inner.jobs) = jobs;

            let (shutdown, rx) = watch::channel(false);
            let task = tokio::spawn(run_engine(self.inner.clone(), rx));
            *engine = Some(EngineHandle { shutdown, task });
        }

        info!(
            collectors = self.inner.deps.collectors.len(),
            pool_size = self.inner.guard.pool().size(),
            "scheduler started, running initial collection"
        );
        self.inner.run_pass().await;
    }

    /// Stop the engine, then wait for dispatched callbacks and in-flight
    /// collector work to finish. Nothing is aborted.
    pub async fn stop(&self) {
        let Some(engine) = lock(&self.engine).take() else {
            warn!("scheduler not running");
            return;
        };

        let _ = engine.shutdown.send(true);
        if let Err(e) = engine.task.await {
            error!(error = %e, "scheduler engine task failed");
        }
        lock(&self.inner.jobs).clear();

        self.inner.dispatch.close();
        self.inner.dispatch.wait().await;
        self.inner.guard.pool().shutdown().await;
        info!("scheduler stopped");
    }

    /// Run every collector now, through the same guard as scheduled runs.
    ///
    /// The pass is tracked like a dispatched job, so a concurrent `stop()`
    /// waits for it.
    pub async fn run_all_now(&self) -> BTreeMap<CollectorId, RunResult> {
        if !self.is_running() {
            warn!("scheduler not running, ignoring run-all request");
            return BTreeMap::new();
        }
        info!("running all collectors on request");
        self.inner.run_pass().await
    }

    pub fn health_status(&self) -> BTreeMap<CollectorId, CollectorHealth> {
        self.inner.health.status()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.engine).is_some()
    }

    /// Registered triggers; empty while stopped.
    pub fn jobs(&self) -> Vec<CollectorJob> {
        lock(&self.inner.jobs).clone()
    }
}

async fn run_engine(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    info!("scheduler engine started");
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => inner.tick(Utc::now()),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("scheduler engine shutting down");
                    break;
                }
            }
        }
    }
}

/// Advance every due job and return their ids in registration order.
///
/// The next fire time is anchored on the scheduled time, not the tick, so
/// tick granularity does not accumulate drift. A job that fell more than one
/// period behind is rescheduled from `now` instead of firing in a burst.
fn take_due(jobs: &mut [CollectorJob], now: DateTime<Utc>) -> Vec<JobId> {
    let mut due = Vec::new();
    for job in jobs.iter_mut() {
        let Some(scheduled) = job.next_run.filter(|t| *t <= now) else {
            continue;
        };
        job.last_run = Some(now);
        job.run_count += 1;
        job.next_run = compute_next_run(&job.trigger, scheduled)
            .filter(|t| *t > now)
            .or_else(|| compute_next_run(&job.trigger, now));
        due.push(job.id);
    }
    due
}

impl Inner {
    fn build_jobs(&self, now: DateTime<Utc>) -> Vec<CollectorJob> {
        let mut triggers: Vec<(JobId, Trigger)> = self
            .deps
            .collectors
            .iter()
            .map(|c| {
                let id = c.id();
                (JobId::Collector(id), Trigger::every(self.config.interval_for(id)))
            })
            .collect();
        triggers.push((
            JobId::RetentionCleanup,
            Trigger::Daily {
                hour: self.config.cleanup_hour,
                minute: self.config.cleanup_minute,
            },
        ));

        triggers
            .into_iter()
            .map(|(id, trigger)| {
                let next_run = compute_next_run(&trigger, now);
                if next_run.is_none() {
                    error!(job = %id, ?trigger, "trigger never fires");
                }
                CollectorJob {
                    id,
                    trigger,
                    next_run,
                    last_run: None,
                    run_count: 0,
                }
            })
            .collect()
    }

    fn tick(self: &Arc<Self>, now: DateTime<Utc>) {
        let due = take_due(&mut lock(&self.jobs), now);
        for job in due {
            debug!(%job, "job due");
            let inner = self.clone();
            self.dispatch.spawn(async move { inner.fire(job).await });
        }
    }

    async fn fire(&self, job: JobId) {
        match job {
            JobId::Collector(id) => {
                let Some(collector) = self.deps.collectors.iter().find(|c| c.id() == id) else {
                    error!(collector = %id, "no collector registered for job");
                    return;
                };
                self.run_collector_job(collector.clone()).await;
            }
            JobId::RetentionCleanup => self.run_cleanup().await,
        }
    }

    /// One sequential pass over every collector, spawned on `dispatch`.
    async fn run_pass(self: &Arc<Self>) -> BTreeMap<CollectorId, RunResult> {
        let inner = self.clone();
        let pass = self.dispatch.spawn(async move {
            let mut results = BTreeMap::new();
            for collector in &inner.deps.collectors {
                let result = inner.run_collector_job(collector.clone()).await;
                results.insert(collector.id(), result);
            }
            results
        });
        match pass.await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "collection pass task failed");
                BTreeMap::new()
            }
        }
    }

    async fn run_collector_job(&self, collector: Arc<dyn Collector>) -> RunResult {
        let id = collector.id();
        let api = self.deps.api.clone();
        let db = self.deps.db.clone();
        let result = self
            .guard
            .run_guarded(
                id,
                move || async move { run_collector(collector.as_ref(), api.as_ref(), &db).await },
                self.config.timeout,
            )
            .await;

        if result.skipped {
            return result;
        }
        if result.success {
            self.health.record_success(id);
        } else {
            let message = result.error.as_deref().unwrap_or("unknown error");
            self.health.record_failure(id, message);
        }

        // outside the guard so these never race a timed-out straggler's deadline
        if id == CollectorId::Device && result.is_clean_success() {
            self.after_device_success().await;
        }
        result
    }

    /// Failures here are logged and never touch collector health.
    async fn after_device_success(&self) {
        if let Some(retry) = &self.deps.migration_retry {
            retry.maybe_retry(self.deps.api.as_ref()).await;
        }
        if let Some(dns) = &self.deps.dns {
            match dns.regenerate().await {
                Ok(entries) => info!(entries, "DNS hosts regenerated"),
                Err(e) => warn!(error = %e, "DNS regeneration failed"),
            }
        }
    }

    async fn run_cleanup(&self) {
        let report = self.deps.cleanup.run_cleanup(self.config.retention_days).await;
        if report.success {
            info!(
                records_deleted = report.records_deleted,
                retention_days = report.retention_days,
                "scheduled cleanup finished"
            );
        } else {
            error!(error = ?report.error, "scheduled cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use crate::health::HealthStatus;
    use crate::testing::{FakeApi, FakeCollector};
    use chrono::TimeZone;
    use meshvista_storage::{CleanupReport, MigrationReport, MigrationRunner};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeCleanup {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl RetentionCleanup for FakeCleanup {
        async fn run_cleanup(&self, retention_days: u32) -> CleanupReport {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return CleanupReport {
                    success: false,
                    retention_days,
                    error: Some("database is locked".to_string()),
                    ..CleanupReport::default()
                };
            }
            CleanupReport {
                success: true,
                retention_days,
                ..CleanupReport::default()
            }
        }
    }

    #[derive(Default)]
    struct FakeDns {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl DnsRegenerator for FakeDns {
        async fn regenerate(&self) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(SchedulerError::Io(std::io::Error::other("read-only fs")));
            }
            Ok(2)
        }
    }

    #[derive(Default)]
    struct CountingMigrations {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl MigrationRunner for CountingMigrations {
        async fn run(
            &self,
            _api: Option<&dyn MeshApi>,
            _retry_mode: bool,
        ) -> meshvista_storage::Result<MigrationReport> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(MigrationReport::default())
        }
    }

    struct Harness {
        scheduler: Scheduler,
        collectors: BTreeMap<CollectorId, Arc<FakeCollector>>,
        api: Arc<FakeApi>,
        dns: Arc<FakeDns>,
        cleanup: Arc<FakeCleanup>,
        migrations: Arc<CountingMigrations>,
    }

    fn harness(collectors: Vec<FakeCollector>, config: SchedulerConfig) -> Harness {
        let api = Arc::new(FakeApi::authenticated());
        let dns = Arc::new(FakeDns::default());
        let migrations = Arc::new(CountingMigrations::default());
        let cleanup = Arc::new(FakeCleanup::default());
        let collectors: BTreeMap<CollectorId, Arc<FakeCollector>> =
            collectors.into_iter().map(|c| (c.id, Arc::new(c))).collect();

        let deps = SchedulerDeps {
            api: api.clone(),
            db: Database::in_memory().unwrap(),
            collectors: collectors
                .values()
                .map(|c| c.clone() as Arc<dyn Collector>)
                .collect(),
            cleanup: cleanup.clone(),
            migration_retry: Some(Arc::new(MigrationRetry::new(
                migrations.clone(),
                vec!["002_correct_network_assignments".into()],
            ))),
            dns: Some(dns.clone()),
        };
        Harness {
            scheduler: Scheduler::new(deps, config),
            collectors,
            api,
            dns,
            cleanup,
            migrations,
        }
    }

    /// Latest `next_run` among `ids`, i.e. a tick instant at which all of
    /// them are due.
    fn due_at(h: &Harness, ids: &[JobId]) -> DateTime<Utc> {
        h.scheduler
            .jobs()
            .iter()
            .filter(|j| ids.contains(&j.id))
            .filter_map(|j| j.next_run)
            .max()
            .unwrap()
    }

    fn all_fakes() -> Vec<FakeCollector> {
        CollectorId::ALL.into_iter().map(FakeCollector::new).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_registers_jobs_once() {
        let h = harness(all_fakes(), SchedulerConfig::default());
        h.scheduler.start().await;
        h.scheduler.start().await;

        assert!(h.scheduler.is_running());
        let jobs = h.scheduler.jobs();
        assert_eq!(jobs.len(), 5);
        assert!(jobs.iter().any(|j| j.id == JobId::RetentionCleanup));
        for c in h.collectors.values() {
            assert_eq!(c.calls(), 1, "{} ran more than once at startup", c.id);
        }
        h.scheduler.stop().await;
        assert!(!h.scheduler.is_running());
        assert!(h.scheduler.jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn startup_runs_collectors_in_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        // registered out of order on purpose
        let fakes = [
            CollectorId::Routing,
            CollectorId::Device,
            CollectorId::Speedtest,
            CollectorId::Network,
        ]
        .into_iter()
            .map(|id| FakeCollector {
                log: Some(log.clone()),
                ..FakeCollector::new(id)
            })
            .collect();
        let h = harness(fakes, SchedulerConfig::default());
        h.scheduler.start().await;
        assert_eq!(*log.lock().unwrap(), CollectorId::ALL.to_vec());
        h.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failures_update_health_and_success_resets() {
        let h = harness(all_fakes(), SchedulerConfig::default());
        let network = &h.collectors[&CollectorId::Network];
        network.fail.store(true, Ordering::SeqCst);
        h.scheduler.start().await;

        h.scheduler.run_all_now().await;
        h.scheduler.run_all_now().await;
        let health = h.scheduler.health_status();
        assert_eq!(health[&CollectorId::Network].consecutive_failures, 3);
        assert_eq!(health[&CollectorId::Network].status, HealthStatus::Critical);
        assert_eq!(health[&CollectorId::Device].status, HealthStatus::Healthy);

        network.fail.store(false, Ordering::SeqCst);
        let results = h.scheduler.run_all_now().await;
        assert!(results[&CollectorId::Network].success);
        assert_eq!(h.scheduler.health_status()[&CollectorId::Network].consecutive_failures, 0);
        h.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn device_success_triggers_side_effects_and_one_retry() {
        let h = harness(all_fakes(), SchedulerConfig::default());
        h.dns.fail.store(true, Ordering::SeqCst);
        h.scheduler.start().await;
        h.scheduler.run_all_now().await;

        assert_eq!(h.dns.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.migrations.runs.load(Ordering::SeqCst), 1);
        // a failing DNS rewrite never counts against the device collector
        assert_eq!(h.scheduler.health_status()[&CollectorId::Device].status, HealthStatus::Healthy);
        h.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unauthenticated_runs_fail_and_defer_retry() {
        let h = harness(all_fakes(), SchedulerConfig::default());
        h.api.set_authenticated(false);
        h.scheduler.start().await;

        let health = h.scheduler.health_status();
        assert_eq!(health[&CollectorId::Device].consecutive_failures, 1);
        assert_eq!(health[&CollectorId::Device].last_error.as_deref(), Some("not authenticated"));
        assert_eq!(h.collectors[&CollectorId::Device].calls(), 0);
        assert_eq!(h.migrations.runs.load(Ordering::SeqCst), 0);
        assert_eq!(h.dns.calls.load(Ordering::SeqCst), 0);

        h.api.set_authenticated(true);
        h.scheduler.run_all_now().await;
        assert_eq!(h.migrations.runs.load(Ordering::SeqCst), 1);
        h.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_device_skips_side_effects_and_stop_drains() {
        let config = SchedulerConfig {
            timeout: Duration::from_secs(1),
            ..SchedulerConfig::default()
        };
        let fakes =
            vec![FakeCollector::new(CollectorId::Device).with_delay(Duration::from_secs(120))];
        let h = harness(fakes, config);
        h.scheduler.start().await;

        let device = &h.collectors[&CollectorId::Device];
        let health = h.scheduler.health_status();
        assert_eq!(health[&CollectorId::Device].consecutive_failures, 1);
        assert!(!health[&CollectorId::Device].currently_running);
        assert_eq!(h.dns.calls.load(Ordering::SeqCst), 0);
        assert_eq!(device.completed(), 0);

        h.scheduler.stop().await;
        // graceful drain let the straggler finish
        assert_eq!(device.completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_all_now_skips_collector_already_running() {
        let fakes = vec![
            FakeCollector::new(CollectorId::Device).with_delay(Duration::from_secs(30)),
            FakeCollector::new(CollectorId::Network),
        ];
        let h = Arc::new(harness(fakes, SchedulerConfig::default()));
        h.scheduler.start().await;

        let first = {
            let h = h.clone();
            tokio::spawn(async move { h.scheduler.run_all_now().await })
        };
        while !h.scheduler.health_status()[&CollectorId::Device].currently_running {
            tokio::task::yield_now().await;
        }
        let second = h.scheduler.run_all_now().await;
        assert!(second[&CollectorId::Device].skipped);
        assert!(second[&CollectorId::Network].success);

        let first = first.await.unwrap();
        assert!(first[&CollectorId::Device].success);
        assert_eq!(h.collectors[&CollectorId::Device].calls(), 2);
        // a skip is not a failure
        assert_eq!(h.scheduler.health_status()[&CollectorId::Device].consecutive_failures, 0);
        h.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_run_all_drains_the_pass_without_false_failures() {
        let fakes = vec![
            FakeCollector::new(CollectorId::Device).with_delay(Duration::from_secs(5)),
            FakeCollector::new(CollectorId::Network),
        ];
        let h = Arc::new(harness(fakes, SchedulerConfig::default()));
        h.scheduler.start().await;

        let pass = {
            let h = h.clone();
            tokio::spawn(async move { h.scheduler.run_all_now().await })
        };
        while !h.scheduler.health_status()[&CollectorId::Device].currently_running {
            tokio::task::yield_now().await;
        }
        h.scheduler.stop().await;

        // stop() returned only after the rest of the pass ran
        assert_eq!(h.collectors[&CollectorId::Network].calls(), 2);
        let results = pass.await.unwrap();
        assert!(results[&CollectorId::Device].success);
        assert!(results[&CollectorId::Network].success);
        let health = h.scheduler.health_status();
        assert_eq!(health[&CollectorId::Network].consecutive_failures, 0);
        assert_eq!(health[&CollectorId::Network].status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn run_refused_after_stop_leaves_health_alone() {
        let h = harness(all_fakes(), SchedulerConfig::default());
        h.scheduler.start().await;
        h.scheduler.stop().await;

        let network = h.collectors[&CollectorId::Network].clone();
        let result = h.scheduler.inner.run_collector_job(network.clone()).await;
        assert!(result.skipped);
        assert_eq!(result.error.as_deref(), Some("worker pool is shut down"));
        assert_eq!(network.calls(), 1);

        let health = h.scheduler.health_status();
        assert_eq!(health[&CollectorId::Network].consecutive_failures, 0);
        assert_eq!(health[&CollectorId::Network].status, HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_fires_due_collector_and_cleanup() {
        let h = harness(all_fakes(), SchedulerConfig::default());
        h.scheduler.start().await;
        assert_eq!(h.cleanup.calls.load(Ordering::SeqCst), 0);

        let device = JobId::Collector(CollectorId::Device);
        let now = due_at(&h, &[device, JobId::RetentionCleanup]);
        h.scheduler.inner.tick(now);

        let jobs = h.scheduler.jobs();
        let device_job = jobs.iter().find(|j| j.id == device).unwrap();
        assert_eq!(device_job.run_count, 1);
        assert_eq!(device_job.last_run, Some(now));
        assert!(device_job.next_run.unwrap() > now);

        // stop() waits for the dispatched callbacks
        h.scheduler.stop().await;
        assert_eq!(h.collectors[&CollectorId::Device].calls(), 2);
        assert_eq!(h.cleanup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.dns.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cleanup_never_touches_collector_health() {
        let h = harness(all_fakes(), SchedulerConfig::default());
        h.cleanup.fail.store(true, Ordering::SeqCst);
        h.scheduler.start().await;

        let now = due_at(&h, &[JobId::RetentionCleanup]);
        h.scheduler.inner.tick(now);
        h.scheduler.stop().await;

        assert_eq!(h.cleanup.calls.load(Ordering::SeqCst), 1);
        for (id, health) in h.scheduler.health_status() {
            assert_eq!(health.consecutive_failures, 0, "{id} picked up a failure");
            assert_eq!(health.status, HealthStatus::Healthy);
        }
    }

    #[tokio::test]
    async fn stopped_scheduler_ignores_run_all() {
        let h = harness(all_fakes(), SchedulerConfig::default());
        assert!(h.scheduler.run_all_now().await.is_empty());
        h.scheduler.stop().await;
        assert!(h.collectors.values().all(|c| c.calls() == 0));
    }

    #[test]
    fn small_pool_is_enlarged() {
        let config = SchedulerConfig {
            worker_pool_size: 1,
            ..SchedulerConfig::default()
        };
        let h = harness(all_fakes(), config);
        assert_eq!(h.scheduler.inner.guard.pool().size(), 8);
    }

    #[test]
    fn take_due_advances_only_due_jobs() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let mut jobs = vec![
            CollectorJob {
                id: JobId::Collector(CollectorId::Device),
                trigger: Trigger::Interval { every_secs: 30 },
                next_run: Some(now),
                last_run: None,
                run_count: 0,
            },
            CollectorJob {
                id: JobId::RetentionCleanup,
                trigger: Trigger::Daily { hour: 3, minute: 0 },
                next_run: Some(Utc.with_ymd_and_hms(2026, 7, 2, 3, 0, 0).unwrap()),
                last_run: None,
                run_count: 0,
            },
        ];

        let due = take_due(&mut jobs, now);
        assert_eq!(due, vec![JobId::Collector(CollectorId::Device)]);
        assert_eq!(jobs[0].run_count, 1);
        assert_eq!(jobs[0].next_run, Some(now + chrono::Duration::seconds(30)));
        assert_eq!(jobs[1].run_count, 0);

        assert!(take_due(&mut jobs, now).is_empty());
    }

    #[test]
    fn take_due_anchors_on_scheduled_time() {
        let scheduled = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let job = |next_run| CollectorJob {
            id: JobId::Collector(CollectorId::Device),
            trigger: Trigger::Interval { every_secs: 30 },
            next_run: Some(next_run),
            last_run: None,
            run_count: 0,
        };

        // a late tick does not push the grid back
        let mut jobs = vec![job(scheduled)];
        let tick = scheduled + chrono::Duration::milliseconds(900);
        take_due(&mut jobs, tick);
        assert_eq!(jobs[0].next_run, Some(scheduled + chrono::Duration::seconds(30)));
        assert_eq!(jobs[0].last_run, Some(tick));

        // more than a period behind: reschedule from now, no catch-up burst
        let mut jobs = vec![job(scheduled)];
        let tick = scheduled + chrono::Duration::seconds(95);
        assert_eq!(take_due(&mut jobs, tick).len(), 1);
        assert_eq!(jobs[0].next_run, Some(tick + chrono::Duration::seconds(30)));
    }

    #[test]
    fn config_maps_intervals() {
        let config = SchedulerConfig::default();
        assert_eq!(config.interval_for(CollectorId::Device), Duration::from_secs(30));
        assert_eq!(config.interval_for(CollectorId::Speedtest), Duration::from_secs(60));
        assert_eq!(config.interval_for(CollectorId::Routing), Duration::from_secs(3600));
        assert_eq!((config.cleanup_hour, config.cleanup_minute), (3, 0));
    }
}
