//! The engine: job table, worker pool cap, and shared components.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use rand::Rng;
use tokio::sync::{RwLock, Semaphore};

use super::execute::run_job;
use super::types::{JobParams, JobSlot, JobStatus, JobView};
use crate::config::{
    DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_USER_AGENT, JOB_RETENTION, JOB_RETRY_BASE_DELAY,
    JOB_TIMEOUT, MAX_ITEMS_HARD_CAP,
};
use crate::error::{ErrorKind, ErrorStats, JobError, SubmitError};
use crate::images::ImagePipeline;
use crate::monitor::Monitor;
use crate::proxy::ProxyPool;
use crate::rate_limit::RateLimiter;
use crate::storage::Storage;
use crate::worker::{worker_for, Platform, PlatformWorker};

/// Explicitly constructed owner of all scraping state: the job table,
/// proxy pool, rate limiter, image pipeline, monitor, and error counters.
///
/// Jobs run on spawned tasks gated by a fixed-size semaphore, so excess
/// submissions queue FIFO instead of fanning out unbounded network
/// activity. The engine is shared behind an `Arc`; request surfaces call
/// [`submit`](Engine::submit), [`status`](Engine::status),
/// [`cancel`](Engine::cancel), and a scheduler calls
/// [`sweep`](Engine::sweep) periodically.
pub struct Engine {
    jobs: RwLock<HashMap<String, Arc<JobSlot>>>,
    proxies: ProxyPool,
    rate_limiter: RateLimiter,
    images: ImagePipeline,
    storage: Arc<dyn Storage>,
    workers: HashMap<Platform, Arc<dyn PlatformWorker>>,
    monitor: Monitor,
    error_stats: ErrorStats,
    job_permits: Arc<Semaphore>,
    max_items_cap: usize,
    retention: Duration,
    timeout: Duration,
    retry_delay: Duration,
    user_agent: String,
}

impl Engine {
    /// Builds an engine with the default limits.
    pub fn new(proxies: ProxyPool, images: ImagePipeline, storage: Arc<dyn Storage>) -> Arc<Self> {
        Self::builder(proxies, images, storage).build()
    }

    pub fn builder(
        proxies: ProxyPool,
        images: ImagePipeline,
        storage: Arc<dyn Storage>,
    ) -> EngineBuilder {
        EngineBuilder {
            proxies,
            images,
            storage,
            workers: HashMap::new(),
            rate_limiter: RateLimiter::new(),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            max_items_cap: MAX_ITEMS_HARD_CAP,
            retention: JOB_RETENTION,
            timeout: JOB_TIMEOUT,
            retry_delay: JOB_RETRY_BASE_DELAY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Validates and enqueues a job, schedules its execution, and returns
    /// the job id immediately. Never blocks on network I/O.
    pub async fn submit(
        self: &Arc<Self>,
        id: Option<String>,
        params: JobParams,
    ) -> Result<String, SubmitError> {
        if params.max_items < 1 || params.max_items > self.max_items_cap {
            return Err(SubmitError::MaxItemsOutOfRange {
                requested: params.max_items,
                cap: self.max_items_cap,
            });
        }

        let id = id.unwrap_or_else(|| {
            format!(
                "{}-{:08x}",
                params.platform,
                rand::rng().random::<u32>()
            )
        });
        let slot = Arc::new(JobSlot::new(id.clone(), params));
        {
            let mut jobs = self.jobs.write().await;
            if jobs.contains_key(&id) {
                return Err(SubmitError::DuplicateJobId(id));
            }
            jobs.insert(id.clone(), Arc::clone(&slot));
        }
        log::info!(
            "job {id}: submitted ({} \"{}\", max {} items)",
            slot.params.platform,
            slot.params.query,
            slot.params.max_items
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.drive(slot).await;
        });
        Ok(id)
    }

    /// Waits for a worker slot, then runs the job with panic isolation.
    /// Proxy release and monitor accounting happen exactly once on every
    /// exit path.
    async fn drive(&self, slot: Arc<JobSlot>) {
        let permit = tokio::select! {
            permit = Arc::clone(&self.job_permits).acquire_owned() => permit,
            _ = slot.cancel.cancelled() => {
                slot.finish(JobStatus::Cancelled, None);
                return;
            }
        };
        let _permit = match permit {
            Ok(permit) => permit,
            // Semaphore closure only happens at shutdown.
            Err(_) => return,
        };
        if slot.cancel.is_cancelled() || !slot.mark_running() {
            slot.finish(JobStatus::Cancelled, None);
            return;
        }

        self.monitor.job_started();
        let outcome = std::panic::AssertUnwindSafe(run_job(self, &slot))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("job {}: task panicked: {message}", slot.id);
            self.error_stats.increment(ErrorKind::JobPanic);
            slot.finish(JobStatus::Failed, Some(JobError::Panicked(message)));
        }
        self.monitor.job_finished();
        log::info!("job {}: finished as {}", slot.id, slot.status());
    }

    /// Point-in-time view of a job, or `None` for an unknown id.
    pub async fn status(&self, id: &str) -> Option<JobView> {
        let jobs = self.jobs.read().await;
        jobs.get(id).map(|slot| slot.snapshot())
    }

    /// Views of all jobs currently in the table.
    pub async fn list(&self) -> Vec<JobView> {
        let jobs = self.jobs.read().await;
        jobs.values().map(|slot| slot.snapshot()).collect()
    }

    /// Requests cancellation. Returns true only if the job existed and
    /// was still pending or running; the executing task observes the flag
    /// at its next suspension point.
    pub async fn cancel(&self, id: &str) -> bool {
        let jobs = self.jobs.read().await;
        let Some(slot) = jobs.get(id) else {
            return false;
        };
        if slot.status().is_terminal() {
            return false;
        }
        log::info!("job {id}: cancellation requested");
        slot.cancel.cancel();
        true
    }

    /// Reclaims the job table: drops terminal jobs older than the
    /// retention window and force-fails jobs running past the timeout
    /// ceiling. Meant to be called on a timer.
    pub async fn sweep(&self) {
        let mut jobs = self.jobs.write().await;
        for slot in jobs.values() {
            if slot.over_deadline(self.timeout) {
                log::warn!("job {}: over deadline, force-failing", slot.id);
                self.error_stats.increment(ErrorKind::JobTimeout);
                slot.cancel.cancel();
                slot.finish(JobStatus::Failed, Some(JobError::Timeout));
            }
        }
        let before = jobs.len();
        jobs.retain(|_, slot| !slot.expired(self.retention));
        let removed = before - jobs.len();
        if removed > 0 {
            log::info!("sweep removed {removed} expired jobs");
        }
    }

    pub(super) fn proxies(&self) -> &ProxyPool {
        &self.proxies
    }

    pub(super) fn worker(&self, platform: Platform) -> &dyn PlatformWorker {
        match self.workers.get(&platform) {
            Some(worker) => worker.as_ref(),
            None => worker_for(platform),
        }
    }

    pub(super) fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub(super) fn images(&self) -> &ImagePipeline {
        &self.images
    }

    pub(super) fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub(super) fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub(super) fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Rolling-window metrics, read-only from outside.
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Engine-wide error counters.
    pub fn error_stats(&self) -> &ErrorStats {
        &self.error_stats
    }

    /// Health probe over the whole proxy pool; run on a timer.
    pub async fn verify_proxies(&self) {
        self.proxies.verify_all().await;
    }

    /// Current proxy pool telemetry.
    pub async fn proxy_stats(&self) -> Vec<crate::proxy::ProxyStats> {
        self.proxies.stats().await
    }
}

/// Configuration for [`Engine`] construction.
pub struct EngineBuilder {
    proxies: ProxyPool,
    images: ImagePipeline,
    storage: Arc<dyn Storage>,
    workers: HashMap<Platform, Arc<dyn PlatformWorker>>,
    rate_limiter: RateLimiter,
    max_concurrent_jobs: usize,
    max_items_cap: usize,
    retention: Duration,
    timeout: Duration,
    retry_delay: Duration,
    user_agent: String,
}

impl EngineBuilder {
    pub fn rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Replaces the handler for one platform. The built-in registry
    /// covers every [`Platform`]; overrides exist for embedding and for
    /// tests that stub network behavior.
    pub fn worker(mut self, worker: Arc<dyn PlatformWorker>) -> Self {
        self.workers.insert(worker.platform(), worker);
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.max_concurrent_jobs = n.max(1);
        self
    }

    pub fn max_items_cap(mut self, cap: usize) -> Self {
        self.max_items_cap = cap.max(1);
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base delay between job-level retries; the n-th retry waits `n *
    /// retry_delay`.
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn build(self) -> Arc<Engine> {
        Arc::new(Engine {
            jobs: RwLock::new(HashMap::new()),
            proxies: self.proxies,
            rate_limiter: self.rate_limiter,
            images: self.images,
            storage: self.storage,
            workers: self.workers,
            monitor: Monitor::new(),
            error_stats: ErrorStats::new(),
            job_permits: Arc::new(Semaphore::new(self.max_concurrent_jobs)),
            max_items_cap: self.max_items_cap,
            retention: self.retention,
            timeout: self.timeout,
            retry_delay: self.retry_delay,
            user_agent: self.user_agent,
        })
    }
}
