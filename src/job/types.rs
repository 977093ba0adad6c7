//! Job state machine and snapshot types.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::worker::{Platform, ScrapeFilters};

/// Job lifecycle states.
///
/// Transitions are one-directional: `pending → running → {completed,
/// failed, cancelled}`, plus `pending → cancelled` for jobs cancelled
/// before they start. A terminal job never changes state again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable inputs of one scraping request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub platform: Platform,
    pub query: String,
    /// Upper bound on persisted items, validated against the hard cap
    /// at submission.
    pub max_items: usize,
    #[serde(default)]
    pub filters: ScrapeFilters,
}

/// Mutable execution state, owned by the task running the job.
struct JobState {
    status: JobStatus,
    progress: f64,
    items_scraped: usize,
    errors: Vec<String>,
    retry_count: u32,
    proxy_key: Option<String>,
    failure: Option<JobError>,
    record_ids: Vec<i64>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    updated_at: Instant,
}

/// Point-in-time view of a job, safe to hand out while the job runs.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: String,
    pub platform: Platform,
    pub query: String,
    pub status: JobStatus,
    /// Fraction of `max_items` persisted so far, in `[0, 1]`.
    pub progress: f64,
    pub items_scraped: usize,
    pub max_items: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
    pub retry_count: u32,
    pub proxy_key: Option<String>,
    /// Terminal failure reason, if the job failed.
    pub failure: Option<String>,
    /// Storage ids of persisted records, in persistence order.
    pub record_ids: Vec<i64>,
    /// Wall-clock seconds from creation to finish (or now, while running).
    pub duration_secs: f64,
}

/// One entry in the engine's job table.
///
/// Mutable state sits behind a mutex so status queries read a consistent
/// snapshot, but only the task executing the job ever writes it (plus the
/// sweep, which only touches terminal transitions).
pub struct JobSlot {
    pub id: String,
    pub params: JobParams,
    pub cancel: CancellationToken,
    created_at: Instant,
    state: Mutex<JobState>,
}

impl JobSlot {
    pub fn new(id: String, params: JobParams) -> Self {
        JobSlot {
            id,
            params,
            cancel: CancellationToken::new(),
            created_at: Instant::now(),
            state: Mutex::new(JobState {
                status: JobStatus::Pending,
                progress: 0.0,
                items_scraped: 0,
                errors: Vec::new(),
                retry_count: 0,
                proxy_key: None,
                failure: None,
                record_ids: Vec::new(),
                started_at: None,
                finished_at: None,
                updated_at: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JobState> {
        // A poisoned lock only means a writer panicked mid-update; the
        // state is still a usable snapshot.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    /// Marks the job running with its assigned proxy. No-op if the job
    /// was already cancelled.
    pub fn mark_running(&self) -> bool {
        let mut state = self.lock();
        if state.status != JobStatus::Pending {
            return false;
        }
        state.status = JobStatus::Running;
        state.started_at = Some(Instant::now());
        state.updated_at = Instant::now();
        true
    }

    pub fn set_proxy(&self, key: String) {
        let mut state = self.lock();
        state.proxy_key = Some(key);
        state.updated_at = Instant::now();
    }

    /// Records one persisted item and advances progress.
    pub fn record_item(&self, record_id: i64) {
        let mut state = self.lock();
        state.items_scraped += 1;
        state.record_ids.push(record_id);
        state.progress =
            (state.items_scraped as f64 / self.params.max_items as f64).min(1.0);
        state.updated_at = Instant::now();
    }

    pub fn items_scraped(&self) -> usize {
        self.lock().items_scraped
    }

    pub fn push_error(&self, message: String) {
        let mut state = self.lock();
        state.errors.push(message);
        state.updated_at = Instant::now();
    }

    pub fn bump_retry(&self) -> u32 {
        let mut state = self.lock();
        state.retry_count += 1;
        state.updated_at = Instant::now();
        state.retry_count
    }

    /// Moves the job to a terminal state exactly once. Later calls are
    /// no-ops, so a sweep-forced failure cannot be overwritten by the
    /// task finishing afterwards (or vice versa).
    pub fn finish(&self, status: JobStatus, failure: Option<JobError>) -> bool {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return false;
        }
        if status == JobStatus::Completed {
            state.progress = if self.params.max_items == 0 {
                1.0
            } else {
                state.items_scraped as f64 / self.params.max_items as f64
            };
        }
        state.status = status;
        if let Some(failure) = failure {
            state.errors.push(failure.to_string());
            state.failure = Some(failure);
        }
        state.finished_at = Some(Instant::now());
        state.updated_at = Instant::now();
        true
    }

    /// Whether this job is terminal and finished longer than `retention` ago.
    pub fn expired(&self, retention: Duration) -> bool {
        let state = self.lock();
        state.status.is_terminal()
            && state
                .finished_at
                .map_or(false, |at| at.elapsed() > retention)
    }

    /// Whether this job has been running longer than `ceiling`.
    pub fn over_deadline(&self, ceiling: Duration) -> bool {
        let state = self.lock();
        state.status == JobStatus::Running
            && state.started_at.map_or(false, |at| at.elapsed() > ceiling)
    }

    /// Atomic point-in-time view.
    pub fn snapshot(&self) -> JobView {
        let state = self.lock();
        let end = state.finished_at.unwrap_or_else(Instant::now);
        JobView {
            id: self.id.clone(),
            platform: self.params.platform,
            query: self.params.query.clone(),
            status: state.status,
            progress: state.progress,
            items_scraped: state.items_scraped,
            max_items: self.params.max_items,
            error_count: state.errors.len(),
            errors: state.errors.clone(),
            retry_count: state.retry_count,
            proxy_key: state.proxy_key.clone(),
            failure: state.failure.as_ref().map(|f| f.to_string()),
            record_ids: state.record_ids.clone(),
            duration_secs: end.duration_since(self.created_at).as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(max_items: usize) -> JobSlot {
        JobSlot::new(
            "job-1".to_string(),
            JobParams {
                platform: Platform::Ebay,
                query: "gold ring".to_string(),
                max_items,
                filters: ScrapeFilters::default(),
            },
        )
    }

    #[test]
    fn test_lifecycle_transitions() {
        let slot = slot(5);
        assert_eq!(slot.status(), JobStatus::Pending);
        assert!(slot.mark_running());
        assert_eq!(slot.status(), JobStatus::Running);
        assert!(slot.finish(JobStatus::Completed, None));
        // Terminal state never changes again.
        assert!(!slot.finish(JobStatus::Failed, Some(JobError::Timeout)));
        assert_eq!(slot.status(), JobStatus::Completed);
        assert!(!slot.mark_running());
    }

    #[test]
    fn test_progress_advances_per_item() {
        let slot = slot(4);
        slot.mark_running();
        let mut last = 0.0;
        for id in 1..=4 {
            slot.record_item(id);
            let view = slot.snapshot();
            assert!(view.progress >= last);
            last = view.progress;
        }
        assert_eq!(slot.snapshot().progress, 1.0);
        assert_eq!(slot.snapshot().items_scraped, 4);
        assert_eq!(slot.snapshot().record_ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_failure_recorded_in_errors() {
        let slot = slot(5);
        slot.mark_running();
        slot.finish(JobStatus::Failed, Some(JobError::NoProxyAvailable));
        let view = slot.snapshot();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.failure.as_deref(), Some("no healthy proxy available"));
        assert_eq!(view.error_count, 1);
    }

    #[test]
    fn test_expiry_and_deadline_checks() {
        let slot = slot(5);
        assert!(!slot.expired(Duration::ZERO));
        slot.mark_running();
        assert!(slot.over_deadline(Duration::ZERO));
        assert!(!slot.over_deadline(Duration::from_secs(3600)));
        slot.finish(JobStatus::Cancelled, None);
        assert!(slot.expired(Duration::ZERO));
        assert!(!slot.over_deadline(Duration::ZERO));
    }
}
