//! Persistent background job queue.
//!
//! Heavy tool work (transcription) runs here, off the session actor's
//! critical path. Every job lives in its own JSON file under `jobs/` so a
//! process restart loses in-flight progress but never the job itself: on
//! startup, anything left in `running` is reset to `pending` and picked up
//! again (at-least-once).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use va_domain::config::JobConfig;
use va_domain::error::{Error, Result};
use va_storage::atomic::{atomic_write_json, read_json};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A cancellation flag the handler observes cooperatively.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Transcription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// A unit of background work. Persisted as `jobs/<job_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub state: JobState,
    /// Opaque per-type payload (e.g. transcription source).
    #[serde(default)]
    pub metadata: Value,
    /// 0.0 ..= 1.0
    #[serde(default)]
    pub progress: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    fn new(job_type: JobType, metadata: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            state: JobState::Pending,
            metadata,
            progress: 0.0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execution context handed to a job handler.
pub struct JobContext {
    cancel: CancelToken,
    progress: Box<dyn Fn(f32) + Send + Sync>,
}

impl JobContext {
    /// Handlers must check this at reasonable granularity and bail out
    /// with `Error::Cancelled` when set.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The job's cancel token, for passing into nested work.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn report_progress(&self, progress: f32) {
        (self.progress)(progress.clamp(0.0, 1.0));
    }
}

/// Executes one job type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide persistent job scheduler with a fixed worker pool.
pub struct JobQueue {
    jobs_dir: PathBuf,
    jobs: Mutex<HashMap<Uuid, Job>>,
    handlers: Mutex<HashMap<JobType, Arc<dyn JobHandler>>>,
    cancel_tokens: Mutex<HashMap<Uuid, CancelToken>>,
    stopping: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    poll_interval: Duration,
    max_concurrent: usize,
}

impl JobQueue {
    /// Load persisted jobs from `<data_path>/jobs/`.
    pub fn new(data_path: &std::path::Path, config: &JobConfig) -> Result<Self> {
        let jobs_dir = data_path.join("jobs");
        std::fs::create_dir_all(&jobs_dir)?;

        let mut jobs = HashMap::new();
        for entry in std::fs::read_dir(&jobs_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<Job>(&path) {
                Ok(Some(job)) => {
                    jobs.insert(job.id, job);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable job file");
                }
            }
        }

        tracing::info!(jobs = jobs.len(), path = %jobs_dir.display(), "job queue loaded");
        let clamped = config.clamped();
        Ok(Self {
            jobs_dir,
            jobs: Mutex::new(jobs),
            handlers: Mutex::new(HashMap::new()),
            cancel_tokens: Mutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            max_concurrent: clamped.max_concurrent,
        })
    }

    pub fn register_handler(&self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        self.handlers.lock().insert(job_type, handler);
    }

    fn job_path(&self, id: &Uuid) -> PathBuf {
        self.jobs_dir.join(format!("{id}.json"))
    }

    fn persist(&self, job: &Job) {
        if let Err(e) = atomic_write_json(&self.job_path(&job.id), job) {
            tracing::error!(job_id = %job.id, error = %e, "failed to persist job");
        }
    }

    // ── public contract ─────────────────────────────────────────────

    /// Persist a new pending job and return immediately.
    pub fn create_job(&self, job_type: JobType, metadata: Value) -> Job {
        let job = Job::new(job_type, metadata);
        self.persist(&job);
        self.jobs.lock().insert(job.id, job.clone());
        tracing::info!(job_id = %job.id, job_type = ?job_type, "job created");
        job
    }

    pub fn get_job(&self, id: &Uuid) -> Option<Job> {
        self.jobs.lock().get(id).cloned()
    }

    /// Jobs sorted newest first, optionally filtered by state.
    pub fn list_jobs(&self, state: Option<JobState>) -> Vec<Job> {
        let jobs = self.jobs.lock();
        let mut list: Vec<Job> = jobs
            .values()
            .filter(|job| state.map_or(true, |s| job.state == s))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Cancel a job. Pending jobs go terminal immediately; running jobs get
    /// their cooperative flag set and the claiming worker finishes the
    /// transition. Returns `false` for unknown or already-terminal jobs.
    pub fn cancel_job(&self, id: &Uuid) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };
        match job.state {
            state if state.is_terminal() => false,
            JobState::Pending => {
                job.state = JobState::Cancelled;
                job.finished_at = Some(Utc::now());
                let snapshot = job.clone();
                drop(jobs);
                self.persist(&snapshot);
                true
            }
            _ => {
                drop(jobs);
                if let Some(token) = self.cancel_tokens.lock().get(id) {
                    token.cancel();
                }
                true
            }
        }
    }

    /// Crash recovery: any job left in `running` from a previous process
    /// goes back to `pending`. Returns how many were resurrected.
    pub fn restore_pending_jobs(&self) -> usize {
        let resurrected: Vec<Job> = {
            let mut jobs = self.jobs.lock();
            jobs.values_mut()
                .filter(|job| job.state == JobState::Running)
                .map(|job| {
                    job.state = JobState::Pending;
                    job.started_at = None;
                    job.progress = 0.0;
                    job.clone()
                })
                .collect()
        };
        for job in &resurrected {
            self.persist(job);
        }
        if !resurrected.is_empty() {
            tracing::info!(count = resurrected.len(), "restored interrupted jobs to pending");
        }
        resurrected.len()
    }

    /// Spawn the fixed worker pool. Worker count comes from configuration
    /// unless overridden.
    pub fn run_job_processor_loop(self: Arc<Self>, num_workers: Option<usize>) {
        let count = num_workers.unwrap_or(self.max_concurrent).max(1);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let queue = self.clone();
            handles.push(tokio::spawn(async move {
                queue.worker_loop(index).await;
            }));
        }
        self.workers.lock().extend(handles);
        tracing::info!(workers = count, "job processor started");
    }

    /// Signal workers, wait up to `grace` for in-flight jobs, then abort.
    pub async fn shutdown(&self, grace: Duration) {
        self.stopping.store(true, Ordering::Release);
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for mut handle in workers {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
            }
        }
        tracing::info!("job queue shut down");
    }

    // ── worker internals ────────────────────────────────────────────

    /// Claim the oldest pending job. Selection and the pending→running
    /// transition happen under one lock so a job is never claimed twice.
    pub(crate) fn claim_next(&self) -> Option<Job> {
        let mut jobs = self.jobs.lock();
        let id = jobs
            .values()
            .filter(|job| job.state == JobState::Pending)
            .min_by_key(|job| job.created_at)
            .map(|job| job.id)?;

        let job = jobs.get_mut(&id)?;
        job.state = JobState::Running;
        job.started_at = Some(Utc::now());
        let snapshot = job.clone();
        drop(jobs);

        self.cancel_tokens.lock().insert(id, CancelToken::new());
        self.persist(&snapshot);
        Some(snapshot)
    }

    async fn worker_loop(self: Arc<Self>, index: usize) {
        tracing::debug!(worker = index, "job worker started");
        while !self.stopping.load(Ordering::Acquire) {
            match self.claim_next() {
                Some(job) => self.clone().execute(job).await,
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
        tracing::debug!(worker = index, "job worker stopped");
    }

    async fn execute(self: Arc<Self>, job: Job) {
        let job_id = job.id;
        tracing::info!(job_id = %job_id, job_type = ?job.job_type, "job started");

        let handler = self.handlers.lock().get(&job.job_type).cloned();
        let outcome = match handler {
            Some(handler) => {
                let token = self
                    .cancel_tokens
                    .lock()
                    .get(&job_id)
                    .cloned()
                    .unwrap_or_default();
                let progress_queue = self.clone();
                let ctx = JobContext {
                    cancel: token.clone(),
                    progress: Box::new(move |p| progress_queue.set_progress(job_id, p)),
                };
                let result = handler.run(&job, &ctx).await;
                match result {
                    _ if token.is_cancelled() => JobOutcome::Cancelled,
                    Ok(()) => JobOutcome::Succeeded,
                    Err(Error::Cancelled(_)) => JobOutcome::Cancelled,
                    Err(e) => JobOutcome::Failed(e.to_string()),
                }
            }
            None => JobOutcome::Failed(format!(
                "no handler registered for job type {:?}",
                job.job_type
            )),
        };

        self.finalize(job_id, outcome);
    }

    fn finalize(&self, job_id: Uuid, outcome: JobOutcome) {
        let snapshot = {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.get_mut(&job_id) else {
                return;
            };
            match outcome {
                JobOutcome::Succeeded => {
                    job.state = JobState::Succeeded;
                    job.progress = 1.0;
                }
                JobOutcome::Cancelled => job.state = JobState::Cancelled,
                JobOutcome::Failed(error) => {
                    job.state = JobState::Failed;
                    job.error = Some(error);
                }
            }
            job.finished_at = Some(Utc::now());
            job.clone()
        };

        self.cancel_tokens.lock().remove(&job_id);
        self.persist(&snapshot);
        match &snapshot.error {
            Some(error) => {
                tracing::warn!(job_id = %job_id, state = ?snapshot.state, error = %error, "job finished")
            }
            None => tracing::info!(job_id = %job_id, state = ?snapshot.state, "job finished"),
        }
    }

    fn set_progress(&self, job_id: Uuid, progress: f32) {
        let snapshot = {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.get_mut(&job_id) else {
                return;
            };
            job.progress = progress;
            job.clone()
        };
        self.persist(&snapshot);
    }
}

enum JobOutcome {
    Succeeded,
    Cancelled,
    Failed(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
