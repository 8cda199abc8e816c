//! Queue service: the thin layer above `storage` that enforces the
//! worker-pause gate and turns storage errors into queue-domain errors.

use forgequeue_core::{Artifact, Event, Id, Job, JobOutcome, JobStatus, RequiredCapabilities};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::pause::{PauseGate, PauseMode};
use crate::storage::{EventsQuery, Storage, StorageError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("queue is paused")]
    Paused,
    #[error("queue shutdown")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Queue service wrapping `Storage` with the claim gate and event/artifact
/// passthrough the rest of the daemon talks to.
pub struct QueueService {
    storage: Arc<Storage>,
    pause_gate: Arc<PauseGate>,
    /// Serializes claim attempts within this process. The real exclusivity
    /// guarantee is the SQL CAS in `storage::claim_job`; this lock only
    /// avoids every worker thread racing the same `SELECT` scan at once
    /// (parallel workers run single-threaded per claimed job; nothing requires
    /// serializing across processes).
    claim_lock: Mutex<()>,
    lease_ttl_secs: u64,
    shutdown: std::sync::atomic::AtomicBool,
}

impl QueueService {
    pub fn new(storage: Arc<Storage>, pause_gate: Arc<PauseGate>, lease_ttl_secs: u64) -> Self {
        Self {
            storage,
            pause_gate,
            claim_lock: Mutex::new(()),
            lease_ttl_secs,
            shutdown: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn submit_job(&self, job: &Job) -> Result<()> {
        self.storage.insert_job(job).await?;
        let payload = forgequeue_core::events::EventPayload::Submitted(
            forgequeue_core::events::SubmittedPayload {
                job_id: job.id.clone(),
                job_type: job.payload.type_name().to_string(),
                priority: job.priority,
            },
        );
        self.storage.append_event(&job.id, &payload, "job submitted").await?;
        Ok(())
    }

    pub async fn get_job(&self, id: &Id) -> Result<Job> {
        Ok(self.storage.get_job(id).await?)
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        job_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        Ok(self.storage.list_jobs(status, job_type, limit).await?)
    }

    /// Claim the next eligible job. Returns `None` both when the queue is
    /// empty and when the worker-pause gate is closed.
    pub async fn claim_job(
        &self,
        worker_id: &str,
        capabilities: &RequiredCapabilities,
        allowed_types: Option<&[String]>,
        allowed_repositories: Option<&[String]>,
    ) -> Result<Option<Job>> {
        if self.shutdown.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(QueueError::Shutdown);
        }
        if self.pause_gate.is_paused().await {
            return Ok(None);
        }

        let _guard = self.claim_lock.lock().await;
        Ok(self
            .storage
            .claim_job(worker_id, capabilities, allowed_types, allowed_repositories, self.lease_ttl_secs)
            .await?)
    }

    pub async fn heartbeat(&self, id: &Id, worker_id: &str) -> Result<()> {
        self.storage.heartbeat_job(id, worker_id, self.lease_ttl_secs).await?;
        Ok(())
    }

    pub async fn request_cancel(&self, id: &Id, reason: Option<&str>) -> Result<()> {
        self.storage.request_cancel(id, reason).await?;
        Ok(())
    }

    pub async fn report_terminal(
        &self,
        id: &Id,
        worker_id: &str,
        outcome: JobOutcome,
        error: Option<&str>,
    ) -> Result<Job> {
        Ok(self.storage.report_terminal(id, worker_id, outcome, error).await?)
    }

    pub async fn requeue_job(&self, id: &Id) -> Result<()> {
        self.storage.requeue_job(id).await?;
        Ok(())
    }

    pub async fn append_event(
        &self,
        job_id: &Id,
        payload: &forgequeue_core::events::EventPayload,
        message: &str,
    ) -> Result<Event> {
        Ok(self.storage.append_event(job_id, payload, message).await?)
    }

    pub async fn list_events(&self, job_id: &Id, query: &EventsQuery) -> Result<Vec<Event>> {
        Ok(self.storage.list_events(job_id, query).await?)
    }

    pub async fn list_artifacts(&self, job_id: &Id) -> Result<Vec<Artifact>> {
        Ok(self.storage.list_artifacts(job_id).await?)
    }

    pub async fn get_artifact(&self, job_id: &Id, artifact_id: &Id) -> Result<Artifact> {
        Ok(self.storage.get_artifact(job_id, artifact_id).await?)
    }

    pub async fn insert_artifact(&self, artifact: &Artifact) -> Result<()> {
        self.storage.insert_artifact(artifact).await?;
        Ok(())
    }

    /// Spawn the background lease-reaper loop. Runs until shutdown.
    pub fn spawn_lease_reaper(self: &Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                if this.shutdown.load(std::sync::atomic::Ordering::SeqCst) {
                    break;
                }
                match this.storage.reap_expired_leases().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(count = n, "reaped expired leases"),
                    Err(e) => tracing::warn!(error = %e, "lease reap failed"),
                }
            }
        })
    }

    /// Derived `isDrained` for `/system/worker-pause`:
    /// true iff no jobs are `running`.
    pub async fn is_drained(&self) -> Result<bool> {
        let running = self.storage.list_jobs(Some(JobStatus::Running), None, 1).await?;
        Ok(running.is_empty())
    }

    pub async fn job_telemetry(&self, window_start_ms: i64) -> Result<crate::storage::JobTelemetry> {
        Ok(self.storage.job_telemetry(window_start_ms).await?)
    }

    pub async fn queue_health_counts(&self) -> Result<crate::storage::QueueHealthCounts> {
        Ok(self.storage.queue_health_counts().await?)
    }

    pub fn pause_mode_default(&self) -> PauseMode {
        self.pause_gate.default_mode()
    }

    pub fn pause_gate(&self) -> &Arc<PauseGate> {
        &self.pause_gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pause::PauseGate;
    use forgequeue_core::types::{TaskGit, TaskPublish, TaskRuntime};
    use forgequeue_core::{JobPayload, JobStatus, TaskPayload};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    async fn make_queue() -> (QueueService, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(&dir.path().join("test.db")).await.unwrap();
        storage.migrate_embedded().await.unwrap();
        let pause_gate = Arc::new(PauseGate::new(Arc::new(storage.clone())));
        let queue = QueueService::new(Arc::new(storage), pause_gate, 300);
        (queue, dir)
    }

    fn sample_job() -> Job {
        Job {
            id: Id::new(),
            payload: JobPayload::Task(TaskPayload {
                repository: "acme/widgets".to_string(),
                instructions: "do the thing".to_string(),
                skill: None,
                runtime: TaskRuntime { mode: "codex".to_string(), model: None, effort: None },
                git: TaskGit::default(),
                publish: TaskPublish::default(),
                steps: vec![],
                applied_step_templates: vec![],
            }),
            required_capabilities: BTreeSet::new(),
            target_runtime: None,
            affinity_key: None,
            priority: 0,
            max_attempts: 3,
            attempt_count: 0,
            status: JobStatus::Queued,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            lease_expires_at: None,
            cancel_requested_at: None,
            cancel_reason: None,
            queue_name: None,
            last_error: None,
            worker_id: None,
        }
    }

    #[tokio::test]
    async fn submit_then_claim_round_trips() {
        let (queue, _dir) = make_queue().await;
        let job = sample_job();
        queue.submit_job(&job).await.unwrap();

        let claimed = queue.claim_job("worker-1", &BTreeSet::new(), None, None).await.unwrap();
        assert_eq!(claimed.unwrap().id, job.id);
    }

    #[tokio::test]
    async fn claim_returns_none_while_paused() {
        let (queue, _dir) = make_queue().await;
        let job = sample_job();
        queue.submit_job(&job).await.unwrap();

        queue.pause_gate().pause(PauseMode::Drain, "maintenance").await.unwrap();
        let claimed = queue.claim_job("worker-1", &BTreeSet::new(), None, None).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn is_drained_reflects_running_jobs() {
        let (queue, _dir) = make_queue().await;
        let job = sample_job();
        queue.submit_job(&job).await.unwrap();
        assert!(queue.is_drained().await.unwrap());

        queue.claim_job("worker-1", &BTreeSet::new(), None, None).await.unwrap();
        assert!(!queue.is_drained().await.unwrap());
    }
}
