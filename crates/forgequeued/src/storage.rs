//! SQLite storage for the job queue, event log, and artifact index.

use chrono::{DateTime, Utc};
use forgequeue_core::{
    events::EventPayload, Artifact, Event, Id, Job, JobOutcome, JobPayload, JobStatus,
    RequiredCapabilities,
};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

/// Explicit column list for job queries, in `JobRow` field order. Using
/// explicit columns instead of `SELECT *` keeps row mapping correct
/// regardless of column order across migrations.
const JOB_COLUMNS: &str = "id, job_type, payload_json, required_capabilities, target_runtime, \
    affinity_key, priority, max_attempts, attempt_count, status, created_at, started_at, \
    finished_at, lease_expires_at, cancel_requested_at, cancel_reason, queue_name, last_error, \
    worker_id";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),
    #[error("lease conflict: job {0} is not held by worker {1}")]
    LeaseConflict(String, String),
    #[error("job {0} is not in a claimable state")]
    NotClaimable(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Keyset-pagination parameters for `Storage::list_events`
/// 4.4: forward `after`/`afterEventId` and backward `before`/
/// `beforeEventId` walks, either sort order).
#[derive(Debug, Clone, Copy, Default)]
pub struct EventsQuery {
    pub after_event_id: Option<i64>,
    pub before_event_id: Option<i64>,
    pub limit: i64,
    pub sort_desc: bool,
}

impl EventsQuery {
    pub fn forward(after_event_id: Option<i64>, limit: i64) -> Self {
        Self { after_event_id, limit, ..Default::default() }
    }
}

/// Result of `Storage::job_telemetry`.
#[derive(Debug, Clone)]
pub struct JobTelemetry {
    pub total_jobs: i64,
    pub volume_by_type: Vec<(String, i64)>,
    pub succeeded: i64,
    pub failed: i64,
}

/// Result of `Storage::queue_health_counts`.
#[derive(Debug, Clone, Copy)]
pub struct QueueHealthCounts {
    pub queued: i64,
    pub running: i64,
    pub stale_running: i64,
}

/// Storage backend for the daemon. Cheap to clone (wraps a connection pool).
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    /// Create a new storage instance with the given database path.
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Direct pool access for sibling modules (manifests, proposals,
    /// worker-pause, skills cache) that own their own tables.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run migrations from a directory (used by `forgequeuectl migrate`-style
    /// tooling and integration tests that want to point at a scratch copy).
    pub async fn migrate(&self, migrations_path: &Path) -> Result<()> {
        let migrator = sqlx::migrate::Migrator::new(migrations_path).await?;
        migrator.run(&self.pool).await?;
        Ok(())
    }

    /// Run the embedded migrations (production path: migrations ship
    /// inside the binary).
    pub async fn migrate_embedded(&self) -> Result<()> {
        let migrations = [
            include_str!("../../../migrations/0001_init.sql"),
            include_str!("../../../migrations/0002_skills_cache.sql"),
            include_str!("../../../migrations/0003_manifests.sql"),
            include_str!("../../../migrations/0004_proposals.sql"),
            include_str!("../../../migrations/0005_worker_pause.sql"),
            include_str!("../../../migrations/0006_manifest_points.sql"),
        ];

        for migration_sql in migrations {
            let cleaned: String = migration_sql
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");

            for statement in cleaned.split(';') {
                let trimmed = statement.trim();
                if !trimmed.is_empty() {
                    match sqlx::query(trimmed).execute(&self.pool).await {
                        Ok(_) => {}
                        Err(e) => {
                            let msg = e.to_string();
                            if !msg.contains("duplicate column") && !msg.contains("already exists")
                            {
                                return Err(e.into());
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // --- Job operations ---

    /// Insert a newly submitted job (always `status=queued`).
    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        let job_type = job.payload.type_name();
        let payload_json = serde_json::to_string(&job.payload)?;
        let capabilities_json = serde_json::to_string(&job.required_capabilities)?;
        let status = job.status.as_str();
        let created_at = job.created_at.timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, payload_json, required_capabilities, target_runtime,
                              affinity_key, priority, max_attempts, attempt_count, status,
                              created_at, started_at, finished_at, lease_expires_at,
                              cancel_requested_at, cancel_reason, queue_name, last_error, worker_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, NULL, NULL, NULL, NULL, ?12, NULL, NULL)
            "#,
        )
        .bind(job.id.as_ref())
        .bind(job_type)
        .bind(&payload_json)
        .bind(&capabilities_json)
        .bind(&job.target_runtime)
        .bind(&job.affinity_key)
        .bind(job.priority)
        .bind(job.max_attempts as i64)
        .bind(job.attempt_count as i64)
        .bind(status)
        .bind(created_at)
        .bind(&job.queue_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &Id) -> Result<Job> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id.as_ref())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::JobNotFound(id.to_string()))?;

        row.into_job()
    }

    /// List jobs, optionally filtered by status and/or job type.
    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        job_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let status_str = status.map(|s| s.as_str());
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR job_type = ?2) \
             ORDER BY created_at DESC LIMIT ?3"
        );

        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(status_str)
            .bind(job_type)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Job counts and volume-by-type for the telemetry endpoint, windowed
    /// to jobs created at or after `window_start_ms`. `succeeded`/`failed`
    /// count terminal jobs that *finished* in the window, independent of
    /// when they were created.
    pub async fn job_telemetry(&self, window_start_ms: i64) -> Result<JobTelemetry> {
        let total_jobs: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE created_at >= ?1")
                .bind(window_start_ms)
                .fetch_one(&self.pool)
                .await?;

        let volume_by_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT job_type, COUNT(*) FROM jobs WHERE created_at >= ?1 GROUP BY job_type",
        )
        .bind(window_start_ms)
        .fetch_all(&self.pool)
        .await?;

        let succeeded: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status = 'succeeded' AND finished_at >= ?1",
        )
        .bind(window_start_ms)
        .fetch_one(&self.pool)
        .await?;

        let failed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status = 'failed' AND finished_at >= ?1",
        )
        .bind(window_start_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(JobTelemetry { total_jobs, volume_by_type, succeeded, failed })
    }

    /// Queue-health counts for `/system/worker-pause`: jobs currently
    /// `queued`, jobs currently `running`, and of those running, how many
    /// have a lease that has already expired but hasn't been reaped yet.
    pub async fn queue_health_counts(&self) -> Result<QueueHealthCounts> {
        let queued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'queued'")
            .fetch_one(&self.pool)
            .await?;
        let running: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'running'")
            .fetch_one(&self.pool)
            .await?;
        let now_ms = Utc::now().timestamp_millis();
        let stale_running: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status = 'running' AND lease_expires_at IS NOT NULL \
             AND lease_expires_at < ?1",
        )
        .bind(now_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueHealthCounts { queued, running, stale_running })
    }

    /// Compare-and-swap claim: atomically picks the highest-priority,
    /// oldest queued job (or a job whose lease has expired) and marks it
    /// `running` under a fresh lease. This is the cross-process
    /// "at-most-one execution" guarantee: it works across any number of
    /// daemon processes sharing one database file because the CAS lives in
    /// the `UPDATE ... WHERE` predicate, not in process memory.
    pub async fn claim_job(
        &self,
        worker_id: &str,
        capabilities: &RequiredCapabilities,
        allowed_types: Option<&[String]>,
        allowed_repositories: Option<&[String]>,
        lease_ttl_secs: u64,
    ) -> Result<Option<Job>> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let lease_expires_at = now + chrono::Duration::seconds(lease_ttl_secs as i64);

        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'queued' ORDER BY priority DESC, created_at ASC");
        let mut candidates = sqlx::query_as::<_, JobRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        candidates.retain(|row| {
            let required: RequiredCapabilities =
                serde_json::from_str(&row.required_capabilities).unwrap_or_default();
            if !required.is_subset(capabilities) {
                return false;
            }
            if let Some(types) = allowed_types {
                if !types.iter().any(|t| t == &row.job_type) {
                    return false;
                }
            }
            if let Some(repos) = allowed_repositories {
                if let Ok(payload) = serde_json::from_str::<JobPayload>(&row.payload_json) {
                    if let Some(repo) = payload.repository() {
                        if !repos.iter().any(|r| r == repo) {
                            return false;
                        }
                    }
                }
            }
            true
        });

        // AffinityKey is advisory: jobs whose affinityKey
        // was last executed by this worker are preferred, but priority/age
        // ordering within each group is preserved (stable sort).
        let last_affinity: Option<String> = sqlx::query_scalar::<_, Option<String>>(
            "SELECT affinity_key FROM jobs WHERE worker_id = ?1 AND affinity_key IS NOT NULL \
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten();
        if let Some(affinity) = last_affinity {
            candidates.sort_by_key(|row| row.affinity_key.as_deref() != Some(affinity.as_str()));
        }

        for row in candidates {
            let result = sqlx::query(
                r#"
                UPDATE jobs SET status = 'running', worker_id = ?1, started_at = ?2,
                    attempt_count = attempt_count + 1, lease_expires_at = ?3
                WHERE id = ?4 AND status = 'queued'
                "#,
            )
            .bind(worker_id)
            .bind(now_ms)
            .bind(lease_expires_at.timestamp_millis())
            .bind(&row.id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                let job = self.get_job(&Id::from_string(row.id)).await?;
                let payload = EventPayload::Claimed(forgequeue_core::events::ClaimedPayload {
                    job_id: job.id.clone(),
                    worker_id: worker_id.to_string(),
                    attempt_count: job.attempt_count,
                    lease_expires_at,
                });
                self.append_event(&job.id, &payload, &format!("claimed by worker {worker_id}"))
                    .await?;
                return Ok(Some(job));
            }
            // Someone else claimed it between our SELECT and UPDATE; try the next.
        }

        Ok(None)
    }

    /// Reclaim jobs whose lease has expired. A job that still has attempts
    /// left goes back to `queued`; one that has exhausted `max_attempts`
    /// is failed outright instead of being handed out again.
    pub async fn reap_expired_leases(&self) -> Result<u64> {
        let now_ms = Utc::now().timestamp_millis();
        let requeued = sqlx::query(
            "UPDATE jobs SET status = 'queued', worker_id = NULL, lease_expires_at = NULL \
             WHERE status = 'running' AND lease_expires_at IS NOT NULL AND lease_expires_at < ?1 \
             AND attempt_count < max_attempts",
        )
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        let failed = sqlx::query(
            "UPDATE jobs SET status = 'failed', worker_id = NULL, lease_expires_at = NULL, \
             finished_at = ?1, last_error = 'lease expired' \
             WHERE status = 'running' AND lease_expires_at IS NOT NULL AND lease_expires_at < ?1 \
             AND attempt_count >= max_attempts",
        )
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        Ok(requeued.rows_affected() + failed.rows_affected())
    }

    /// Renew a held lease. Rejected if the worker no longer holds it.
    pub async fn heartbeat_job(&self, id: &Id, worker_id: &str, lease_ttl_secs: u64) -> Result<()> {
        let lease_expires_at = Utc::now() + chrono::Duration::seconds(lease_ttl_secs as i64);
        let result = sqlx::query(
            "UPDATE jobs SET lease_expires_at = ?1 WHERE id = ?2 AND worker_id = ?3 AND status = 'running'",
        )
        .bind(lease_expires_at.timestamp_millis())
        .bind(id.as_ref())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::LeaseConflict(id.to_string(), worker_id.to_string()));
        }
        Ok(())
    }

    /// Request cooperative cancellation. Idempotent.
    pub async fn request_cancel(&self, id: &Id, reason: Option<&str>) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "UPDATE jobs SET cancel_requested_at = COALESCE(cancel_requested_at, ?1), \
             cancel_reason = COALESCE(cancel_reason, ?2) WHERE id = ?3 AND status IN ('queued','running')",
        )
        .bind(now_ms)
        .bind(reason)
        .bind(id.as_ref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Already terminal or missing; both are fine for an idempotent cancel.
            self.get_job(id).await?;
        }
        Ok(())
    }

    /// Report a terminal outcome. Duplicate reports of the same terminal
    /// state succeed silently; a conflicting report from a non-holder is rejected.
    pub async fn report_terminal(
        &self,
        id: &Id,
        worker_id: &str,
        outcome: JobOutcome,
        error: Option<&str>,
    ) -> Result<Job> {
        let job = self.get_job(id).await?;
        if job.status.is_terminal() {
            if job.status == outcome.terminal_status() {
                return Ok(job);
            }
            return Err(StorageError::NotClaimable(id.to_string()));
        }
        if job.worker_id.as_deref() != Some(worker_id) {
            return Err(StorageError::LeaseConflict(id.to_string(), worker_id.to_string()));
        }

        let now_ms = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "UPDATE jobs SET status = ?1, finished_at = ?2, last_error = ?3, lease_expires_at = NULL \
             WHERE id = ?4 AND worker_id = ?5 AND status = 'running'",
        )
        .bind(outcome.terminal_status().as_str())
        .bind(now_ms)
        .bind(error)
        .bind(id.as_ref())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::LeaseConflict(id.to_string(), worker_id.to_string()));
        }

        self.get_job(id).await
    }

    /// Requeue a job for retry (used between stages on a recoverable
    /// failure, still within `max_attempts`).
    pub async fn requeue_job(&self, id: &Id) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'queued', worker_id = NULL, lease_expires_at = NULL \
             WHERE id = ?1 AND status = 'running'",
        )
        .bind(id.as_ref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    // --- Event operations ---

    /// Append an event to the immutable per-job audit log.
    pub async fn append_event(&self, job_id: &Id, payload: &EventPayload, message: &str) -> Result<Event> {
        let now = Utc::now();
        let payload_json = serde_json::to_value(payload)?;
        let payload_str = serde_json::to_string(&payload_json)?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO events (job_id, created_at, level, message, payload_json) \
             VALUES (?1, ?2, 'info', ?3, ?4) RETURNING id",
        )
        .bind(job_id.as_ref())
        .bind(now.timestamp_millis())
        .bind(message)
        .bind(&payload_str)
        .fetch_one(&self.pool)
        .await?;

        Ok(Event {
            id,
            job_id: job_id.clone(),
            created_at: now,
            level: forgequeue_core::types::EventLevel::Info,
            message: message.to_string(),
            payload: payload_json,
        })
    }

    /// List events for a job with keyset pagination on `(createdAt, id)`
    /// (forward `after` and backward `before` walks,
    /// either sort order).
    pub async fn list_events(&self, job_id: &Id, query: &EventsQuery) -> Result<Vec<Event>> {
        let sql = format!(
            "SELECT id, job_id, created_at, level, message, payload_json FROM events \
             WHERE job_id = ?1 AND id > ?2 AND id < ?3 ORDER BY id {} LIMIT ?4",
            if query.sort_desc { "DESC" } else { "ASC" }
        );

        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(job_id.as_ref())
            .bind(query.after_event_id.unwrap_or(0))
            .bind(query.before_event_id.unwrap_or(i64::MAX))
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    // --- Artifact operations ---

    /// Insert an artifact index entry (the blob itself is written via
    /// `forgequeue_core::artifacts` before this call).
    pub async fn insert_artifact(&self, artifact: &Artifact) -> Result<()> {
        sqlx::query(
            "INSERT INTO artifacts (id, job_id, name, size_bytes, content_type, created_at, storage_ref) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(artifact.id.as_ref())
        .bind(artifact.job_id.as_ref())
        .bind(&artifact.name)
        .bind(artifact.size_bytes)
        .bind(&artifact.content_type)
        .bind(artifact.created_at.timestamp_millis())
        .bind(&artifact.storage_ref)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// List artifacts for a job.
    pub async fn list_artifacts(&self, job_id: &Id) -> Result<Vec<Artifact>> {
        let rows = sqlx::query_as::<_, ArtifactRow>(
            "SELECT id, job_id, name, size_bytes, content_type, created_at, storage_ref \
             FROM artifacts WHERE job_id = ?1 ORDER BY created_at ASC",
        )
        .bind(job_id.as_ref())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArtifactRow::into_artifact).collect())
    }

    /// Get a single artifact by id, scoped to a job.
    pub async fn get_artifact(&self, job_id: &Id, artifact_id: &Id) -> Result<Artifact> {
        let row = sqlx::query_as::<_, ArtifactRow>(
            "SELECT id, job_id, name, size_bytes, content_type, created_at, storage_ref \
             FROM artifacts WHERE job_id = ?1 AND id = ?2",
        )
        .bind(job_id.as_ref())
        .bind(artifact_id.as_ref())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::ArtifactNotFound(artifact_id.to_string()))?;

        Ok(row.into_artifact())
    }
}

// --- Row types for SQLx ---

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    payload_json: String,
    required_capabilities: String,
    target_runtime: Option<String>,
    affinity_key: Option<String>,
    priority: i64,
    max_attempts: i64,
    attempt_count: i64,
    status: String,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    lease_expires_at: Option<i64>,
    cancel_requested_at: Option<i64>,
    cancel_reason: Option<String>,
    queue_name: Option<String>,
    last_error: Option<String>,
    worker_id: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let payload: JobPayload = serde_json::from_str(&self.payload_json)?;
        let required_capabilities: BTreeSet<String> =
            serde_json::from_str(&self.required_capabilities).unwrap_or_default();
        let status = match self.status.as_str() {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        };

        Ok(Job {
            id: Id::from_string(self.id),
            payload,
            required_capabilities,
            target_runtime: self.target_runtime,
            affinity_key: self.affinity_key,
            priority: self.priority,
            max_attempts: self.max_attempts as u32,
            attempt_count: self.attempt_count as u32,
            status,
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            started_at: self.started_at.and_then(DateTime::from_timestamp_millis),
            finished_at: self.finished_at.and_then(DateTime::from_timestamp_millis),
            lease_expires_at: self.lease_expires_at.and_then(DateTime::from_timestamp_millis),
            cancel_requested_at: self.cancel_requested_at.and_then(DateTime::from_timestamp_millis),
            cancel_reason: self.cancel_reason,
            queue_name: self.queue_name,
            last_error: self.last_error,
            worker_id: self.worker_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    job_id: String,
    created_at: i64,
    level: String,
    message: String,
    payload_json: String,
}

impl EventRow {
    fn into_event(self) -> Result<Event> {
        Ok(Event {
            id: self.id,
            job_id: Id::from_string(self.job_id),
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            level: match self.level.as_str() {
                "warn" => forgequeue_core::types::EventLevel::Warn,
                "error" => forgequeue_core::types::EventLevel::Error,
                _ => forgequeue_core::types::EventLevel::Info,
            },
            message: self.message,
            payload: serde_json::from_str(&self.payload_json)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    id: String,
    job_id: String,
    name: String,
    size_bytes: i64,
    content_type: String,
    created_at: i64,
    storage_ref: String,
}

impl ArtifactRow {
    fn into_artifact(self) -> Artifact {
        Artifact {
            id: Id::from_string(self.id),
            job_id: Id::from_string(self.job_id),
            name: self.name,
            size_bytes: self.size_bytes,
            content_type: self.content_type,
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            storage_ref: self.storage_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgequeue_core::types::{TaskGit, TaskPublish, TaskRuntime};
    use forgequeue_core::TaskPayload;
    use tempfile::TempDir;

    struct TestStorage {
        storage: Storage,
        _dir: TempDir,
    }

    async fn create_test_storage() -> TestStorage {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = Storage::new(&db_path).await.unwrap();
        storage.migrate_embedded().await.unwrap();
        TestStorage { storage, _dir: dir }
    }

    fn create_test_job() -> Job {
        let now = Utc::now();
        Job {
            id: Id::new(),
            payload: JobPayload::Task(TaskPayload {
                repository: "acme/widgets".to_string(),
                instructions: "Fix the flaky test".to_string(),
                skill: None,
                runtime: TaskRuntime {
                    mode: "codex".to_string(),
                    model: None,
                    effort: None,
                },
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
            created_at: now,
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
    async fn insert_and_get_job() {
        let ts = create_test_storage().await;
        let job = create_test_job();

        ts.storage.insert_job(&job).await.unwrap();
        let retrieved = ts.storage.get_job(&job.id).await.unwrap();

        assert_eq!(retrieved.id, job.id);
        assert_eq!(retrieved.status, JobStatus::Queued);
        assert_eq!(retrieved.payload.type_name(), "task");
    }

    #[tokio::test]
    async fn claim_job_marks_running_and_is_exclusive() {
        let ts = create_test_storage().await;
        let job = create_test_job();
        ts.storage.insert_job(&job).await.unwrap();

        let claimed = ts
            .storage
            .claim_job("worker-1", &BTreeSet::new(), None, None, 300)
            .await
            .unwrap()
            .expect("should claim");
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));

        // A second claim attempt finds nothing: the job is no longer queued.
        let second = ts.storage.claim_job("worker-2", &BTreeSet::new(), None, None, 300).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn claim_job_respects_required_capabilities() {
        let ts = create_test_storage().await;
        let mut job = create_test_job();
        job.required_capabilities.insert("gpu".to_string());
        ts.storage.insert_job(&job).await.unwrap();

        let without_gpu = ts.storage.claim_job("worker-1", &BTreeSet::new(), None, None, 300).await.unwrap();
        assert!(without_gpu.is_none());

        let mut caps = BTreeSet::new();
        caps.insert("gpu".to_string());
        let with_gpu = ts.storage.claim_job("worker-1", &caps, None, None, 300).await.unwrap();
        assert!(with_gpu.is_some());
    }

    #[tokio::test]
    async fn heartbeat_renews_lease_for_holder_only() {
        let ts = create_test_storage().await;
        let job = create_test_job();
        ts.storage.insert_job(&job).await.unwrap();
        ts.storage.claim_job("worker-1", &BTreeSet::new(), None, None, 300).await.unwrap();

        ts.storage.heartbeat_job(&job.id, "worker-1", 600).await.unwrap();

        let result = ts.storage.heartbeat_job(&job.id, "worker-2", 600).await;
        assert!(matches!(result, Err(StorageError::LeaseConflict(_, _))));
    }

    #[tokio::test]
    async fn reap_expired_leases_requeues() {
        let ts = create_test_storage().await;
        let job = create_test_job();
        ts.storage.insert_job(&job).await.unwrap();
        // Claim with a lease that's already expired.
        ts.storage.claim_job("worker-1", &BTreeSet::new(), None, None, 0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let reaped = ts.storage.reap_expired_leases().await.unwrap();
        assert_eq!(reaped, 1);

        let job = ts.storage.get_job(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.worker_id.is_none());
    }

    #[tokio::test]
    async fn report_terminal_is_idempotent() {
        let ts = create_test_storage().await;
        let job = create_test_job();
        ts.storage.insert_job(&job).await.unwrap();
        ts.storage.claim_job("worker-1", &BTreeSet::new(), None, None, 300).await.unwrap();

        let first = ts
            .storage
            .report_terminal(&job.id, "worker-1", JobOutcome::Success, None)
            .await
            .unwrap();
        assert_eq!(first.status, JobStatus::Succeeded);

        // Duplicate report of the same terminal state succeeds silently.
        let second = ts
            .storage
            .report_terminal(&job.id, "worker-1", JobOutcome::Success, None)
            .await
            .unwrap();
        assert_eq!(second.status, JobStatus::Succeeded);

        // Conflicting terminal report is rejected.
        let conflicting = ts
            .storage
            .report_terminal(&job.id, "worker-1", JobOutcome::Failure, None)
            .await;
        assert!(conflicting.is_err());
    }

    #[tokio::test]
    async fn report_terminal_rejects_non_holder() {
        let ts = create_test_storage().await;
        let job = create_test_job();
        ts.storage.insert_job(&job).await.unwrap();
        ts.storage.claim_job("worker-1", &BTreeSet::new(), None, None, 300).await.unwrap();

        let result = ts
            .storage
            .report_terminal(&job.id, "worker-2", JobOutcome::Success, None)
            .await;
        assert!(matches!(result, Err(StorageError::LeaseConflict(_, _))));
    }

    #[tokio::test]
    async fn append_and_list_events_keyset_pagination() {
        use forgequeue_core::events::{StageEventPayload, SubmittedPayload};
        use forgequeue_core::types::{EventKind, Stage};

        let ts = create_test_storage().await;
        let job = create_test_job();
        ts.storage.insert_job(&job).await.unwrap();

        let e1 = ts
            .storage
            .append_event(
                &job.id,
                &EventPayload::Submitted(SubmittedPayload {
                    job_id: job.id.clone(),
                    job_type: "task".to_string(),
                    priority: 0,
                }),
                "job submitted",
            )
            .await
            .unwrap();

        let e2 = ts
            .storage
            .append_event(
                &job.id,
                &EventPayload::Stage(StageEventPayload {
                    stage: Stage::Preflight,
                    kind: EventKind::Stage,
                    status: "started".to_string(),
                    duration_ms: None,
                    error: None,
                }),
                "preflight started",
            )
            .await
            .unwrap();

        let all = ts.storage.list_events(&job.id, &EventsQuery::forward(None, 100)).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, e1.id);
        assert_eq!(all[1].id, e2.id);

        let after_first =
            ts.storage.list_events(&job.id, &EventsQuery::forward(Some(e1.id), 100)).await.unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].id, e2.id);

        let desc = ts
            .storage
            .list_events(&job.id, &EventsQuery { sort_desc: true, limit: 100, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(desc[0].id, e2.id);
        assert_eq!(desc[1].id, e1.id);

        let before_second =
            ts.storage.list_events(&job.id, &EventsQuery { before_event_id: Some(e2.id), limit: 100, ..Default::default() }).await.unwrap();
        assert_eq!(before_second.len(), 1);
        assert_eq!(before_second[0].id, e1.id);
    }

    #[tokio::test]
    async fn insert_and_list_artifacts() {
        let ts = create_test_storage().await;
        let job = create_test_job();
        ts.storage.insert_job(&job).await.unwrap();

        let artifact = Artifact {
            id: Id::new(),
            job_id: job.id.clone(),
            name: "logs/preflight.log".to_string(),
            size_bytes: 128,
            content_type: "text/plain".to_string(),
            created_at: Utc::now(),
            storage_ref: "artifacts/job/logs/preflight.log".to_string(),
        };

        ts.storage.insert_artifact(&artifact).await.unwrap();
        let artifacts = ts.storage.list_artifacts(&job.id).await.unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "logs/preflight.log");

        let fetched = ts.storage.get_artifact(&job.id, &artifact.id).await.unwrap();
        assert_eq!(fetched.id, artifact.id);
    }

    #[tokio::test]
    async fn list_jobs_filters_by_status_and_type() {
        let ts = create_test_storage().await;
        let job1 = create_test_job();
        let job2 = create_test_job();
        ts.storage.insert_job(&job1).await.unwrap();
        ts.storage.insert_job(&job2).await.unwrap();
        ts.storage.claim_job("worker-1", &BTreeSet::new(), None, None, 300).await.unwrap();

        let running = ts.storage.list_jobs(Some(JobStatus::Running), None, 10).await.unwrap();
        assert_eq!(running.len(), 1);

        let queued = ts.storage.list_jobs(Some(JobStatus::Queued), Some("task"), 10).await.unwrap();
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn get_job_not_found() {
        let ts = create_test_storage().await;
        let result = ts.storage.get_job(&Id::new()).await;
        assert!(matches!(result, Err(StorageError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn migrate_embedded_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = Storage::new(&db_path).await.unwrap();

        storage.migrate_embedded().await.unwrap();
        storage.migrate_embedded().await.unwrap();

        let job = create_test_job();
        storage.insert_job(&job).await.unwrap();
    }
}
