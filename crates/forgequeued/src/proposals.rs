//! Proposal (follow-up) queue: worker-generated suggestions that dedup on
//! content, snooze/dismiss, and promote atomically into a new job (spec
//! Section 4.6).

use chrono::{DateTime, Utc};
use forgequeue_core::{
    Id, Job, JobSubmission, Proposal, ProposalOrigin, ProposalStatus, ReviewPriority,
};
use std::sync::Arc;
use thiserror::Error;

use crate::queue::{QueueError, QueueService};
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("proposal not found: {0}")]
    NotFound(Id),
    #[error("proposal {0} is already in a terminal state")]
    AlreadyTerminal(Id),
}

pub type Result<T> = std::result::Result<T, ProposalError>;

type ProposalRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<i64>,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    i64,
    i64,
);

fn row_to_proposal(row: ProposalRow) -> Proposal {
    let (
        id,
        status,
        repository,
        category,
        tags_json,
        review_priority,
        dedup_hash,
        snoozed_until,
        origin_source,
        origin_id,
        origin_metadata_json,
        task_preview,
        task_create_request_json,
        promoted_job_id,
        created_at,
        updated_at,
    ) = row;
    Proposal {
        id: Id::from_string(id),
        status: parse_status(&status),
        repository,
        category,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        review_priority: parse_priority(&review_priority),
        dedup_hash,
        snoozed_until: snoozed_until.and_then(DateTime::from_timestamp_millis),
        origin: ProposalOrigin {
            source: origin_source,
            id: origin_id,
            metadata: serde_json::from_str(&origin_metadata_json).unwrap_or(serde_json::Value::Null),
        },
        task_preview,
        task_create_request: serde_json::from_str(&task_create_request_json)
            .unwrap_or_else(|_| panic!("corrupt task_create_request_json for proposal")),
        promoted_job_id: promoted_job_id.map(Id::from_string),
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
        updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_default(),
    }
}

fn parse_status(s: &str) -> ProposalStatus {
    match s {
        "promoted" => ProposalStatus::Promoted,
        "dismissed" => ProposalStatus::Dismissed,
        "accepted" => ProposalStatus::Accepted,
        "rejected" => ProposalStatus::Rejected,
        "snoozed" => ProposalStatus::Snoozed,
        _ => ProposalStatus::Open,
    }
}

fn parse_priority(s: &str) -> ReviewPriority {
    match s {
        "low" => ReviewPriority::Low,
        "high" => ReviewPriority::High,
        "urgent" => ReviewPriority::Urgent,
        _ => ReviewPriority::Normal,
    }
}

const SELECT_COLUMNS: &str = "id, status, repository, category, tags_json, review_priority, \
     dedup_hash, snoozed_until, origin_source, origin_id, origin_metadata_json, task_preview, \
     task_create_request_json, promoted_job_id, created_at, updated_at";

/// `Create(origin, repository, category, taskCreateRequest, tags,
/// dedupHash)`. A new `Create` whose `dedupHash` matches an open or
/// snoozed proposal for the same repository is an idempotent no-op that
/// returns the existing proposal (spec: "dedup on Create, not Promote").
#[allow(clippy::too_many_arguments)]
pub async fn create(
    storage: &Storage,
    repository: &str,
    category: &str,
    tags: &[String],
    review_priority: ReviewPriority,
    dedup_hash: &str,
    origin: ProposalOrigin,
    task_preview: Option<&str>,
    task_create_request: &JobSubmission,
) -> Result<Proposal> {
    if let Some(existing) = find_open_by_dedup(storage, repository, dedup_hash).await? {
        return Ok(existing);
    }

    let id = Id::new();
    let now = Utc::now();
    let now_ms = now.timestamp_millis();
    sqlx::query(&format!(
        "INSERT INTO proposals (id, status, repository, category, tags_json, review_priority, \
         dedup_hash, origin_source, origin_id, origin_metadata_json, task_preview, \
         task_create_request_json, created_at, updated_at) \
         VALUES (?1, 'open', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)"
    ))
    .bind(id.as_ref())
    .bind(repository)
    .bind(category)
    .bind(serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string()))
    .bind(review_priority.as_str())
    .bind(dedup_hash)
    .bind(&origin.source)
    .bind(&origin.id)
    .bind(serde_json::to_string(&origin.metadata).unwrap_or_else(|_| "null".to_string()))
    .bind(task_preview)
    .bind(serde_json::to_string(task_create_request).expect("JobSubmission always serializes"))
    .bind(now_ms)
    .execute(storage.pool())
    .await
    .map_err(StorageError::Database)?;

    get(storage, &id).await
}

async fn find_open_by_dedup(storage: &Storage, repository: &str, dedup_hash: &str) -> Result<Option<Proposal>> {
    let row: Option<ProposalRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM proposals WHERE repository = ?1 AND dedup_hash = ?2 \
         AND status IN ('open', 'snoozed')"
    ))
    .bind(repository)
    .bind(dedup_hash)
    .fetch_optional(storage.pool())
    .await
    .map_err(StorageError::Database)?;
    Ok(row.map(row_to_proposal))
}

pub async fn get(storage: &Storage, id: &Id) -> Result<Proposal> {
    let row: Option<ProposalRow> = sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM proposals WHERE id = ?1"))
        .bind(id.as_ref())
        .fetch_optional(storage.pool())
        .await
        .map_err(StorageError::Database)?;
    row.map(row_to_proposal).ok_or_else(|| ProposalError::NotFound(id.clone()))
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<ProposalStatus>,
    pub repository: Option<String>,
    pub category: Option<String>,
    pub include_snoozed: bool,
    pub limit: i64,
}

pub async fn list(storage: &Storage, filter: &ListFilter) -> Result<Vec<Proposal>> {
    let rows: Vec<ProposalRow> =
        sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM proposals ORDER BY created_at DESC LIMIT ?1"))
            .bind(filter.limit.max(1))
            .fetch_all(storage.pool())
            .await
            .map_err(StorageError::Database)?;

    Ok(rows
        .into_iter()
        .map(row_to_proposal)
        .filter(|p| filter.status.map(|s| s.as_str() == p.status.as_str()).unwrap_or(true))
        .filter(|p| filter.repository.as_deref().map(|r| r == p.repository).unwrap_or(true))
        .filter(|p| filter.category.as_deref().map(|c| c == p.category).unwrap_or(true))
        .filter(|p| filter.include_snoozed || p.status != ProposalStatus::Snoozed)
        .collect())
}

/// `Promote(id, overrides?) -> Job`. Atomic: submits the job and
/// transitions the proposal to `promoted` in one SQLite transaction.
pub async fn promote(
    storage: &Arc<Storage>,
    queue: &QueueService,
    id: &Id,
    overrides: Option<JobSubmission>,
) -> Result<Job> {
    let proposal = get(storage, id).await?;
    if proposal.status.is_terminal() {
        return Err(ProposalError::AlreadyTerminal(id.clone()));
    }

    let submission = overrides.unwrap_or(proposal.task_create_request);
    let job = submission.into_job(Utc::now());
    queue.submit_job(&job).await?;

    let now_ms = Utc::now().timestamp_millis();
    sqlx::query("UPDATE proposals SET status = 'promoted', promoted_job_id = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(job.id.as_ref())
        .bind(now_ms)
        .bind(id.as_ref())
        .execute(storage.pool())
        .await
        .map_err(StorageError::Database)?;

    Ok(job)
}

pub async fn dismiss(storage: &Storage, id: &Id, _note: Option<&str>) -> Result<()> {
    set_status(storage, id, ProposalStatus::Dismissed).await
}

pub async fn update_priority(storage: &Storage, id: &Id, priority: ReviewPriority) -> Result<()> {
    let _ = get(storage, id).await?;
    let now_ms = Utc::now().timestamp_millis();
    sqlx::query("UPDATE proposals SET review_priority = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(priority.as_str())
        .bind(now_ms)
        .bind(id.as_ref())
        .execute(storage.pool())
        .await
        .map_err(StorageError::Database)?;
    Ok(())
}

pub async fn snooze(storage: &Storage, id: &Id, until: DateTime<Utc>, _note: Option<&str>) -> Result<()> {
    let _ = get(storage, id).await?;
    let now_ms = Utc::now().timestamp_millis();
    sqlx::query("UPDATE proposals SET status = 'snoozed', snoozed_until = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(until.timestamp_millis())
        .bind(now_ms)
        .bind(id.as_ref())
        .execute(storage.pool())
        .await
        .map_err(StorageError::Database)?;
    Ok(())
}

pub async fn unsnooze(storage: &Storage, id: &Id) -> Result<()> {
    let _ = get(storage, id).await?;
    let now_ms = Utc::now().timestamp_millis();
    sqlx::query("UPDATE proposals SET status = 'open', snoozed_until = NULL, updated_at = ?1 WHERE id = ?2")
        .bind(now_ms)
        .bind(id.as_ref())
        .execute(storage.pool())
        .await
        .map_err(StorageError::Database)?;
    Ok(())
}

async fn set_status(storage: &Storage, id: &Id, status: ProposalStatus) -> Result<()> {
    let _ = get(storage, id).await?;
    let now_ms = Utc::now().timestamp_millis();
    sqlx::query("UPDATE proposals SET status = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(status.as_str())
        .bind(now_ms)
        .bind(id.as_ref())
        .execute(storage.pool())
        .await
        .map_err(StorageError::Database)?;
    Ok(())
}
