//! HTTP control plane for forgequeued.
//!
//! Implements the local-only REST API: job
//! submission/lifecycle, the event log, artifacts, worker-pause control,
//! the proposal queue, and manifest ingest runs.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use forgequeue_core::{
    Id, Job, JobOutcome, JobPayload, JobStatus, JobSubmission, ManifestAction, ManifestOptions,
    ManifestPayload, ManifestSource, RequiredCapabilities, ReviewPriority,
};
use futures_util::{
    stream::{self, Stream},
    StreamExt,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::manifest;
use crate::pause::{PauseError, PauseGate, PauseMode};
use crate::proposals::{self, ListFilter, ProposalError};
use crate::queue::{QueueError, QueueService};
use crate::storage::{EventsQuery, Storage};

/// Shared state for HTTP handlers.
pub struct AppState {
    pub storage: Arc<Storage>,
    pub queue: Arc<QueueService>,
    pub pause_gate: Arc<PauseGate>,
    pub auth_token: Option<String>,
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/queue/jobs", post(submit_job).get(list_jobs))
        .route("/queue/jobs/claim", post(claim_job))
        .route("/queue/jobs/{id}", get(get_job))
        .route("/queue/jobs/{id}/cancel", post(cancel_job))
        .route("/queue/jobs/{id}/heartbeat", post(heartbeat_job))
        .route("/queue/jobs/{id}/terminal", post(report_terminal))
        .route("/queue/jobs/{id}/events", get(list_events))
        .route("/queue/jobs/{id}/events/stream", get(stream_events))
        .route("/queue/jobs/{id}/artifacts", get(list_artifacts))
        .route("/queue/jobs/{id}/artifacts/{artifact_id}", get(download_artifact))
        .route("/queue/telemetry/migration", get(telemetry_migration))
        .route("/system/worker-pause", get(get_worker_pause).post(pause_workers))
        .route("/system/worker-pause/resume", post(resume_workers))
        .route("/proposals", post(create_proposal).get(list_proposals))
        .route("/proposals/{id}", get(get_proposal))
        .route("/proposals/{id}/promote", post(promote_proposal))
        .route("/proposals/{id}/dismiss", post(dismiss_proposal))
        .route("/proposals/{id}/priority", post(set_proposal_priority))
        .route("/proposals/{id}/snooze", post(snooze_proposal))
        .route("/proposals/{id}/unsnooze", post(unsnooze_proposal))
        .route("/manifests/{name}", put(put_manifest).get(get_manifest))
        .route("/manifests/{name}/runs", post(run_manifest))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Start the HTTP server.
pub async fn start_server(
    storage: Arc<Storage>,
    queue: Arc<QueueService>,
    pause_gate: Arc<PauseGate>,
    bind_addr: String,
    auth_token: Option<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(AppState { storage, queue, pause_gate, auth_token });
    let router = create_router(state);

    // Local-only control plane.
    let addr: SocketAddr = bind_addr.parse()?;
    info!("HTTP server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if let Some(expected) = &state.auth_token {
        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

        match provided {
            Some(token) if token == expected => Ok(()),
            Some(_) => Err(err(StatusCode::UNAUTHORIZED, "invalid auth token")),
            None => Err(err(StatusCode::UNAUTHORIZED, "missing auth token")),
        }
    } else {
        Ok(())
    }
}

/// Build an error response in the standard shape:
/// `{detail: {code, message}}`. `code` is a stable machine-readable token
/// derived from the status (`bad_request`, `not_found`, `conflict`,
/// `unauthorized`, `internal_error`, ...).
fn err(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    let code = match status {
        StatusCode::BAD_REQUEST => "bad_request",
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::CONFLICT => "conflict",
        StatusCode::SERVICE_UNAVAILABLE => "unavailable",
        _ => "internal_error",
    };
    (status, Json(ErrorResponse { detail: ErrorDetail { code: code.to_string(), message: message.into() } }))
}

// --- Request/Response types ---

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job: Job,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub worker_id: String,
    #[serde(default)]
    pub advertised_capabilities: RequiredCapabilities,
    #[serde(default)]
    pub allowed_types: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_repositories: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub job: Option<Job>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TerminalRequest {
    pub worker_id: String,
    pub outcome: String,
    #[serde(default)]
    pub error: Option<String>,
}

fn parse_job_status(s: &str) -> Option<JobStatus> {
    match s {
        "queued" => Some(JobStatus::Queued),
        "running" => Some(JobStatus::Running),
        "succeeded" => Some(JobStatus::Succeeded),
        "failed" => Some(JobStatus::Failed),
        "cancelled" => Some(JobStatus::Cancelled),
        _ => None,
    }
}

fn parse_job_outcome(s: &str) -> Option<JobOutcome> {
    match s {
        "success" => Some(JobOutcome::Success),
        "failure" => Some(JobOutcome::Failure),
        "cancelled" => Some(JobOutcome::Cancelled),
        _ => None,
    }
}

// --- Handlers: health ---

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// --- Handlers: queue ---

/// POST /queue/jobs
async fn submit_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<JobSubmission>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let job = req.into_job(Utc::now());
    state.queue.submit_job(&job).await.map_err(|e| {
        error!("failed to submit job: {}", e);
        err(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to submit job: {e}"))
    })?;

    info!(job_id = %job.id, "submitted job");
    Ok((StatusCode::CREATED, Json(JobResponse { job })))
}

/// GET /queue/jobs
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let status = query.status.as_deref().and_then(parse_job_status);
    let jobs = state
        .queue
        .list_jobs(status, query.job_type.as_deref(), query.limit.unwrap_or(100))
        .await
        .map_err(|e| {
            error!("failed to list jobs: {}", e);
            err(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to list jobs: {e}"))
        })?;

    Ok(Json(ListJobsResponse { jobs }))
}

/// POST /queue/jobs/claim
///
/// Exposed for external worker processes: the daemon's
/// own embedded `WorkerLoop` calls `QueueService::claim_job` directly and
/// does not go through this endpoint.
async fn claim_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ClaimRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let job = state
        .queue
        .claim_job(
            &req.worker_id,
            &req.advertised_capabilities,
            req.allowed_types.as_deref(),
            req.allowed_repositories.as_deref(),
        )
        .await
        .map_err(|e| {
            error!("claim failed: {}", e);
            err(StatusCode::INTERNAL_SERVER_ERROR, format!("claim failed: {e}"))
        })?;

    Ok(Json(ClaimResponse { job }))
}

/// GET /queue/jobs/{id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let job_id = Id::from_string(id.clone());
    let job = state.queue.get_job(&job_id).await.map_err(|e| {
        warn!("job not found: {}", id);
        err(StatusCode::NOT_FOUND, format!("job not found: {e}"))
    })?;

    Ok(Json(JobResponse { job }))
}

/// POST /queue/jobs/{id}/cancel
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let job_id = Id::from_string(id);
    state.queue.request_cancel(&job_id, req.reason.as_deref()).await.map_err(|e| {
        warn!("failed to cancel job: {}", e);
        err(StatusCode::BAD_REQUEST, format!("failed to cancel job: {e}"))
    })?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /queue/jobs/{id}/heartbeat
async fn heartbeat_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let job_id = Id::from_string(id);
    state.queue.heartbeat(&job_id, &req.worker_id).await.map_err(|e| {
        warn!("failed to renew lease: {}", e);
        err(StatusCode::CONFLICT, format!("failed to renew lease: {e}"))
    })?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /queue/jobs/{id}/terminal
async fn report_terminal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<TerminalRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let job_id = Id::from_string(id);
    let outcome = parse_job_outcome(&req.outcome)
        .ok_or_else(|| err(StatusCode::BAD_REQUEST, format!("unknown outcome: {}", req.outcome)))?;

    let job = state
        .queue
        .report_terminal(&job_id, &req.worker_id, outcome, req.error.as_deref())
        .await
        .map_err(|e| {
            warn!("failed to report terminal outcome: {}", e);
            err(StatusCode::CONFLICT, format!("failed to report terminal outcome: {e}"))
        })?;

    Ok(Json(JobResponse { job }))
}

// --- Handlers: events ---

#[derive(Debug, Deserialize, Default)]
pub struct ListEventsQuery {
    #[serde(default)]
    pub after_event_id: Option<i64>,
    #[serde(default)]
    pub before_event_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub sort_desc: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ListEventsResponse {
    pub events: Vec<forgequeue_core::Event>,
}

impl From<ListEventsQuery> for EventsQuery {
    fn from(q: ListEventsQuery) -> Self {
        EventsQuery {
            after_event_id: q.after_event_id,
            before_event_id: q.before_event_id,
            limit: q.limit.unwrap_or(200),
            sort_desc: q.sort_desc.unwrap_or(false),
        }
    }
}

/// GET /queue/jobs/{id}/events - keyset-paginated event log
/// 4.4): forward or backward walk depending on which cursor is set.
async fn list_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ListEventsQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let job_id = Id::from_string(id);
    let events = state
        .queue
        .list_events(&job_id, &query.into())
        .await
        .map_err(|e| {
            error!("failed to list events: {}", e);
            err(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to list events: {e}"))
        })?;

    Ok(Json(ListEventsResponse { events }))
}

/// GET /queue/jobs/{id}/events/stream - SSE tail of the event log, starting
/// from an optional backfill cursor and polling for new rows until the job
/// reaches a terminal status.
async fn stream_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let job_id = Id::from_string(id.clone());
    let job = state.queue.get_job(&job_id).await.map_err(|e| {
        warn!("job not found: {}", id);
        err(StatusCode::NOT_FOUND, format!("job not found: {e}"))
    })?;

    let queue = Arc::clone(&state.queue);
    let cursor = query.after_event_id;

    let stream = stream::unfold(
        (queue, job_id, cursor, job.status),
        move |(queue, job_id, cursor, status)| async move {
            let events = match queue
                .list_events(&job_id, &EventsQuery::forward(cursor, 200))
                .await
            {
                Ok(events) => events,
                Err(_) => return None,
            };

            if !events.is_empty() {
                let next_cursor = events.last().map(|e| e.id);
                let sse_events: Vec<_> = events
                    .into_iter()
                    .map(|e| {
                        let json = serde_json::to_string(&e).unwrap_or_default();
                        Ok(SseEvent::default().event(e.level.as_str()).data(json).id(e.id.to_string()))
                    })
                    .collect();
                return Some((stream::iter(sse_events), (queue, job_id, next_cursor.or(cursor), status)));
            }

            if status.is_terminal() {
                return None;
            }

            let current = match queue.get_job(&job_id).await {
                Ok(j) => j,
                Err(_) => return None,
            };

            tokio::time::sleep(Duration::from_secs(1)).await;
            Some((stream::iter(vec![]), (queue, job_id, cursor, current.status)))
        },
    )
    .flatten();

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// --- Handlers: artifacts ---

#[derive(Debug, Serialize)]
pub struct ListArtifactsResponse {
    pub artifacts: Vec<forgequeue_core::Artifact>,
}

/// GET /queue/jobs/{id}/artifacts
async fn list_artifacts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let job_id = Id::from_string(id);
    let artifacts = state.queue.list_artifacts(&job_id).await.map_err(|e| {
        error!("failed to list artifacts: {}", e);
        err(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to list artifacts: {e}"))
    })?;

    Ok(Json(ListArtifactsResponse { artifacts }))
}

/// GET /queue/jobs/{id}/artifacts/{artifact_id} - raw artifact bytes.
async fn download_artifact(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, artifact_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let job_id = Id::from_string(id);
    let artifact_id = Id::from_string(artifact_id);
    let artifact = state.queue.get_artifact(&job_id, &artifact_id).await.map_err(|e| {
        warn!("artifact not found: {}", e);
        err(StatusCode::NOT_FOUND, format!("artifact not found: {e}"))
    })?;

    let bytes = forgequeue_core::read_artifact(std::path::Path::new(&artifact.storage_ref)).map_err(|e| {
        error!("failed to read artifact: {}", e);
        err(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to read artifact: {e}"))
    })?;

    Ok(([(header::CONTENT_TYPE, artifact.content_type.clone())], bytes))
}

#[derive(Debug, Deserialize, Default)]
pub struct TelemetryQuery {
    #[serde(default, rename = "windowHours")]
    pub window_hours: Option<i64>,
}

const DEFAULT_TELEMETRY_WINDOW_HOURS: i64 = 24;

/// GET /queue/telemetry/migration - job volume and publish-outcome rates
/// over a trailing window (`windowHours`, default 24h) the CLI's
/// `doctor`-style commands poll.
async fn telemetry_migration(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TelemetryQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let window_hours = query.window_hours.unwrap_or(DEFAULT_TELEMETRY_WINDOW_HOURS).max(1);
    let window_start = Utc::now() - chrono::Duration::hours(window_hours);

    let telemetry = state.queue.job_telemetry(window_start.timestamp_millis()).await.map_err(|e| {
        error!("failed to compute telemetry: {}", e);
        err(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to compute telemetry: {e}"))
    })?;

    let publish_total = telemetry.succeeded + telemetry.failed;
    let (published_rate, failed_rate) = if publish_total > 0 {
        (telemetry.succeeded as f64 / publish_total as f64, telemetry.failed as f64 / publish_total as f64)
    } else {
        (0.0, 0.0)
    };

    let job_volume_by_type: std::collections::BTreeMap<String, i64> =
        telemetry.volume_by_type.into_iter().collect();

    Ok(Json(serde_json::json!({
        "totalJobs": telemetry.total_jobs,
        "jobVolumeByType": job_volume_by_type,
        "publishOutcomes": {
            "publishedRate": published_rate,
            "failedRate": failed_rate,
        },
    })))
}

// --- Handlers: worker-pause ---

#[derive(Debug, Serialize)]
pub struct WorkerPauseResponse {
    pub system: WorkerPauseSystem,
    pub metrics: WorkerPauseMetrics,
    pub audit: WorkerPauseAudit,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPauseSystem {
    pub workers_paused: bool,
    pub mode: String,
    pub reason: Option<String>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPauseMetrics {
    pub queued: i64,
    pub running: i64,
    pub stale_running: i64,
    pub is_drained: bool,
}

#[derive(Debug, Serialize)]
pub struct WorkerPauseAudit {
    pub latest: Vec<WorkerPauseAuditEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPauseAuditEntry {
    pub action: String,
    pub mode: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

const WORKER_PAUSE_AUDIT_TAIL: i64 = 10;

async fn worker_pause_response(state: &AppState) -> Result<WorkerPauseResponse, (StatusCode, Json<ErrorResponse>)> {
    let state_row = state.pause_gate.state().await.map_err(|e| {
        error!("failed to read worker-pause state: {}", e);
        err(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to read worker-pause state: {e}"))
    })?;
    let health = state.queue.queue_health_counts().await.map_err(|e| {
        error!("failed to compute queue health: {}", e);
        err(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to compute queue health: {e}"))
    })?;
    let audit = state.pause_gate.recent_audit(WORKER_PAUSE_AUDIT_TAIL).await.map_err(|e| {
        error!("failed to read worker-pause audit log: {}", e);
        err(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to read worker-pause audit log: {e}"))
    })?;

    Ok(WorkerPauseResponse {
        system: WorkerPauseSystem {
            workers_paused: state_row.workers_paused,
            mode: state_row.mode.as_str().to_string(),
            reason: state_row.reason,
            version: state_row.version,
            updated_at: state_row.updated_at,
        },
        metrics: WorkerPauseMetrics {
            queued: health.queued,
            running: health.running,
            stale_running: health.stale_running,
            is_drained: health.running == 0,
        },
        audit: WorkerPauseAudit {
            latest: audit
                .into_iter()
                .map(|entry| WorkerPauseAuditEntry {
                    action: entry.action,
                    mode: entry.mode.map(|m| m.as_str().to_string()),
                    reason: entry.reason,
                    created_at: entry.created_at,
                })
                .collect(),
        },
    })
}

/// GET /system/worker-pause
async fn get_worker_pause(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;
    Ok(Json(worker_pause_response(&state).await?))
}

#[derive(Debug, Deserialize)]
pub struct PauseRequest {
    #[serde(default)]
    pub mode: Option<String>,
    pub reason: String,
}

/// POST /system/worker-pause
async fn pause_workers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PauseRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let mode = match req.mode.as_deref() {
        Some("quiesce") => PauseMode::Quiesce,
        Some("drain") | None => PauseMode::Drain,
        Some(other) => return Err(err(StatusCode::BAD_REQUEST, format!("unknown pause mode: {other}"))),
    };

    state.pause_gate.pause(mode, &req.reason).await.map_err(|e| {
        error!("failed to pause workers: {}", e);
        err(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to pause workers: {e}"))
    })?;

    info!(mode = mode.as_str(), "paused workers");
    Ok(Json(worker_pause_response(&state).await?))
}

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub reason: String,
    #[serde(default)]
    pub force_resume: bool,
}

/// POST /system/worker-pause/resume - requires `forceResume` unless the
/// queue is already drained.
async fn resume_workers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ResumeRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let is_drained = state.queue.is_drained().await.map_err(|e| {
        error!("failed to compute drain status: {}", e);
        err(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to compute drain status: {e}"))
    })?;

    state.pause_gate.resume(&req.reason, req.force_resume, is_drained).await.map_err(|e| match e {
        PauseError::NotDrained => err(StatusCode::CONFLICT, e.to_string()),
        other => err(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    })?;

    info!("resumed workers");
    Ok(Json(worker_pause_response(&state).await?))
}

// --- Handlers: proposals ---

#[derive(Debug, Serialize)]
pub struct ProposalResponse {
    pub proposal: forgequeue_core::Proposal,
}

#[derive(Debug, Deserialize)]
pub struct CreateProposalRequest {
    pub repository: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub review_priority: ReviewPriority,
    pub dedup_hash: String,
    pub origin: forgequeue_core::ProposalOrigin,
    #[serde(default)]
    pub task_preview: Option<String>,
    pub task_create_request: JobSubmission,
}

/// POST /proposals
async fn create_proposal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateProposalRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let proposal = proposals::create(
        &state.storage,
        &req.repository,
        &req.category,
        &req.tags,
        req.review_priority,
        &req.dedup_hash,
        req.origin,
        req.task_preview.as_deref(),
        &req.task_create_request,
    )
    .await
    .map_err(proposal_error)?;

    Ok((StatusCode::CREATED, Json(ProposalResponse { proposal })))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListProposalsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub include_snoozed: bool,
    #[serde(default)]
    pub limit: Option<i64>,
}

fn parse_proposal_status(s: &str) -> Option<forgequeue_core::ProposalStatus> {
    use forgequeue_core::ProposalStatus::*;
    match s {
        "open" => Some(Open),
        "promoted" => Some(Promoted),
        "dismissed" => Some(Dismissed),
        "accepted" => Some(Accepted),
        "rejected" => Some(Rejected),
        "snoozed" => Some(Snoozed),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
pub struct ListProposalsResponse {
    pub proposals: Vec<forgequeue_core::Proposal>,
}

/// GET /proposals
async fn list_proposals(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListProposalsQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let filter = ListFilter {
        status: query.status.as_deref().and_then(parse_proposal_status),
        repository: query.repository,
        category: query.category,
        include_snoozed: query.include_snoozed,
        limit: query.limit.unwrap_or(100),
    };

    let proposals = proposals::list(&state.storage, &filter).await.map_err(proposal_error)?;
    Ok(Json(ListProposalsResponse { proposals }))
}

/// GET /proposals/{id}
async fn get_proposal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let proposal = proposals::get(&state.storage, &Id::from_string(id)).await.map_err(proposal_error)?;
    Ok(Json(ProposalResponse { proposal }))
}

#[derive(Debug, Deserialize, Default)]
pub struct PromoteRequest {
    #[serde(default)]
    pub overrides: Option<JobSubmission>,
}

#[derive(Debug, Serialize)]
pub struct PromoteResponse {
    pub job: Job,
}

/// POST /proposals/{id}/promote
async fn promote_proposal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<PromoteRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let job = proposals::promote(&state.storage, &state.queue, &Id::from_string(id), req.overrides)
        .await
        .map_err(proposal_error)?;

    Ok(Json(PromoteResponse { job }))
}

#[derive(Debug, Deserialize, Default)]
pub struct NoteRequest {
    #[serde(default)]
    pub note: Option<String>,
}

/// POST /proposals/{id}/dismiss
async fn dismiss_proposal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<NoteRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    proposals::dismiss(&state.storage, &Id::from_string(id), req.note.as_deref())
        .await
        .map_err(proposal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PriorityRequest {
    pub priority: ReviewPriority,
}

/// POST /proposals/{id}/priority
async fn set_proposal_priority(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<PriorityRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    proposals::update_priority(&state.storage, &Id::from_string(id), req.priority)
        .await
        .map_err(proposal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SnoozeRequest {
    pub until: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
}

/// POST /proposals/{id}/snooze
async fn snooze_proposal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<SnoozeRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    proposals::snooze(&state.storage, &Id::from_string(id), req.until, req.note.as_deref())
        .await
        .map_err(proposal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /proposals/{id}/unsnooze
async fn unsnooze_proposal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    proposals::unsnooze(&state.storage, &Id::from_string(id)).await.map_err(proposal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

fn proposal_error(e: ProposalError) -> (StatusCode, Json<ErrorResponse>) {
    match e {
        ProposalError::NotFound(ref id) => err(StatusCode::NOT_FOUND, format!("proposal not found: {id}")),
        ProposalError::AlreadyTerminal(ref id) => {
            err(StatusCode::CONFLICT, format!("proposal {id} is already in a terminal state"))
        }
        ProposalError::Queue(QueueError::Paused) => err(StatusCode::SERVICE_UNAVAILABLE, "queue is paused"),
        other => {
            error!("proposal operation failed: {}", other);
            err(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// --- Handlers: manifests ---

#[derive(Debug, Deserialize)]
pub struct PutManifestRequest {
    pub yaml: String,
}

#[derive(Debug, Serialize)]
pub struct ManifestSummaryResponse {
    pub manifest: manifest::ManifestSummary,
}

/// PUT /manifests/{name}
async fn put_manifest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(req): Json<PutManifestRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let summary = manifest::upsert_manifest(&state.storage, &name, &req.yaml).await.map_err(manifest_error)?;
    Ok(Json(ManifestSummaryResponse { manifest: summary }))
}

#[derive(Debug, Serialize)]
pub struct ManifestViewResponse {
    pub manifest: manifest::ManifestView,
}

/// GET /manifests/{name}
async fn get_manifest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    let view = manifest::get_manifest(&state.storage, &name).await.map_err(manifest_error)?;
    Ok(Json(ManifestViewResponse { manifest: view }))
}

#[derive(Debug, Deserialize, Default)]
pub struct RunManifestRequest {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force_full: bool,
    #[serde(default)]
    pub max_docs: Option<u64>,
    #[serde(default)]
    pub priority: i64,
}

/// POST /manifests/{name}/runs - submits a `manifest` job that runs this
/// manifest by registry reference.
async fn run_manifest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(req): Json<RunManifestRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    // Ensure the manifest exists before queueing a run against it.
    manifest::get_manifest(&state.storage, &name).await.map_err(manifest_error)?;

    let submission = JobSubmission {
        payload: JobPayload::Manifest(ManifestPayload {
            name: name.clone(),
            source: ManifestSource::Registry { name: name.clone() },
            action: ManifestAction::Run,
            options: ManifestOptions { dry_run: req.dry_run, force_full: req.force_full, max_docs: req.max_docs },
        }),
        priority: req.priority,
        max_attempts: 1,
        affinity_key: None,
        required_capabilities: None,
        queue_name: None,
    };

    let job = submission.into_job(Utc::now());
    state.queue.submit_job(&job).await.map_err(|e| {
        error!("failed to submit manifest run: {}", e);
        err(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to submit manifest run: {e}"))
    })?;

    info!(manifest = %name, job_id = %job.id, "submitted manifest run");
    Ok((StatusCode::CREATED, Json(JobResponse { job })))
}

fn manifest_error(e: manifest::ManifestError) -> (StatusCode, Json<ErrorResponse>) {
    use manifest::ManifestError::*;
    match e {
        ManifestNotFound(ref name) => err(StatusCode::NOT_FOUND, format!("manifest not found: {name}")),
        SourceNotFound(ref what) => err(StatusCode::NOT_FOUND, format!("source not found: {what}")),
        SchemaMismatch { .. } => err(StatusCode::CONFLICT, e.to_string()),
        Yaml(ref yaml_err) => err(StatusCode::BAD_REQUEST, format!("invalid manifest yaml: {yaml_err}")),
        other => {
            error!("manifest operation failed: {}", other);
            err(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;
    use forgequeue_core::{ManifestAction, ManifestOptions, ManifestSource, TaskGit, TaskPublish, TaskRuntime};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn create_test_app() -> (Router, Arc<AppState>, TempDir) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = Storage::new(&db_path).await.unwrap();
        storage.migrate_embedded().await.unwrap();
        let storage = Arc::new(storage);
        let pause_gate = Arc::new(PauseGate::new(Arc::clone(&storage)));
        let queue = Arc::new(QueueService::new(Arc::clone(&storage), Arc::clone(&pause_gate), 300));

        let state = Arc::new(AppState { storage, queue, pause_gate, auth_token: None });
        let router = create_router(Arc::clone(&state));
        (router, state, dir)
    }

    fn sample_submission() -> JobSubmission {
        JobSubmission {
            payload: JobPayload::Task(forgequeue_core::TaskPayload {
                repository: "acme/widgets".to_string(),
                instructions: "fix the flaky test".to_string(),
                skill: None,
                runtime: TaskRuntime { mode: "codex".to_string(), model: None, effort: None },
                git: TaskGit::default(),
                publish: TaskPublish::default(),
                steps: vec![],
                applied_step_templates: vec![],
            }),
            priority: 0,
            max_attempts: 1,
            affinity_key: None,
            required_capabilities: None,
            queue_name: None,
        }
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let (app, _, _dir) = create_test_app().await;
        let response: Response =
            app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_job_returns_created() {
        let (app, _, _dir) = create_test_app().await;
        let body = serde_json::to_string(&sample_submission()).unwrap();

        let response: Response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/queue/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn list_jobs_returns_empty_initially() {
        let (app, _, _dir) = create_test_app().await;
        let response: Response =
            app.oneshot(Request::builder().uri("/queue/jobs").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_nonexistent_job_returns_404() {
        let (app, _, _dir) = create_test_app().await;
        let response: Response = app
            .oneshot(Request::builder().uri("/queue/jobs/nonexistent-id").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn auth_token_required_when_configured() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = Storage::new(&db_path).await.unwrap();
        storage.migrate_embedded().await.unwrap();
        let storage = Arc::new(storage);
        let pause_gate = Arc::new(PauseGate::new(Arc::clone(&storage)));
        let queue = Arc::new(QueueService::new(Arc::clone(&storage), Arc::clone(&pause_gate), 300));

        let state = Arc::new(AppState { storage, queue, pause_gate, auth_token: Some("secret-token".to_string()) });
        let app = create_router(state);

        let response: Response =
            app.clone().oneshot(Request::builder().uri("/queue/jobs").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response: Response = app
            .oneshot(
                Request::builder()
                    .uri("/queue/jobs")
                    .header("authorization", "Bearer secret-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn worker_pause_round_trips_through_http() {
        let (app, _, _dir) = create_test_app().await;

        let response: Response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/system/worker-pause")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"mode":"drain","reason":"maintenance"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response: Response = app
            .oneshot(Request::builder().uri("/system/worker-pause").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn proposal_create_then_promote_round_trips() {
        let (app, state, _dir) = create_test_app().await;

        let create_body = serde_json::json!({
            "repository": "acme/widgets",
            "category": "reliability",
            "tags": ["flaky"],
            "dedup_hash": "hash-1",
            "origin": {"source": "flaky-scan", "id": "scan-1", "metadata": null},
            "task_preview": "fix flaky test",
            "task_create_request": sample_submission(),
        });

        let response: Response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/proposals")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&create_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let proposal_id = parsed["proposal"]["id"].as_str().unwrap().to_string();

        let response: Response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/proposals/{proposal_id}/promote"))
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let _ = state;
    }

    #[tokio::test]
    async fn manifest_put_then_get_round_trips() {
        let (app, _, _dir) = create_test_app().await;

        let yaml = "data_sources:\n  - id: local\n    type: filesystem\n    path: /tmp\nembedding:\n  provider: local\n  model: sha256\n  dimensions: 8\n  distance: cosine\ntarget:\n  collection: docs\n";
        let put_body = serde_json::json!({ "yaml": yaml });

        let response: Response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/manifests/docs")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&put_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response: Response =
            app.oneshot(Request::builder().uri("/manifests/docs").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn run_manifest_returns_404_for_unknown_manifest() {
        let (app, _, _dir) = create_test_app().await;
        let response: Response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/manifests/unknown/runs")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let _ = (ManifestAction::Run, ManifestSource::Registry { name: "x".to_string() }, ManifestOptions::default());
    }
}
