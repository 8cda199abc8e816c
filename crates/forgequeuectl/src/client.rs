//! HTTP client for forgequeued.
//!
//! Communicates with the daemon's local control plane:
//! job submission/lifecycle, the event log, artifacts, worker-pause
//! control, the proposal queue, and manifest ingest runs.

use forgequeue_core::{
    Artifact, Event, Job, JobSubmission, Proposal, RequiredCapabilities, ReviewPriority,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running at {addr}\n  → start with: forgequeued\n  → or set FORGEQUEUE_ADDR if using a different address")]
    ConnectionFailed { addr: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("unauthorized: check FORGEQUEUE_TOKEN env var or --token flag")]
    Unauthorized,

    #[error("queue is paused")]
    Paused,

    #[error(
        "daemon not ready after {timeout_ms}ms at {addr}\n  → ensure forgequeued is running\n  → check FORGEQUEUE_TOKEN if auth is enabled"
    )]
    DaemonNotReady { addr: String, timeout_ms: u64 },
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e.url().map(|u| u.to_string()).unwrap_or_else(|| "unknown".to_string());
            ClientError::ConnectionFailed { addr }
        } else {
            ClientError::HttpError { status: e.status().map(|s| s.as_u16()).unwrap_or(0), message: e.to_string() }
        }
    }
}

/// Error response shape from the daemon: `{detail: {code, message}}`.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub detail: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    #[allow(dead_code)]
    pub code: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct JobResponse {
    pub job: Job,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize, Default)]
pub struct ClaimRequest {
    pub worker_id: String,
    #[serde(default)]
    pub advertised_capabilities: RequiredCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ClaimResponse {
    pub job: Option<Job>,
}

#[derive(Debug, Serialize, Default)]
pub struct CancelRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListEventsResponse {
    pub events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
pub struct ListArtifactsResponse {
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Serialize)]
pub struct PauseRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct ResumeRequest {
    pub reason: String,
    #[serde(default)]
    pub force_resume: bool,
}

#[derive(Debug, Deserialize)]
pub struct WorkerPauseResponse {
    pub system: WorkerPauseSystem,
    pub metrics: WorkerPauseMetrics,
    pub audit: WorkerPauseAudit,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPauseSystem {
    pub workers_paused: bool,
    pub mode: String,
    pub reason: Option<String>,
    pub version: i64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPauseMetrics {
    pub queued: i64,
    pub running: i64,
    pub stale_running: i64,
    pub is_drained: bool,
}

#[derive(Debug, Deserialize)]
pub struct WorkerPauseAudit {
    pub latest: Vec<WorkerPauseAuditEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPauseAuditEntry {
    pub action: String,
    pub mode: Option<String>,
    pub reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ProposalResponse {
    pub proposal: Proposal,
}

#[derive(Debug, Deserialize)]
pub struct ListProposalsResponse {
    pub proposals: Vec<Proposal>,
}

#[derive(Debug, Serialize, Default)]
pub struct PromoteRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<JobSubmission>,
}

#[derive(Debug, Deserialize)]
pub struct PromoteResponse {
    pub job: Job,
}

#[derive(Debug, Serialize, Default)]
pub struct PriorityRequest {
    pub priority: ReviewPriority,
}

#[derive(Debug, Serialize, Default)]
pub struct NoteRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestSummaryResponse {
    pub manifest: ManifestSummary,
}

#[derive(Debug, Deserialize)]
pub struct ManifestViewResponse {
    pub manifest: ManifestView,
}

#[derive(Debug, Serialize, Default)]
pub struct RunManifestRequest {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force_full: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_docs: Option<u64>,
    #[serde(default)]
    pub priority: i64,
}

/// Wire-shape mirrors of `forgequeued::manifest::{ManifestSummary,
/// ManifestView, CheckpointSummary}` — duplicated here rather than
/// depending on the daemon crate from the CLI binary.
#[derive(Debug, Deserialize)]
pub struct ManifestSummary {
    pub name: String,
    pub content_hash: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CheckpointSummary {
    pub data_source_id: String,
    pub doc_count: u64,
    pub last_run_started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_run_finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestView {
    pub name: String,
    pub yaml_content: String,
    pub content_hash: String,
    pub checkpoints: Vec<CheckpointSummary>,
}

/// Default total timeout for daemon readiness probe.
const DEFAULT_READY_TIMEOUT_MS: u64 = 5000;

/// Initial backoff delay for readiness probe.
const INITIAL_BACKOFF_MS: u64 = 200;

/// HTTP client for forgequeued.
pub struct Client {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            http: reqwest::Client::new(),
        }
    }

    pub fn addr(&self) -> &str {
        &self.base_url
    }

    /// Probe `/health`. `Ok(true)` if healthy, `Ok(false)` if unhealthy
    /// response, `Err` if the connection failed outright.
    pub async fn check_health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        Ok(response.status().is_success())
    }

    pub async fn wait_for_ready(&self) -> Result<(), ClientError> {
        self.wait_for_ready_with_timeout(DEFAULT_READY_TIMEOUT_MS).await
    }

    pub async fn wait_for_ready_with_timeout(&self, timeout_ms: u64) -> Result<(), ClientError> {
        let start = std::time::Instant::now();
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.check_health().await {
                Ok(true) => return Ok(()),
                Ok(false) | Err(_) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    if elapsed >= timeout_ms {
                        return Err(ClientError::DaemonNotReady { addr: self.base_url.clone(), timeout_ms });
                    }

                    eprintln!("waiting for daemon at {} (retrying in {}ms)", self.base_url, backoff_ms);

                    let remaining = timeout_ms.saturating_sub(elapsed);
                    let sleep_ms = backoff_ms.min(remaining);
                    tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;

                    backoff_ms = backoff_ms.saturating_mul(2);
                }
            }
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    async fn handle_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();

        if status == 401 {
            return ClientError::Unauthorized;
        }
        if status == 404 {
            return ClientError::NotFound("resource not found".to_string());
        }
        if status == 503 {
            return ClientError::Paused;
        }

        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.detail.message)
            .unwrap_or_else(|_| "unknown error".to_string());

        ClientError::HttpError { status, message }
    }

    /// POST /queue/jobs
    pub async fn submit_job(&self, req: &JobSubmission) -> Result<Job, ClientError> {
        let url = format!("{}/queue/jobs", self.base_url);
        let response = self.http.post(&url).headers(self.headers()).json(req).send().await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: JobResponse = response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.job)
    }

    /// GET /queue/jobs?status=&job_type=&limit=
    pub async fn list_jobs(
        &self,
        status: Option<&str>,
        job_type: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<Job>, ClientError> {
        let mut url = format!("{}/queue/jobs", self.base_url);
        let mut params = vec![];
        if let Some(s) = status {
            params.push(format!("status={}", urlencoding::encode(s)));
        }
        if let Some(t) = job_type {
            params.push(format!("job_type={}", urlencoding::encode(t)));
        }
        if let Some(l) = limit {
            params.push(format!("limit={}", l));
        }
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }

        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: ListJobsResponse = response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.jobs)
    }

    /// GET /queue/jobs/{id}
    pub async fn get_job(&self, job_id: &str) -> Result<Job, ClientError> {
        let url = format!("{}/queue/jobs/{}", self.base_url, job_id);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: JobResponse = response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.job)
    }

    /// POST /queue/jobs/claim - for external worker processes.
    pub async fn claim_job(&self, req: &ClaimRequest) -> Result<Option<Job>, ClientError> {
        let url = format!("{}/queue/jobs/claim", self.base_url);
        let response = self.http.post(&url).headers(self.headers()).json(req).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: ClaimResponse = response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.job)
    }

    /// POST /queue/jobs/{id}/cancel
    pub async fn cancel_job(&self, job_id: &str, reason: Option<&str>) -> Result<(), ClientError> {
        let url = format!("{}/queue/jobs/{}/cancel", self.base_url, job_id);
        let req = CancelRequest { reason: reason.map(String::from) };
        let response = self.http.post(&url).headers(self.headers()).json(&req).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    /// GET /queue/jobs/{id}/events?after_event_id=&limit=&sort_desc=
    pub async fn list_events(
        &self,
        job_id: &str,
        after_event_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Event>, ClientError> {
        let mut url = format!("{}/queue/jobs/{}/events", self.base_url, job_id);
        let mut params = vec![];
        if let Some(c) = after_event_id {
            params.push(format!("after_event_id={}", c));
        }
        if let Some(l) = limit {
            params.push(format!("limit={}", l));
        }
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }

        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: ListEventsResponse = response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.events)
    }

    /// GET /queue/jobs/{id}/artifacts
    pub async fn list_artifacts(&self, job_id: &str) -> Result<Vec<Artifact>, ClientError> {
        let url = format!("{}/queue/jobs/{}/artifacts", self.base_url, job_id);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: ListArtifactsResponse =
            response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.artifacts)
    }

    /// GET /queue/jobs/{id}/artifacts/{artifact_id} - writes the raw bytes to `dest`.
    pub async fn download_artifact(
        &self,
        job_id: &str,
        artifact_id: &str,
        dest: &std::path::Path,
    ) -> Result<(), ClientError> {
        let url = format!("{}/queue/jobs/{}/artifacts/{}", self.base_url, job_id, artifact_id);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let bytes = response.bytes().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        std::fs::write(dest, &bytes).map_err(|e| ClientError::IoError(e.to_string()))?;
        Ok(())
    }

    /// GET /queue/jobs/{id}/events/stream (SSE tail of the event log).
    ///
    /// Prints each event's message to stdout as it arrives. Returns once
    /// the stream closes (the daemon closes it once the job reaches a
    /// terminal status).
    pub async fn tail_events(&self, job_id: &str) -> Result<(), ClientError> {
        use futures::StreamExt;

        let url = format!("{}/queue/jobs/{}/events/stream", self.base_url, job_id);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClientError::IoError(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(end) = buffer.find("\n\n") {
                let event_str = buffer[..end].to_string();
                buffer = buffer[end + 2..].to_string();

                if let Some(event) = parse_sse_job_event(&event_str) {
                    println!("[{}] {}", event.level, event.message);
                }
            }
        }

        Ok(())
    }

    /// GET /system/worker-pause
    pub async fn get_worker_pause(&self) -> Result<WorkerPauseResponse, ClientError> {
        let url = format!("{}/system/worker-pause", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// POST /system/worker-pause
    pub async fn pause_workers(&self, mode: Option<&str>, reason: &str) -> Result<WorkerPauseResponse, ClientError> {
        let url = format!("{}/system/worker-pause", self.base_url);
        let req = PauseRequest { mode: mode.map(String::from), reason: reason.to_string() };
        let response = self.http.post(&url).headers(self.headers()).json(&req).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// POST /system/worker-pause/resume
    pub async fn resume_workers(&self, reason: &str, force_resume: bool) -> Result<WorkerPauseResponse, ClientError> {
        let url = format!("{}/system/worker-pause/resume", self.base_url);
        let req = ResumeRequest { reason: reason.to_string(), force_resume };
        let response = self.http.post(&url).headers(self.headers()).json(&req).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// GET /proposals?status=&repository=&category=&include_snoozed=&limit=
    pub async fn list_proposals(
        &self,
        status: Option<&str>,
        repository: Option<&str>,
        include_snoozed: bool,
    ) -> Result<Vec<Proposal>, ClientError> {
        let mut url = format!("{}/proposals", self.base_url);
        let mut params = vec![];
        if let Some(s) = status {
            params.push(format!("status={}", urlencoding::encode(s)));
        }
        if let Some(r) = repository {
            params.push(format!("repository={}", urlencoding::encode(r)));
        }
        if include_snoozed {
            params.push("include_snoozed=true".to_string());
        }
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }

        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: ListProposalsResponse =
            response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.proposals)
    }

    /// GET /proposals/{id}
    pub async fn get_proposal(&self, id: &str) -> Result<Proposal, ClientError> {
        let url = format!("{}/proposals/{}", self.base_url, id);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: ProposalResponse = response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.proposal)
    }

    /// POST /proposals/{id}/promote
    pub async fn promote_proposal(&self, id: &str) -> Result<Job, ClientError> {
        let url = format!("{}/proposals/{}/promote", self.base_url, id);
        let response =
            self.http.post(&url).headers(self.headers()).json(&PromoteRequest::default()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: PromoteResponse = response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.job)
    }

    /// POST /proposals/{id}/dismiss
    pub async fn dismiss_proposal(&self, id: &str, note: Option<&str>) -> Result<(), ClientError> {
        let url = format!("{}/proposals/{}/dismiss", self.base_url, id);
        let req = NoteRequest { note: note.map(String::from) };
        let response = self.http.post(&url).headers(self.headers()).json(&req).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    /// POST /proposals/{id}/priority
    pub async fn set_proposal_priority(&self, id: &str, priority: ReviewPriority) -> Result<(), ClientError> {
        let url = format!("{}/proposals/{}/priority", self.base_url, id);
        let req = PriorityRequest { priority };
        let response = self.http.post(&url).headers(self.headers()).json(&req).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    /// POST /proposals/{id}/unsnooze
    pub async fn unsnooze_proposal(&self, id: &str) -> Result<(), ClientError> {
        let url = format!("{}/proposals/{}/unsnooze", self.base_url, id);
        let response = self.http.post(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    /// PUT /manifests/{name}
    pub async fn put_manifest(
        &self,
        name: &str,
        yaml: &str,
    ) -> Result<ManifestSummary, ClientError> {
        let url = format!("{}/manifests/{}", self.base_url, name);
        let response =
            self.http.put(&url).headers(self.headers()).json(&serde_json::json!({ "yaml": yaml })).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: ManifestSummaryResponse =
            response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.manifest)
    }

    /// GET /manifests/{name}
    pub async fn get_manifest(&self, name: &str) -> Result<ManifestView, ClientError> {
        let url = format!("{}/manifests/{}", self.base_url, name);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: ManifestViewResponse =
            response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.manifest)
    }

    /// POST /manifests/{name}/runs
    pub async fn run_manifest(&self, name: &str, req: &RunManifestRequest) -> Result<Job, ClientError> {
        let url = format!("{}/manifests/{}/runs", self.base_url, name);
        let response = self.http.post(&url).headers(self.headers()).json(req).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: JobResponse = response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.job)
    }
}

/// Parsed job event from the SSE tail stream.
#[derive(Debug, Deserialize)]
struct SseJobEvent {
    level: String,
    message: String,
}

fn parse_sse_job_event(event_str: &str) -> Option<SseJobEvent> {
    let mut data = None;
    for line in event_str.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data = Some(value.trim());
        }
    }
    data.and_then(|json_str| serde_json::from_str(json_str).ok())
}
