//! Core domain types for the job queue and task worker runtime.
//!
//! Job, Event, Artifact, and the typed per-job-kind payloads that flow
//! between the queue store, the worker runtime, and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier for jobs, events, artifacts, proposals, and skill
/// workspaces. Uses `UUIDv7` for time-ordered lexicographic sorting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unordered set of capability tokens a worker must advertise or a job
/// requires. Stored sorted so JSON/DB serialization is deterministic.
pub type RequiredCapabilities = BTreeSet<String>;

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Terminal outcome reported by a worker for `ReportTerminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failure,
    Cancelled,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }

    /// The job status this outcome settles into.
    pub fn terminal_status(&self) -> JobStatus {
        match self {
            Self::Success => JobStatus::Succeeded,
            Self::Failure => JobStatus::Failed,
            Self::Cancelled => JobStatus::Cancelled,
        }
    }
}

/// Task worker runtime stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preflight,
    Prepare,
    Execute,
    Publish,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::Prepare => "prepare",
            Self::Execute => "execute",
            Self::Publish => "publish",
            Self::Finalize => "finalize",
        }
    }

    /// Dotted event-name prefix used in stage events, e.g.
    /// `moonmind.task.preflight` in worked examples.
    pub fn event_name(&self) -> String {
        format!("moonmind.task.{}", self.as_str())
    }
}

/// Manifest ingest sub-engine stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStage {
    Validate,
    Plan,
    Fetch,
    Transform,
    Embed,
    Upsert,
    Finalize,
}

impl ManifestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Plan => "plan",
            Self::Fetch => "fetch",
            Self::Transform => "transform",
            Self::Embed => "embed",
            Self::Upsert => "upsert",
            Self::Finalize => "finalize",
        }
    }
}

/// Publish mode for a completed task job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    #[default]
    None,
    Branch,
    Pr,
}

impl PublishMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Branch => "branch",
            Self::Pr => "pr",
        }
    }
}

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    #[default]
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Event payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Stage,
    Log,
    Progress,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stage => "stage",
            Self::Log => "log",
            Self::Progress => "progress",
        }
    }
}

/// Captured child-process output stream (for `kind=log` events).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Skill selection policy gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillsPolicyMode {
    /// Auto-accept any resolvable skill.
    #[default]
    Permissive,
    /// Reject any skill not in the configured allowlist.
    Allowlist,
}

impl SkillsPolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permissive => "permissive",
            Self::Allowlist => "allowlist",
        }
    }
}

/// Worker-pause gate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseMode {
    #[default]
    Drain,
    Quiesce,
}

impl PauseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drain => "drain",
            Self::Quiesce => "quiesce",
        }
    }
}

/// A single skill reference attached to a task or a task step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSkillRef {
    pub id: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub required_capabilities: RequiredCapabilities,
}

/// One ordered per-step refinement of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: String,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<TaskSkillRef>,
}

/// `task.runtime.*` — which agent CLI to invoke and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRuntime {
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
}

/// `task.git.*` — starting point and branch naming.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_branch: Option<String>,
    #[serde(default)]
    pub new_branch: String,
}

/// `task.publish.*` — how (and whether) to publish results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPublish {
    #[serde(default)]
    pub mode: PublishMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_base_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_body: Option<String>,
}

/// Full `task` job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskPayload {
    /// owner/repo, https URL, or ssh URL. MUST be token-free.
    pub repository: String,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<TaskSkillRef>,
    pub runtime: TaskRuntime,
    #[serde(default)]
    pub git: TaskGit,
    #[serde(default)]
    pub publish: TaskPublish,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<TaskStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_step_templates: Vec<String>,
}

/// Manifest action requested by a manifest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestAction {
    Plan,
    Run,
}

/// Where the manifest YAML document comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestSource {
    Inline { content: String },
    Registry { name: String },
    Path { path: String },
}

/// Per-run overrides for a manifest job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestOptions {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force_full: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_docs: Option<u64>,
}

/// Full `manifest` job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestPayload {
    pub name: String,
    pub source: ManifestSource,
    pub action: ManifestAction,
    #[serde(default)]
    pub options: ManifestOptions,
}

/// Tagged union of job kinds, dispatched on `type` with payload under
/// `payload` (Design Note "Dynamic payload dispatch").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobPayload {
    Task(TaskPayload),
    Manifest(ManifestPayload),
}

impl JobPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Task(_) => "task",
            Self::Manifest(_) => "manifest",
        }
    }

    pub fn repository(&self) -> Option<&str> {
        match self {
            Self::Task(t) => Some(&t.repository),
            Self::Manifest(_) => None,
        }
    }

    /// Derive `requiredCapabilities` from the payload when the submitter
    /// didn't supply an explicit set: for
    /// `task`, the runtime mode, `git`, and `gh` iff `publish.mode == pr`,
    /// plus the union of every step's skill-declared capabilities.
    pub fn derive_required_capabilities(&self) -> RequiredCapabilities {
        match self {
            Self::Task(t) => {
                let mut caps = RequiredCapabilities::new();
                caps.insert(t.runtime.mode.clone());
                caps.insert("git".to_string());
                if t.publish.mode == PublishMode::Pr {
                    caps.insert("gh".to_string());
                }
                if let Some(skill) = &t.skill {
                    caps.extend(skill.required_capabilities.iter().cloned());
                }
                for step in &t.steps {
                    if let Some(skill) = &step.skill {
                        caps.extend(skill.required_capabilities.iter().cloned());
                    }
                }
                caps
            }
            Self::Manifest(_) => RequiredCapabilities::new(),
        }
    }
}

/// Submission-time fields for `SubmitJob`: the payload
/// plus scheduling metadata the caller controls. Also doubles as a
/// proposal's `taskCreateRequest` ("a fully formed Job submission").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub payload: JobPayload,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_capabilities: Option<RequiredCapabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
}

fn default_max_attempts() -> u32 {
    1
}

impl JobSubmission {
    /// Build the durable `Job` record for this submission
    /// 4.1, `SubmitJob`): status=`queued`, freshly generated id, and
    /// required capabilities derived from the payload when not supplied.
    pub fn into_job(self, created_at: DateTime<Utc>) -> Job {
        let required_capabilities =
            self.required_capabilities.unwrap_or_else(|| self.payload.derive_required_capabilities());
        Job {
            id: Id::new(),
            target_runtime: None,
            required_capabilities,
            affinity_key: self.affinity_key,
            priority: self.priority,
            max_attempts: self.max_attempts.max(1),
            attempt_count: 0,
            status: JobStatus::Queued,
            created_at,
            started_at: None,
            finished_at: None,
            lease_expires_at: None,
            cancel_requested_at: None,
            cancel_reason: None,
            queue_name: self.queue_name,
            last_error: None,
            worker_id: None,
            payload: self.payload,
        }
    }
}

/// A typed unit of work in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Id,
    pub payload: JobPayload,
    #[serde(default)]
    pub required_capabilities: RequiredCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity_key: Option<String>,
    pub priority: i64,
    pub max_attempts: u32,
    pub attempt_count: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub cancel_requested_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub queue_name: Option<String>,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
}

/// Immutable append-only per-job event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub job_id: Id,
    pub created_at: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
    /// Structured payload: stage name, `kind`, and (for `kind=log`) `stream`.
    pub payload: serde_json::Value,
}

/// Write-once artifact blob index entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Id,
    pub job_id: Id,
    pub name: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub storage_ref: String,
}

/// Lifecycle status of a follow-up proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Open,
    Promoted,
    Dismissed,
    Accepted,
    Rejected,
    Snoozed,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Promoted => "promoted",
            Self::Dismissed => "dismissed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Snoozed => "snoozed",
        }
    }

    /// Non-terminal statuses are the ones the dedup unique index covers
    /// (spec: "at most one non-terminal proposal per dedupHash per
    /// repository").
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Promoted | Self::Dismissed | Self::Accepted | Self::Rejected)
    }
}

/// Review urgency a proposal is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl ReviewPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// Where a proposal came from: a worker run, a scheduled scan, etc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalOrigin {
    pub source: String,
    pub id: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A worker-generated follow-up suggestion awaiting promotion into a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Id,
    pub status: ProposalStatus,
    pub repository: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub review_priority: ReviewPriority,
    pub dedup_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snoozed_until: Option<DateTime<Utc>>,
    pub origin: ProposalOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_preview: Option<String>,
    pub task_create_request: JobSubmission,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_job_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
