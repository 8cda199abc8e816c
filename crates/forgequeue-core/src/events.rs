//! Event payload types for the job audit log.

use crate::types::{EventKind, Id, LogStream, ManifestStage, Stage};
use serde::{Deserialize, Serialize};

/// Payload for a `submitted` event, emitted by `SubmitJob`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedPayload {
    pub job_id: Id,
    pub job_type: String,
    pub priority: i64,
}

/// Payload for a `claimed` event, emitted by `ClaimJob`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedPayload {
    pub job_id: Id,
    pub worker_id: String,
    pub attempt_count: u32,
    pub lease_expires_at: chrono::DateTime<chrono::Utc>,
}

/// Payload for a task worker stage-boundary event
/// (`moonmind.task.{preflight,prepare,execute,publish,finalize}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEventPayload {
    pub stage: Stage,
    pub kind: EventKind,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload for a `kind=log` event carrying interleaved child-process
/// output during the `execute` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEventPayload {
    pub stage: Stage,
    pub kind: EventKind,
    pub stream: LogStream,
    pub line: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

/// Payload for a `kind=progress` event (coalesced, rate-limited).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEventPayload {
    pub stage: Stage,
    pub kind: EventKind,
    pub message: String,
}

/// Payload for a manifest ingest stage-boundary event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestStageCounters {
    #[serde(default)]
    pub documents_fetched: u64,
    #[serde(default)]
    pub documents_changed: u64,
    #[serde(default)]
    pub documents_deleted: u64,
    #[serde(default)]
    pub chunks_generated: u64,
    #[serde(default)]
    pub chunks_embedded: u64,
    #[serde(default)]
    pub points_upserted: u64,
    #[serde(default)]
    pub points_deleted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestStageEventPayload {
    pub stage: ManifestStage,
    pub status: String,
    #[serde(flatten)]
    pub counters: ManifestStageCounters,
    pub duration_ms: u64,
}

/// Union of every structured payload an `Event.payload` column may hold.
/// `#[serde(untagged)]` lets each variant serialize with only its own
/// fields (no wrapper object), while still letting code pattern-match
/// typed shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Submitted(SubmittedPayload),
    Claimed(ClaimedPayload),
    Stage(StageEventPayload),
    Log(LogEventPayload),
    Progress(ProgressEventPayload),
    Manifest(ManifestStageEventPayload),
}

impl EventPayload {
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::Submitted(_) | Self::Claimed(_) => None,
            Self::Stage(p) => Some(p.kind),
            Self::Log(p) => Some(p.kind),
            Self::Progress(p) => Some(p.kind),
            Self::Manifest(_) => Some(EventKind::Stage),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
