//! Cross-cutting error taxonomy.
//!
//! Individual modules keep their own `thiserror`-derived error enums for
//! mechanical detail; each such enum additionally reports one of these
//! kinds so the worker's retry policy and the HTTP layer can dispatch on
//! taxonomy rather than downcasting concrete error types.

use serde::{Deserialize, Serialize};

/// Error kind taxonomy, not a type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input. Never retried.
    Validation,
    /// Missing/invalid credentials. Retried only after operator action.
    Auth,
    /// Lease/artifact/terminal idempotency conflict. Surfaced as success
    /// when the caller's request was itself idempotent.
    Conflict,
    /// I/O, network. Retried with backoff within a stage.
    Transient,
    /// External CLI non-zero exit. Retried unless declared terminal.
    Tool,
    /// Required tool/skill absent on this worker. Requeued so another
    /// worker may claim it.
    Capability,
    /// Skill not allowlisted, repository not allowed. Never retried on
    /// this worker.
    Policy,
    /// Skill hash/signature mismatch. Never retried.
    Integrity,
    /// Operator-initiated. Terminal cancel.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::Tool => "tool",
            Self::Capability => "capability",
            Self::Policy => "policy",
            Self::Integrity => "integrity",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether a job-level failure of this kind is terminal on first
    /// occurrence rather than retried up to `maxAttempts`.
    pub fn terminal_on_first_occurrence(&self) -> bool {
        matches!(self, Self::Validation | Self::Policy | Self::Integrity)
    }

    /// Whether a stage-level error of this kind is recovered locally
    /// (retried within the stage) rather than escalated to stage failure.
    pub fn recovered_at_stage_level(&self) -> bool {
        matches!(self, Self::Transient | Self::Tool)
    }
}

/// A structured, user-visible error carrying both a kind and a message,
/// the shape stored as `Job.lastError` and rendered at `{detail:{code,
/// message}}` on the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TypedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TypedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for TypedError {}
