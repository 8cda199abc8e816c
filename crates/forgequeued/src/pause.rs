//! Worker-pause/drain gate: a small versioned state machine with an
//! audit trail.

pub use forgequeue_core::types::PauseMode;
use crate::storage::{Storage, StorageError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PauseError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("resume requires forceResume: queue is not drained")]
    NotDrained,
}

pub type Result<T> = std::result::Result<T, PauseError>;

#[derive(Debug, Clone)]
pub struct PauseState {
    pub workers_paused: bool,
    pub mode: PauseMode,
    pub reason: Option<String>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PauseAuditEntry {
    pub action: String,
    pub mode: Option<PauseMode>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct PauseGate {
    storage: Arc<Storage>,
    default_mode: PauseMode,
}

impl PauseGate {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage, default_mode: PauseMode::Drain }
    }

    pub fn with_default_mode(storage: Arc<Storage>, default_mode: PauseMode) -> Self {
        Self { storage, default_mode }
    }

    pub fn default_mode(&self) -> PauseMode {
        self.default_mode
    }

    pub async fn is_paused(&self) -> bool {
        self.state().await.map(|s| s.workers_paused).unwrap_or(false)
    }

    pub async fn state(&self) -> Result<PauseState> {
        let row: (i64, String, Option<String>, i64, i64) = sqlx::query_as(
            "SELECT workers_paused, mode, reason, version, updated_at FROM worker_pause_state WHERE id = 1",
        )
        .fetch_one(self.storage.pool())
        .await
        .map_err(StorageError::Database)?;

        Ok(PauseState {
            workers_paused: row.0 != 0,
            mode: parse_mode(&row.1),
            reason: row.2,
            version: row.3,
            updated_at: DateTime::from_timestamp_millis(row.4).unwrap_or_default(),
        })
    }

    pub async fn pause(&self, mode: PauseMode, reason: &str) -> Result<PauseState> {
        let now_ms = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE worker_pause_state SET workers_paused = 1, mode = ?1, reason = ?2, \
             version = version + 1, updated_at = ?3 WHERE id = 1",
        )
        .bind(mode.as_str())
        .bind(reason)
        .bind(now_ms)
        .execute(self.storage.pool())
        .await
        .map_err(StorageError::Database)?;

        self.append_audit("pause", Some(mode), Some(reason)).await?;
        self.state().await
    }

    /// Resume requires `force_resume` unless the queue is already
    /// drained (spec: "Resume when not drained requires an explicit
    /// forceResume flag").
    pub async fn resume(&self, reason: &str, force_resume: bool, is_drained: bool) -> Result<PauseState> {
        if !is_drained && !force_resume {
            return Err(PauseError::NotDrained);
        }

        let now_ms = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE worker_pause_state SET workers_paused = 0, reason = ?1, version = version + 1, \
             updated_at = ?2 WHERE id = 1",
        )
        .bind(reason)
        .bind(now_ms)
        .execute(self.storage.pool())
        .await
        .map_err(StorageError::Database)?;

        self.append_audit("resume", None, Some(reason)).await?;
        self.state().await
    }

    pub async fn recent_audit(&self, limit: i64) -> Result<Vec<PauseAuditEntry>> {
        let rows: Vec<(String, Option<String>, Option<String>, i64)> = sqlx::query_as(
            "SELECT action, mode, reason, created_at FROM worker_pause_audit \
             ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.storage.pool())
        .await
        .map_err(StorageError::Database)?;

        Ok(rows
            .into_iter()
            .map(|(action, mode, reason, created_at)| PauseAuditEntry {
                action,
                mode: mode.as_deref().map(parse_mode),
                reason,
                created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
            })
            .collect())
    }

    async fn append_audit(&self, action: &str, mode: Option<PauseMode>, reason: Option<&str>) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO worker_pause_audit (action, mode, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(action)
        .bind(mode.map(|m| m.as_str()))
        .bind(reason)
        .bind(now_ms)
        .execute(self.storage.pool())
        .await
        .map_err(StorageError::Database)?;
        Ok(())
    }
}

fn parse_mode(s: &str) -> PauseMode {
    match s {
        "quiesce" => PauseMode::Quiesce,
        _ => PauseMode::Drain,
    }
}
