//! Skill registry: resolution of a task's skill selection against the
//! stored registry and the configured policy gate.
//!
//! Complements `catalog::discover_skills` (which resolves skills straight
//! off disk) with the indirection the content-addressed cache needs: a
//! registry entry names a `contentHash` the cache then fetches and
//! verifies against.

use chrono::{DateTime, Utc};
use forgequeue_core::types::{SkillsPolicyMode, TaskSkillRef};
use std::sync::Arc;
use thiserror::Error;

use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("skill not registered: {0}")]
    NotFound(String),
    #[error("skill '{0}' is not on the allowlist")]
    PolicyRejected(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Where a registered skill's artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    Git { url: String, rev: Option<String> },
    ObjectBundle { url: String },
    LocalMirror { path: String },
}

impl ArtifactSource {
    /// Parse the `source_uri` column. Conventions: `git:<url>[#rev]`,
    /// `bundle:<url>`, `local_mirror:<path>`; anything else is treated as a
    /// local mirror path for backward compatibility with plain paths.
    pub fn parse(source_uri: &str) -> Self {
        if let Some(rest) = source_uri.strip_prefix("git:") {
            return match rest.split_once('#') {
                Some((url, rev)) => Self::Git { url: url.to_string(), rev: Some(rev.to_string()) },
                None => Self::Git { url: rest.to_string(), rev: None },
            };
        }
        if let Some(rest) = source_uri.strip_prefix("bundle:") {
            return Self::ObjectBundle { url: rest.to_string() };
        }
        if let Some(rest) = source_uri.strip_prefix("local_mirror:") {
            return Self::LocalMirror { path: rest.to_string() };
        }
        Self::LocalMirror { path: source_uri.to_string() }
    }
}

#[derive(Debug, Clone)]
pub struct RegisteredSkill {
    pub skill_id: String,
    pub version: String,
    pub content_hash: String,
    pub signature: Option<String>,
    pub source: ArtifactSource,
    pub registered_at: DateTime<Utc>,
}

/// Register (or re-register) a skill version. Idempotent on
/// `(skill_id, version)`.
pub async fn register(
    storage: &Storage,
    skill_id: &str,
    version: &str,
    content_hash: &str,
    source_uri: &str,
    signature: Option<&str>,
) -> Result<()> {
    let now_ms = Utc::now().timestamp_millis();
    sqlx::query(
        "INSERT INTO skill_registry (skill_id, version, content_hash, signature, source_uri, registered_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT (skill_id, version) DO UPDATE SET \
         content_hash = excluded.content_hash, signature = excluded.signature, \
         source_uri = excluded.source_uri, registered_at = excluded.registered_at",
    )
    .bind(skill_id)
    .bind(version)
    .bind(content_hash)
    .bind(signature)
    .bind(now_ms)
    .execute(storage.pool())
    .await
    .map_err(StorageError::Database)?;
    Ok(())
}

/// Look up the most recently registered version of `skill_id`.
pub async fn latest(storage: &Storage, skill_id: &str) -> Result<RegisteredSkill> {
    let row: Option<(String, String, String, Option<String>, String, i64)> = sqlx::query_as(
        "SELECT skill_id, version, content_hash, signature, source_uri, registered_at \
         FROM skill_registry WHERE skill_id = ?1 ORDER BY registered_at DESC LIMIT 1",
    )
    .bind(skill_id)
    .fetch_optional(storage.pool())
    .await
    .map_err(StorageError::Database)?;

    let (skill_id, version, content_hash, signature, source_uri, registered_at) =
        row.ok_or_else(|| RegistryError::NotFound(skill_id.to_string()))?;

    Ok(RegisteredSkill {
        skill_id,
        version,
        content_hash,
        signature,
        source: ArtifactSource::parse(&source_uri),
        registered_at: DateTime::from_timestamp_millis(registered_at).unwrap_or_default(),
    })
}

/// Resolve a task's skill selection to a registry entry, applying the
/// `permissive`/`allowlist` policy gate. Precedence: job-level selection is
/// checked against the configured allowlist only when `policy_mode ==
/// Allowlist`; `Permissive` accepts any resolvable skill.
pub async fn resolve(
    storage: &Arc<Storage>,
    selection: &TaskSkillRef,
    policy_mode: SkillsPolicyMode,
    allowlist: &[String],
) -> Result<RegisteredSkill> {
    if policy_mode == SkillsPolicyMode::Allowlist && !allowlist.iter().any(|a| a == &selection.id) {
        return Err(RegistryError::PolicyRejected(selection.id.clone()));
    }
    latest(storage, &selection.id).await
}
