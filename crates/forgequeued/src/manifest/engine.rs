//! Manifest ingest sub-engine: the stage driver behind a `manifest` job
//! (validate -> plan -> fetch -> transform -> embed -> upsert -> finalize).
//!
//! No external embedding provider or vector database client is configured
//! in this build (see `embed` and the `vector_collections`/`manifest_points`
//! tables in `0006_manifest_points.sql`); the `local` provider and the
//! SQLite-backed point store stand in for them, matching the
//! fail-closed-when-unconfigured pattern `skills::cache::fetch_artifact`
//! uses for `ArtifactSource::ObjectBundle`.

use chrono::{DateTime, Utc};
use forgequeue_core::errors::{ErrorKind, TypedError};
use forgequeue_core::events::{EventPayload, ManifestStageCounters, ManifestStageEventPayload};
use forgequeue_core::types::{ManifestAction, ManifestStage};
use forgequeue_core::{Id, Job, JobOutcome, JobPayload, ManifestPayload};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use super::adapters::{chunk_content, hash_content, list_filesystem_docs, SourceDoc};
use super::point_id::compute_point_id;
use crate::queue::QueueService;
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("io error: {0}")]
    Io(std::io::Error),
    #[error("data source '{0}' not found")]
    SourceNotFound(String),
    #[error("embedding provider '{0}' has no configured backend in this build")]
    UnconfiguredProvider(String),
    #[error("manifest not registered: {0}")]
    ManifestNotFound(String),
    #[error(
        "collection '{collection}' is registered for {dimensions_expected} dims / {distance_expected}; \
         manifest declares {dimensions_actual} dims / {distance_actual}"
    )]
    SchemaMismatch {
        collection: String,
        dimensions_expected: u32,
        distance_expected: String,
        dimensions_actual: u32,
        distance_actual: String,
    },
}

fn to_typed(e: ManifestError) -> TypedError {
    let kind = match &e {
        ManifestError::Storage(_) | ManifestError::Io(_) => ErrorKind::Transient,
        ManifestError::Yaml(_) | ManifestError::SourceNotFound(_) | ManifestError::ManifestNotFound(_) | ManifestError::SchemaMismatch { .. } => {
            ErrorKind::Validation
        }
        ManifestError::UnconfiguredProvider(_) => ErrorKind::Capability,
    };
    TypedError::new(kind, e.to_string())
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestDocument {
    data_sources: Vec<DataSourceSpec>,
    embedding: EmbeddingSpec,
    target: TargetSpec,
}

#[derive(Debug, Clone, Deserialize)]
struct DataSourceSpec {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingSpec {
    provider: String,
    model: String,
    dimensions: u32,
    distance: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TargetSpec {
    collection: String,
}

#[derive(Debug, Clone, Default)]
struct Checkpoint {
    doc_hashes: BTreeMap<String, String>,
}

/// Drive a claimed `manifest` job through its full ingest lifecycle.
/// Unlike the task worker runtime's stage driver (owned by `worker.rs`),
/// this function also settles the job's terminal outcome on success; on
/// error it returns the `TypedError` for the caller's retry/escalation
/// policy to settle, matching `worker::run_task`'s contract.
pub async fn run_manifest_job(storage: &Arc<Storage>, queue: &Arc<QueueService>, job: &Job) -> Result<(), TypedError> {
    let payload = match &job.payload {
        JobPayload::Manifest(m) => m,
        JobPayload::Task(_) => {
            return Err(TypedError::new(ErrorKind::Validation, "run_manifest_job called with a non-manifest job"));
        }
    };

    let started_validate = Utc::now();
    let yaml = resolve_yaml(storage, payload).await.map_err(to_typed)?;
    let doc: ManifestDocument = serde_yaml::from_str(&yaml).map_err(|e| TypedError::new(ErrorKind::Validation, format!("manifest yaml invalid: {e}")))?;
    persist_manifest_definition(storage, &payload.name, &yaml).await.map_err(to_typed)?;
    validate_or_register_collection(storage, &doc.target.collection, doc.embedding.dimensions, &doc.embedding.distance)
        .await
        .map_err(to_typed)?;
    emit_manifest_stage(queue, &job.id, ManifestStage::Validate, "succeeded", ManifestStageCounters::default(), elapsed_ms(started_validate)).await;

    let effective_dry_run = payload.options.dry_run || payload.action == ManifestAction::Plan;
    let mut totals = ManifestStageCounters::default();

    for source in &doc.data_sources {
        if let Ok(current) = queue.get_job(&job.id).await {
            if current.cancel_requested_at.is_some() {
                return Err(TypedError::new(ErrorKind::Cancelled, "cancel observed during manifest ingest"));
            }
        }

        if source.kind != "filesystem" {
            return Err(TypedError::new(
                ErrorKind::Capability,
                format!("unsupported data source kind '{}' for source '{}'", source.kind, source.id),
            ));
        }

        let started_plan = Utc::now();
        let current_docs = list_filesystem_docs(Path::new(&source.path)).map_err(to_typed)?;
        let mut checkpoint = if payload.options.force_full {
            Checkpoint::default()
        } else {
            read_checkpoint(storage, &payload.name, &source.id).await.map_err(to_typed)?
        };

        let current_ids: BTreeSet<String> = current_docs.iter().map(|d| d.doc_id.clone()).collect();
        let deleted_ids: Vec<String> =
            checkpoint.doc_hashes.keys().filter(|id| !current_ids.contains(*id)).cloned().collect();

        let mut to_process: Vec<&SourceDoc> = Vec::new();
        for doc_entry in &current_docs {
            let unchanged = checkpoint.doc_hashes.get(&doc_entry.doc_id) == Some(&doc_entry.content_hash);
            if unchanged && !payload.options.force_full {
                continue;
            }
            to_process.push(doc_entry);
        }
        if let Some(max_docs) = payload.options.max_docs {
            let max = max_docs as usize;
            if to_process.len() > max {
                warn!(
                    manifest = %payload.name, source = %source.id,
                    dropped = to_process.len() - max,
                    "manifest run capped by max_docs; remaining changed documents deferred to next run"
                );
                to_process.truncate(max);
            }
        }

        totals.documents_fetched += current_docs.len() as u64;
        totals.documents_changed += to_process.len() as u64;
        totals.documents_deleted += deleted_ids.len() as u64;
        emit_manifest_stage(queue, &job.id, ManifestStage::Plan, "succeeded", totals.clone(), elapsed_ms(started_plan)).await;

        if effective_dry_run {
            continue;
        }

        let started_fetch = Utc::now();
        emit_manifest_stage(queue, &job.id, ManifestStage::Fetch, "succeeded", totals.clone(), elapsed_ms(started_fetch)).await;

        for doc_id in &deleted_ids {
            let removed = delete_points_for_doc(storage, &payload.name, &source.id, doc_id).await.map_err(to_typed)?;
            totals.points_deleted += removed;
            checkpoint.doc_hashes.remove(doc_id);
        }

        let started_transform = Utc::now();
        let mut chunk_plan: Vec<(&SourceDoc, Vec<String>)> = Vec::new();
        for doc_entry in &to_process {
            let chunks = chunk_content(&doc_entry.content, 2000);
            totals.chunks_generated += chunks.len() as u64;
            chunk_plan.push((doc_entry, chunks));
        }
        emit_manifest_stage(queue, &job.id, ManifestStage::Transform, "succeeded", totals.clone(), elapsed_ms(started_transform)).await;

        let started_embed = Utc::now();
        for (doc_entry, chunks) in &chunk_plan {
            let removed =
                delete_points_for_doc(storage, &payload.name, &source.id, &doc_entry.doc_id).await.map_err(to_typed)?;
            totals.points_deleted += removed;
            for (chunk_index, chunk) in chunks.iter().enumerate() {
                let vector = embed(&doc.embedding.provider, chunk, doc.embedding.dimensions).map_err(to_typed)?;
                totals.chunks_embedded += 1;
                let point_id = compute_point_id(
                    &payload.name,
                    &source.id,
                    &doc_entry.doc_id,
                    chunk_index as u64,
                    &doc.embedding.provider,
                    &doc.embedding.model,
                );
                upsert_point(
                    storage,
                    &doc.target.collection,
                    &payload.name,
                    &source.id,
                    &doc_entry.doc_id,
                    chunk_index as u64,
                    &point_id,
                    &vector,
                    chunk,
                )
                .await
                .map_err(to_typed)?;
                totals.points_upserted += 1;
            }
            checkpoint.doc_hashes.insert(doc_entry.doc_id.clone(), doc_entry.content_hash.clone());
        }
        emit_manifest_stage(queue, &job.id, ManifestStage::Embed, "succeeded", totals.clone(), elapsed_ms(started_embed)).await;
        emit_manifest_stage(queue, &job.id, ManifestStage::Upsert, "succeeded", totals.clone(), elapsed_ms(started_embed)).await;

        let finished_at = Utc::now();
        write_checkpoint(storage, &payload.name, &source.id, &checkpoint, started_plan.timestamp_millis(), finished_at.timestamp_millis())
            .await
            .map_err(to_typed)?;
    }

    let started_finalize = Utc::now();
    emit_manifest_stage(queue, &job.id, ManifestStage::Finalize, "succeeded", totals, elapsed_ms(started_finalize)).await;

    queue
        .report_terminal(&job.id, job.worker_id.as_deref().unwrap_or(""), JobOutcome::Success, None)
        .await
        .map_err(|e| TypedError::new(ErrorKind::Transient, e.to_string()))?;
    Ok(())
}

async fn emit_manifest_stage(
    queue: &QueueService,
    job_id: &Id,
    stage: ManifestStage,
    status: &str,
    counters: ManifestStageCounters,
    duration_ms: u64,
) {
    let payload = EventPayload::Manifest(ManifestStageEventPayload { stage, status: status.to_string(), counters, duration_ms });
    let message = format!("manifest.{}", stage.as_str());
    let _ = queue.append_event(job_id, &payload, &message).await;
}

fn elapsed_ms(started: chrono::DateTime<Utc>) -> u64 {
    (Utc::now() - started).num_milliseconds().max(0) as u64
}

async fn resolve_yaml(storage: &Storage, payload: &ManifestPayload) -> Result<String, ManifestError> {
    use forgequeue_core::types::ManifestSource;
    match &payload.source {
        ManifestSource::Inline { content } => Ok(content.clone()),
        ManifestSource::Path { path } => std::fs::read_to_string(path).map_err(ManifestError::Io),
        ManifestSource::Registry { name } => {
            let row: Option<(String,)> = sqlx::query_as("SELECT yaml_content FROM manifests WHERE name = ?1")
                .bind(name)
                .fetch_optional(storage.pool())
                .await
                .map_err(StorageError::Database)?;
            row.map(|(yaml,)| yaml).ok_or_else(|| ManifestError::ManifestNotFound(name.clone()))
        }
    }
}

async fn persist_manifest_definition(storage: &Storage, name: &str, yaml_content: &str) -> Result<(), ManifestError> {
    let now = Utc::now().timestamp_millis();
    let content_hash = hash_content(yaml_content);
    sqlx::query(
        "INSERT INTO manifests (name, yaml_content, content_hash, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4) \
         ON CONFLICT(name) DO UPDATE SET yaml_content = excluded.yaml_content, content_hash = excluded.content_hash, \
         updated_at = excluded.updated_at",
    )
    .bind(name)
    .bind(yaml_content)
    .bind(&content_hash)
    .bind(now)
    .execute(storage.pool())
    .await
    .map_err(StorageError::Database)?;
    Ok(())
}

/// Summary returned by `PUT /manifests/{name}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ManifestSummary {
    pub name: String,
    pub content_hash: String,
    pub updated_at: chrono::DateTime<Utc>,
}

/// Per-data-source checkpoint summary surfaced by `GET /manifests/{name}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckpointSummary {
    pub data_source_id: String,
    pub doc_count: u64,
    pub last_run_started_at: Option<chrono::DateTime<Utc>>,
    pub last_run_finished_at: Option<chrono::DateTime<Utc>>,
}

/// Full view returned by `GET /manifests/{name}`: the stored YAML plus a
/// checkpoint summary per data source that has run at least once.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ManifestView {
    pub name: String,
    pub yaml_content: String,
    pub content_hash: String,
    pub checkpoints: Vec<CheckpointSummary>,
}

/// `PUT /manifests/{name}`: upsert the YAML document and compute its
/// content hash. Validated lazily at run time (a manifest can be stored
/// before its data sources exist).
pub async fn upsert_manifest(storage: &Storage, name: &str, yaml_content: &str) -> Result<ManifestSummary, ManifestError> {
    // Reject structurally invalid YAML up front so a bad PUT fails
    // synchronously rather than surfacing at the first run attempt.
    let _: ManifestDocument = serde_yaml::from_str(yaml_content)?;
    persist_manifest_definition(storage, name, yaml_content).await?;
    let content_hash = hash_content(yaml_content);
    Ok(ManifestSummary { name: name.to_string(), content_hash, updated_at: Utc::now() })
}

/// `GET /manifests/{name}`: the stored YAML plus checkpoint summaries.
pub async fn get_manifest(storage: &Storage, name: &str) -> Result<ManifestView, ManifestError> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT yaml_content, content_hash FROM manifests WHERE name = ?1")
            .bind(name)
            .fetch_optional(storage.pool())
            .await
            .map_err(StorageError::Database)?;
    let (yaml_content, content_hash) = row.ok_or_else(|| ManifestError::ManifestNotFound(name.to_string()))?;

    let rows: Vec<(String, String, Option<i64>, Option<i64>)> = sqlx::query_as(
        "SELECT data_source_id, doc_hashes_json, last_run_started_at, last_run_finished_at \
         FROM manifest_checkpoints WHERE manifest_name = ?1 ORDER BY data_source_id",
    )
    .bind(name)
    .fetch_all(storage.pool())
    .await
    .map_err(StorageError::Database)?;

    let checkpoints = rows
        .into_iter()
        .map(|(data_source_id, doc_hashes_json, started, finished)| {
            let doc_count = serde_json::from_str::<BTreeMap<String, String>>(&doc_hashes_json)
                .map(|m| m.len() as u64)
                .unwrap_or(0);
            CheckpointSummary {
                data_source_id,
                doc_count,
                last_run_started_at: started.and_then(DateTime::from_timestamp_millis),
                last_run_finished_at: finished.and_then(DateTime::from_timestamp_millis),
            }
        })
        .collect();

    Ok(ManifestView { name: name.to_string(), yaml_content, content_hash, checkpoints })
}

async fn read_checkpoint(storage: &Storage, manifest_name: &str, data_source_id: &str) -> Result<Checkpoint, ManifestError> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT doc_hashes_json FROM manifest_checkpoints WHERE manifest_name = ?1 AND data_source_id = ?2",
    )
    .bind(manifest_name)
    .bind(data_source_id)
    .fetch_optional(storage.pool())
    .await
    .map_err(StorageError::Database)?;

    Ok(match row {
        Some((json,)) => Checkpoint { doc_hashes: serde_json::from_str(&json).unwrap_or_default() },
        None => Checkpoint::default(),
    })
}

async fn write_checkpoint(
    storage: &Storage,
    manifest_name: &str,
    data_source_id: &str,
    checkpoint: &Checkpoint,
    started_at: i64,
    finished_at: i64,
) -> Result<(), ManifestError> {
    let doc_hashes_json = serde_json::to_string(&checkpoint.doc_hashes).unwrap_or_else(|_| "{}".to_string());
    sqlx::query(
        "INSERT INTO manifest_checkpoints (manifest_name, data_source_id, doc_hashes_json, last_run_started_at, last_run_finished_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
         ON CONFLICT(manifest_name, data_source_id) DO UPDATE SET doc_hashes_json = excluded.doc_hashes_json, \
         last_run_started_at = excluded.last_run_started_at, last_run_finished_at = excluded.last_run_finished_at, \
         updated_at = excluded.updated_at",
    )
    .bind(manifest_name)
    .bind(data_source_id)
    .bind(&doc_hashes_json)
    .bind(started_at)
    .bind(finished_at)
    .execute(storage.pool())
    .await
    .map_err(StorageError::Database)?;
    Ok(())
}

/// Validate the manifest's declared embedding shape against whatever this
/// collection was first registered with; register it if this is the first
/// manifest run to touch it. Dimensions and distance metric must match on
/// every subsequent run or the write is rejected before anything changes.
async fn validate_or_register_collection(storage: &Storage, collection: &str, dimensions: u32, distance: &str) -> Result<(), ManifestError> {
    let row: Option<(i64, String)> =
        sqlx::query_as("SELECT dimensions, distance FROM vector_collections WHERE collection = ?1")
            .bind(collection)
            .fetch_optional(storage.pool())
            .await
            .map_err(StorageError::Database)?;

    match row {
        Some((existing_dims, existing_distance)) => {
            if existing_dims as u32 != dimensions || existing_distance != distance {
                return Err(ManifestError::SchemaMismatch {
                    collection: collection.to_string(),
                    dimensions_expected: existing_dims as u32,
                    distance_expected: existing_distance,
                    dimensions_actual: dimensions,
                    distance_actual: distance.to_string(),
                });
            }
            Ok(())
        }
        None => {
            let now = Utc::now().timestamp_millis();
            sqlx::query("INSERT INTO vector_collections (collection, dimensions, distance, created_at) VALUES (?1, ?2, ?3, ?4)")
                .bind(collection)
                .bind(dimensions as i64)
                .bind(distance)
                .bind(now)
                .execute(storage.pool())
                .await
                .map_err(StorageError::Database)?;
            Ok(())
        }
    }
}

async fn delete_points_for_doc(storage: &Storage, manifest_name: &str, data_source_id: &str, doc_id: &str) -> Result<u64, ManifestError> {
    let result = sqlx::query("DELETE FROM manifest_points WHERE manifest_name = ?1 AND data_source_id = ?2 AND source_doc_id = ?3")
        .bind(manifest_name)
        .bind(data_source_id)
        .bind(doc_id)
        .execute(storage.pool())
        .await
        .map_err(StorageError::Database)?;
    Ok(result.rows_affected())
}

#[allow(clippy::too_many_arguments)]
async fn upsert_point(
    storage: &Storage,
    collection: &str,
    manifest_name: &str,
    data_source_id: &str,
    doc_id: &str,
    chunk_index: u64,
    point_id: &str,
    vector: &[f32],
    content: &str,
) -> Result<(), ManifestError> {
    let vector_json = serde_json::to_string(vector).unwrap_or_default();
    let now = Utc::now().timestamp_millis();
    sqlx::query(
        "INSERT INTO manifest_points (point_id, collection, manifest_name, data_source_id, source_doc_id, chunk_index, vector_json, content, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         ON CONFLICT(point_id) DO UPDATE SET vector_json = excluded.vector_json, content = excluded.content, created_at = excluded.created_at",
    )
    .bind(point_id)
    .bind(collection)
    .bind(manifest_name)
    .bind(data_source_id)
    .bind(doc_id)
    .bind(chunk_index as i64)
    .bind(&vector_json)
    .bind(content)
    .bind(now)
    .execute(storage.pool())
    .await
    .map_err(StorageError::Database)?;
    Ok(())
}

/// Deterministic placeholder embedding: no external embedding provider is
/// configured in this build, so only `provider: local` is implemented.
fn embed(provider: &str, content: &str, dimensions: u32) -> Result<Vec<f32>, ManifestError> {
    match provider {
        "local" => Ok(embed_local(content, dimensions)),
        other => Err(ManifestError::UnconfiguredProvider(other.to_string())),
    }
}

fn embed_local(content: &str, dimensions: u32) -> Vec<f32> {
    let hash = Sha256::digest(content.as_bytes());
    (0..dimensions as usize)
        .map(|i| {
            let byte = hash[i % hash.len()];
            (byte as f32 / 255.0) * 2.0 - 1.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pause::PauseGate;
    use forgequeue_core::types::{ManifestAction, ManifestOptions, ManifestSource};
    use forgequeue_core::{JobPayload, JobStatus};
    use tempfile::TempDir;

    fn sample_yaml(source_dir: &Path) -> String {
        format!(
            "data_sources:\n  - id: docs\n    type: filesystem\n    path: {}\nembedding:\n  provider: local\n  model: hash-v1\n  dimensions: 8\n  distance: cosine\ntarget:\n  collection: docs-collection\n",
            source_dir.display()
        )
    }

    async fn make_queue(db_dir: &TempDir) -> Arc<QueueService> {
        let storage = Storage::new(&db_dir.path().join("test.db")).await.unwrap();
        storage.migrate_embedded().await.unwrap();
        let storage = Arc::new(storage);
        let pause_gate = Arc::new(PauseGate::new(Arc::clone(&storage)));
        Arc::new(QueueService::new(storage, pause_gate, 300))
    }

    fn manifest_job(yaml: &str) -> Job {
        Job {
            id: Id::new(),
            payload: JobPayload::Manifest(ManifestPayload {
                name: "docs-manifest".to_string(),
                source: ManifestSource::Inline { content: yaml.to_string() },
                action: ManifestAction::Run,
                options: ManifestOptions::default(),
            }),
            required_capabilities: Default::default(),
            target_runtime: None,
            affinity_key: None,
            priority: 0,
            max_attempts: 1,
            attempt_count: 1,
            status: JobStatus::Running,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: None,
            lease_expires_at: None,
            cancel_requested_at: None,
            cancel_reason: None,
            queue_name: None,
            last_error: None,
            worker_id: Some("worker-1".to_string()),
        }
    }

    #[tokio::test]
    async fn ingests_filesystem_source_and_upserts_points() {
        let db_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        std::fs::write(source_dir.path().join("a.md"), "hello world").unwrap();

        let queue = make_queue(&db_dir).await;
        let storage = Storage::new(&db_dir.path().join("docs.db")).await;
        // Reuse the same storage the queue was built on by going through queue's storage handle.
        let _ = storage; // separate db not used; storage accessed through run_manifest_job's own Arc<Storage> below.

        let yaml = sample_yaml(source_dir.path());
        let job = manifest_job(&yaml);
        queue.submit_job(&job).await.unwrap();

        let storage_for_run = Arc::new(Storage::new(&db_dir.path().join("test.db")).await.unwrap());
        let result = run_manifest_job(&storage_for_run, &queue, &job).await;
        assert!(result.is_ok(), "{result:?}");

        let points: Vec<(String,)> = sqlx::query_as("SELECT point_id FROM manifest_points")
            .fetch_all(storage_for_run.pool())
            .await
            .unwrap();
        assert!(!points.is_empty());
    }

    #[tokio::test]
    async fn schema_mismatch_is_rejected() {
        let db_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        std::fs::write(source_dir.path().join("a.md"), "hello").unwrap();

        let queue = make_queue(&db_dir).await;
        let storage_for_run = Arc::new(Storage::new(&db_dir.path().join("test.db")).await.unwrap());

        let yaml = sample_yaml(source_dir.path());
        let job = manifest_job(&yaml);
        queue.submit_job(&job).await.unwrap();
        run_manifest_job(&storage_for_run, &queue, &job).await.unwrap();

        let mismatched_yaml = yaml.replace("dimensions: 8", "dimensions: 16");
        let job2 = manifest_job(&mismatched_yaml);
        queue.submit_job(&job2).await.unwrap();
        let result = run_manifest_job(&storage_for_run, &queue, &job2).await;
        assert!(result.is_err());
    }
}
