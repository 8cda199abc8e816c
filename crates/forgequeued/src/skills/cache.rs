//! Content-addressed skill cache: fetch, hash-verify, store read-only.
//!
//! Verified entries land under
//! `<cache_root>/<content_hash>/` and are marked read-only, matching the
//! "read-only after verification" property; a mismatch between the fetched
//! bytes and the registry's `content_hash` fails closed.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::skills::registry::{ArtifactSource, RegisteredSkill};
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("fetch failed for {skill_id}: {message}")]
    Fetch { skill_id: String, message: String },
    #[error("integrity mismatch for {skill_id} at {phase}: expected {expected}, got {actual}")]
    IntegrityMismatch { skill_id: String, phase: &'static str, expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Pluggable signature check, left as a no-op by default since the system
/// specification does not fix a signature scheme.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, content_hash: &str, signature: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct NoopVerifier;

impl SignatureVerifier for NoopVerifier {
    fn verify(&self, _content_hash: &str, _signature: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct SkillCacheRecord {
    pub content_hash: String,
    pub skill_id: String,
    pub version: String,
    pub cached_path: PathBuf,
    pub size_bytes: i64,
    pub verified_at: DateTime<Utc>,
}

/// Fetch `entry`'s artifact (if not already cached), verify its hash, and
/// store it read-only under `cache_root`.
pub async fn fetch_and_verify(
    storage: &Storage,
    cache_root: &Path,
    entry: &RegisteredSkill,
    verifier: &dyn SignatureVerifier,
) -> Result<SkillCacheRecord> {
    if let Some(hit) = lookup(storage, &entry.content_hash).await? {
        if hit.cached_path.exists() {
            return Ok(hit);
        }
    }

    if let Some(signature) = &entry.signature {
        if !verifier.verify(&entry.content_hash, signature) {
            return Err(CacheError::IntegrityMismatch {
                skill_id: entry.skill_id.clone(),
                phase: "signature",
                expected: entry.content_hash.clone(),
                actual: "signature verification failed".to_string(),
            });
        }
    }

    let staging = std::env::temp_dir().join(format!("forgequeue-skill-fetch-{}", uuid::Uuid::new_v4()));
    fetch_artifact(&entry.source, &staging)?;

    let actual_hash = hash_directory(&staging)?;
    if actual_hash != entry.content_hash {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(CacheError::IntegrityMismatch {
            skill_id: entry.skill_id.clone(),
            phase: "content_hash",
            expected: entry.content_hash.clone(),
            actual: actual_hash,
        });
    }

    let dest = cache_root.join(&entry.content_hash);
    if dest.exists() {
        std::fs::remove_dir_all(&dest)?;
    }
    std::fs::create_dir_all(cache_root)?;
    copy_dir_recursive(&staging, &dest)?;
    let _ = std::fs::remove_dir_all(&staging);
    mark_read_only(&dest)?;

    let size_bytes = directory_size(&dest)? as i64;
    let verified_at = Utc::now();
    insert_record(storage, entry, &dest, size_bytes, verified_at).await?;

    Ok(SkillCacheRecord {
        content_hash: entry.content_hash.clone(),
        skill_id: entry.skill_id.clone(),
        version: entry.version.clone(),
        cached_path: dest,
        size_bytes,
        verified_at,
    })
}

async fn lookup(storage: &Storage, content_hash: &str) -> Result<Option<SkillCacheRecord>> {
    let row: Option<(String, String, String, String, i64, i64)> = sqlx::query_as(
        "SELECT content_hash, skill_id, version, cached_path, size_bytes, verified_at \
         FROM skill_cache WHERE content_hash = ?1",
    )
    .bind(content_hash)
    .fetch_optional(storage.pool())
    .await
    .map_err(StorageError::Database)?;

    Ok(row.map(|(content_hash, skill_id, version, cached_path, size_bytes, verified_at)| SkillCacheRecord {
        content_hash,
        skill_id,
        version,
        cached_path: PathBuf::from(cached_path),
        size_bytes,
        verified_at: DateTime::from_timestamp_millis(verified_at).unwrap_or_default(),
    }))
}

async fn insert_record(
    storage: &Storage,
    entry: &RegisteredSkill,
    cached_path: &Path,
    size_bytes: i64,
    verified_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO skill_cache \
         (content_hash, skill_id, version, cached_path, size_bytes, verified_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(&entry.content_hash)
    .bind(&entry.skill_id)
    .bind(&entry.version)
    .bind(cached_path.to_string_lossy().to_string())
    .bind(size_bytes)
    .bind(verified_at.timestamp_millis())
    .execute(storage.pool())
    .await
    .map_err(StorageError::Database)?;
    Ok(())
}

fn fetch_artifact(source: &ArtifactSource, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    match source {
        ArtifactSource::LocalMirror { path } => {
            copy_dir_recursive(Path::new(path), dest).map_err(|e| CacheError::Fetch {
                skill_id: path.clone(),
                message: e.to_string(),
            })
        }
        ArtifactSource::Git { url, rev } => {
            let mut args = vec!["clone", "--depth", "1"];
            if let Some(rev) = rev {
                args.push("--branch");
                args.push(rev);
            }
            let dest_str = dest.to_string_lossy().to_string();
            args.push(url);
            args.push(&dest_str);
            let output = Command::new("git").args(&args).output()?;
            if !output.status.success() {
                return Err(CacheError::Fetch {
                    skill_id: url.clone(),
                    message: String::from_utf8_lossy(&output.stderr).to_string(),
                });
            }
            let git_dir = dest.join(".git");
            if git_dir.exists() {
                std::fs::remove_dir_all(git_dir)?;
            }
            Ok(())
        }
        ArtifactSource::ObjectBundle { url } => Err(CacheError::Fetch {
            skill_id: url.clone(),
            message: "object bundle fetch requires a configured downloader; none is wired in this build"
                .to_string(),
        }),
    }
}

/// Canonical content hash over a directory tree: sorted relative paths,
/// each framed with its length, concatenated with file bytes.
fn hash_directory(root: &Path) -> Result<String> {
    let mut entries = Vec::new();
    collect_files(root, root, &mut entries)?;
    entries.sort();

    let mut hasher = Sha256::new();
    for rel in &entries {
        let bytes = std::fs::read(root.join(rel))?;
        hasher.update(rel.as_bytes());
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if path.is_file() {
            let rel = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
            out.push(rel);
        }
    }
    Ok(())
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let target = dest.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else if path.is_file() {
            std::fs::copy(&path, &target)?;
        }
    }
    Ok(())
}

fn directory_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            total += directory_size(&path)?;
        } else {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

#[cfg(unix)]
fn mark_read_only(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            mark_read_only(&path)?;
        } else {
            let mut perms = std::fs::metadata(&path)?.permissions();
            perms.set_mode(perms.mode() & !0o222);
            std::fs::set_permissions(&path, perms)?;
        }
    }
    let mut dir_perms = std::fs::metadata(dir)?.permissions();
    dir_perms.set_mode(dir_perms.mode() & !0o022);
    std::fs::set_permissions(dir, dir_perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn mark_read_only(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::registry;
    use tempfile::TempDir;

    async fn test_storage() -> (Storage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(&dir.path().join("test.db")).await.unwrap();
        storage.migrate_embedded().await.unwrap();
        (storage, dir)
    }

    fn make_skill_dir(root: &Path) {
        std::fs::create_dir_all(root).unwrap();
        std::fs::write(root.join("SKILL.md"), "---\nname: demo\ndescription: demo skill\n---\n").unwrap();
    }

    #[tokio::test]
    async fn fetches_verifies_and_caches_local_mirror() {
        let (storage, _db_dir) = test_storage().await;
        let source_dir = TempDir::new().unwrap();
        make_skill_dir(source_dir.path());
        let expected_hash = hash_directory(source_dir.path()).unwrap();

        registry::register(
            &storage,
            "demo",
            "1.0.0",
            &expected_hash,
            &format!("local_mirror:{}", source_dir.path().display()),
            None,
        )
        .await
        .unwrap();
        let entry = registry::latest(&storage, "demo").await.unwrap();

        let cache_root = TempDir::new().unwrap();
        let record = fetch_and_verify(&storage, cache_root.path(), &entry, &NoopVerifier).await.unwrap();
        assert_eq!(record.content_hash, expected_hash);
        assert!(record.cached_path.join("SKILL.md").exists());

        // Second call hits the cache without refetching.
        let cached_again = fetch_and_verify(&storage, cache_root.path(), &entry, &NoopVerifier).await.unwrap();
        assert_eq!(cached_again.cached_path, record.cached_path);
    }

    #[tokio::test]
    async fn integrity_mismatch_fails_closed() {
        let (storage, _db_dir) = test_storage().await;
        let source_dir = TempDir::new().unwrap();
        make_skill_dir(source_dir.path());

        registry::register(
            &storage,
            "demo",
            "1.0.0",
            "deadbeef",
            &format!("local_mirror:{}", source_dir.path().display()),
            None,
        )
        .await
        .unwrap();
        let entry = registry::latest(&storage, "demo").await.unwrap();

        let cache_root = TempDir::new().unwrap();
        let err = fetch_and_verify(&storage, cache_root.path(), &entry, &NoopVerifier).await.unwrap_err();
        assert!(matches!(err, CacheError::IntegrityMismatch { .. }));
    }
}
