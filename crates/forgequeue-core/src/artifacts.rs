//! Artifact blob storage helpers.
//!
//! The persisted-state layout keys each artifact by `(jobId, name)` and
//! stores opaque bytes with a content type. The blob store itself is a
//! plain content-addressed-by-name directory tree; `forgequeued::storage`
//! owns the (jobId,name) uniqueness index and calls into these helpers
//! only to move bytes.

use crate::types::Id;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("artifact already exists: {0}")]
    AlreadyExists(PathBuf),
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Path on disk for a job's artifact blob. `name` may contain `/`
/// (e.g. `logs/steps/step-0001.log`); each segment becomes a directory.
pub fn artifact_path(data_dir: &Path, job_id: &Id, name: &str) -> PathBuf {
    data_dir.join("artifacts").join(job_id.to_string()).join(name)
}

/// Write an artifact's bytes, refusing to overwrite an existing blob
/// (artifacts are write-once). Returns the path, the sha256 hex digest,
/// and the byte count.
pub fn write_artifact(
    data_dir: &Path,
    job_id: &Id,
    name: &str,
    content: &[u8],
) -> Result<(PathBuf, String, i64)> {
    let path = artifact_path(data_dir, job_id, name);
    if path.exists() {
        return Err(ArtifactError::AlreadyExists(path));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, content)?;

    let mut hasher = Sha256::new();
    hasher.update(content);
    let checksum = format!("{:x}", hasher.finalize());

    Ok((path, checksum, content.len() as i64))
}

/// Read back a previously written artifact's bytes.
pub fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    Ok(fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn artifact_path_nests_by_job_and_name() {
        let data_dir = PathBuf::from("/var/lib/forgequeue");
        let job_id = Id::from_string("job-1");
        let path = artifact_path(&data_dir, &job_id, "logs/execute.log");
        assert_eq!(
            path,
            PathBuf::from("/var/lib/forgequeue/artifacts/job-1/logs/execute.log")
        );
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let job_id = Id::from_string("job-1");
        let (path, checksum, size) =
            write_artifact(dir.path(), &job_id, "logs/prepare.log", b"hello").unwrap();
        assert_eq!(size, 5);
        assert!(!checksum.is_empty());
        let content = read_artifact(&path).unwrap();
        assert_eq!(content, b"hello");
    }

    #[test]
    fn write_twice_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let job_id = Id::from_string("job-1");
        write_artifact(dir.path(), &job_id, "logs/execute.log", b"first").unwrap();
        let result = write_artifact(dir.path(), &job_id, "logs/execute.log", b"second");
        assert!(matches!(result, Err(ArtifactError::AlreadyExists(_))));
    }

    #[test]
    fn checksum_is_sha256_of_content() {
        let dir = TempDir::new().unwrap();
        let job_id = Id::from_string("job-1");
        let (_, checksum, _) = write_artifact(dir.path(), &job_id, "a.txt", b"hello world").unwrap();
        assert_eq!(
            checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
