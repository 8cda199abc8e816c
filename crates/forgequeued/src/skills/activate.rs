//! Per-run skill activation: symlinks a run's selected, verified skills
//! into `skills_active/` and points the configured adapter directories at
//! it (the "Adapter symlink invariant").

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::skills::cache::SkillCacheRecord;

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("duplicate skill name in selection: {0}")]
    DuplicateName(String),
}

pub type Result<T> = std::result::Result<T, ActivationError>;

/// The symlink set a single claimed job's prepare stage builds.
#[derive(Debug, Clone)]
pub struct RunSkillWorkspace {
    pub run_root: PathBuf,
    pub active_dir: PathBuf,
    pub adapter_links: Vec<PathBuf>,
}

/// Build `<run_root>/skills_active/<skill_id>` symlinks into each cache
/// entry, then point every `adapter_path` at `skills_active` itself.
pub fn activate(
    run_root: &Path,
    selections: &[(String, SkillCacheRecord)],
    adapter_paths: &[PathBuf],
) -> Result<RunSkillWorkspace> {
    let active_dir = run_root.join("skills_active");
    if active_dir.exists() {
        std::fs::remove_dir_all(&active_dir)?;
    }
    std::fs::create_dir_all(&active_dir)?;

    let mut seen = std::collections::HashSet::new();
    for (skill_id, record) in selections {
        if !seen.insert(skill_id.clone()) {
            return Err(ActivationError::DuplicateName(skill_id.clone()));
        }
        symlink_dir(&record.cached_path, &active_dir.join(skill_id))?;
    }

    let mut adapter_links = Vec::with_capacity(adapter_paths.len());
    for adapter_path in adapter_paths {
        if let Some(parent) = adapter_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if adapter_path.exists() || adapter_path.symlink_metadata().is_ok() {
            remove_link(adapter_path)?;
        }
        symlink_dir(&active_dir, adapter_path)?;
        adapter_links.push(adapter_path.clone());
    }

    Ok(RunSkillWorkspace { run_root: run_root.to_path_buf(), active_dir, adapter_links })
}

/// Remove a run's `skills_active/` and its adapter links, leaving the
/// shared cache untouched.
pub fn deactivate(workspace: &RunSkillWorkspace) -> Result<()> {
    for link in &workspace.adapter_links {
        remove_link(link)?;
    }
    if workspace.active_dir.exists() {
        std::fs::remove_dir_all(&workspace.active_dir)?;
    }
    Ok(())
}

fn remove_link(path: &Path) -> Result<()> {
    if path.symlink_metadata().is_ok() {
        if path.is_dir() {
            std::fs::remove_dir_all(path)?;
        } else {
            std::fs::remove_file(path)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}
