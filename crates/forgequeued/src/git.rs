//! Git operations used by the task worker's prepare/publish stages.
//!
//! The prepare stage clones `repository` at `baseBranch` and checks out
//! `workingBranch`; the publish stage pushes `workingBranch` when
//! `publish.mode != none`.

use forgequeue_core::prompt::sanitize_branch_name;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
    #[error("invalid utf-8 in git output")]
    InvalidUtf8,
    #[error("dirty working tree: {0}")]
    DirtyWorkingTree(String),
}

pub type Result<T> = std::result::Result<T, GitError>;

fn run(workspace_root: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git").args(args).current_dir(workspace_root).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitError::CommandFailed(format!("git {}: {}", args.join(" "), stderr)));
    }
    Ok(())
}

/// Clone `repository` into `dest`, checking out `base_branch` if given.
///
/// `repository` is whatever `git clone` accepts: a local path, an `ssh://`
/// or `https://` remote, or an `owner/repo` shorthand the caller has already
/// resolved to a full URL.
pub fn clone_repository(repository: &str, dest: &Path, base_branch: Option<&str>) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut args = vec!["clone"];
    if let Some(branch) = base_branch {
        args.push("--branch");
        args.push(branch);
    }
    let dest_str = dest.to_string_lossy();
    args.push(repository);
    args.push(&dest_str);

    let output = Command::new("git").args(&args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitError::CommandFailed(format!("git clone {}: {}", repository, stderr)));
    }
    Ok(())
}

/// Detect the default branch for a repository: tries the remote's `HEAD`
/// symref first, then falls back to `main`/`master`.
pub fn detect_default_branch(workspace_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["symbolic-ref", "refs/remotes/origin/HEAD"])
        .current_dir(workspace_root)
        .output()?;

    if output.status.success() {
        let full_ref = String::from_utf8(output.stdout).map_err(|_| GitError::InvalidUtf8)?.trim().to_string();
        if let Some(branch) = full_ref.strip_prefix("refs/remotes/origin/") {
            return Ok(branch.to_string());
        }
    }

    if branch_exists(workspace_root, "main")? {
        return Ok("main".to_string());
    }
    if branch_exists(workspace_root, "master")? {
        return Ok("master".to_string());
    }
    Ok("main".to_string())
}

/// Check if a branch exists locally.
pub fn branch_exists(workspace_root: &Path, branch: &str) -> Result<bool> {
    let output = Command::new("git")
        .args(["rev-parse", "--verify", &format!("refs/heads/{branch}")])
        .current_dir(workspace_root)
        .output()?;
    Ok(output.status.success())
}

/// Create a new branch from `base` without checking it out.
pub fn create_branch(workspace_root: &Path, branch: &str, base: &str) -> Result<()> {
    run(workspace_root, &["branch", branch, base])
}

/// Checkout a branch, creating it from `base` first if it doesn't exist
/// (the task worker.s `workingBranch` derivation).
pub fn checkout_working_branch(workspace_root: &Path, branch: &str, base: &str) -> Result<()> {
    if !branch_exists(workspace_root, branch)? {
        create_branch(workspace_root, branch, base)?;
    }
    checkout_branch(workspace_root, branch)
}

pub fn checkout_branch(workspace_root: &Path, branch: &str) -> Result<()> {
    run(workspace_root, &["checkout", branch])
}

pub fn is_working_tree_clean(workspace_root: &Path) -> Result<bool> {
    let output = Command::new("git").args(["status", "--porcelain"]).current_dir(workspace_root).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitError::CommandFailed(format!("git status: {stderr}")));
    }
    let stdout = String::from_utf8(output.stdout).map_err(|_| GitError::InvalidUtf8)?;
    Ok(stdout.trim().is_empty())
}

/// Stage and commit all working-tree changes. No-op (returns `Ok(false)`)
/// if nothing changed.
pub fn commit_all(workspace_root: &Path, message: &str) -> Result<bool> {
    if is_working_tree_clean(workspace_root)? {
        return Ok(false);
    }
    run(workspace_root, &["add", "-A"])?;
    run(workspace_root, &["commit", "-m", message])?;
    Ok(true)
}

/// Push `branch` to `origin`, creating the remote tracking ref if needed.
/// Used by the publish stage (`PublishMode::Branch` and
/// `PublishMode::Pr`).
pub fn push_branch(workspace_root: &Path, branch: &str) -> Result<()> {
    run(workspace_root, &["push", "--set-upstream", "origin", branch])
}

/// Repository directory name, used for branch-name templating.
pub fn repo_name(workspace_root: &Path) -> String {
    workspace_root.file_name().and_then(|n| n.to_str()).unwrap_or("repo").to_string()
}

/// Derive a filesystem/branch-safe working branch name from a job id and
/// repository, e.g. `forgequeue/acme-widgets-01933b3f`.
pub fn default_working_branch(repository: &str, job_id: &str) -> String {
    let short_id: String = job_id.chars().take(8).collect();
    let safe_repo = sanitize_branch_name(repository);
    format!("forgequeue/{safe_repo}-{short_id}")
}

pub fn clone_dest_path(data_dir: &Path, job_id: &str) -> PathBuf {
    data_dir.join("runs").join(job_id).join("workspace")
}
