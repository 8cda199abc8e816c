//! Pull-request creation for the publish stage (`PublishMode::Pr`).

use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrError {
    #[error("{tool} CLI not available on PATH")]
    ToolNotAvailable { tool: String },
    #[error("{tool} pr create failed: {message}")]
    CreateFailed { tool: String, message: String },
}

pub type Result<T> = std::result::Result<T, PrError>;

/// Check whether `tool` (e.g. `gh`) is resolvable on `PATH`.
pub fn is_tool_available(tool: &str) -> bool {
    Command::new("which").arg(tool).output().map(|o| o.status.success()).unwrap_or(false)
}

/// Open a pull request from `head_branch` into `base_branch` using the
/// configured PR tool. Only `gh` is implemented; other tool names fail
/// fast with `ToolNotAvailable` since they have no shell-out analog.
pub fn create_pull_request(
    tool: &str,
    workspace_root: &Path,
    head_branch: &str,
    base_branch: &str,
    title: &str,
    body: &str,
) -> Result<String> {
    if tool != "gh" {
        return Err(PrError::ToolNotAvailable { tool: tool.to_string() });
    }
    if !is_tool_available(tool) {
        return Err(PrError::ToolNotAvailable { tool: tool.to_string() });
    }

    let output = Command::new(tool)
        .args(["pr", "create", "--head", head_branch, "--base", base_branch, "--title", title, "--body", body])
        .current_dir(workspace_root)
        .output()
        .map_err(|e| PrError::CreateFailed { tool: tool.to_string(), message: e.to_string() })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(PrError::CreateFailed { tool: tool.to_string(), message: stderr });
    }

    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if url.is_empty() {
        return Err(PrError::CreateFailed {
            tool: tool.to_string(),
            message: "pr create returned empty output".to_string(),
        });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_is_not_available() {
        let err = create_pull_request("hub", Path::new("."), "feature", "main", "t", "b").unwrap_err();
        assert!(matches!(err, PrError::ToolNotAvailable { .. }));
    }
}
