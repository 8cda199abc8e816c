//! Small text helpers shared by the daemon's git integration.

/// Sanitize a branch name for filesystem use (replace slashes with dashes).
pub fn sanitize_branch_name(branch: &str) -> String {
    branch.replace('/', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_branch_name_replaces_slashes() {
        assert_eq!(sanitize_branch_name("run/my-feature"), "run-my-feature");
        assert_eq!(sanitize_branch_name("feature/sub/deep"), "feature-sub-deep");
        assert_eq!(sanitize_branch_name("no-slashes"), "no-slashes");
    }
}
