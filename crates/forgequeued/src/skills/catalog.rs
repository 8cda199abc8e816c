//! Skill catalog: directory scanning and discovery.
//!
//! Discovers skills from configured directories, parses SKILL.md
//! frontmatter, and returns a list of available skills. Used by
//! `registry::resolve` for `local_mirror`-sourced entries.

use forgequeue_core::config::Config;
use forgequeue_core::skills::{parse_skill_md, SkillError, SkillLocation, SkillMetadata};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of skill discovery with potential errors.
#[derive(Debug)]
pub struct DiscoveryResult {
    /// Successfully parsed skills.
    pub skills: Vec<SkillMetadata>,
    /// Parse/load errors encountered.
    pub errors: Vec<DiscoveryError>,
}

/// Parse/load error details for a skill.
#[derive(Debug)]
pub struct DiscoveryError {
    /// Skill name (directory name fallback).
    pub name: String,
    /// Path to the SKILL.md file that failed.
    pub path: PathBuf,
    /// Underlying parse/load error.
    pub error: SkillError,
}

/// Discover all skills from configured directories.
///
/// Scans directories in priority order:
/// 1. Project-local directories (e.g., `.agent/skills`, `.claude/skills`)
/// 2. Global directories (e.g., `~/.agent/skills`, `~/.claude/skills`)
/// 3. Synced built-in skills directory
///
/// Invalid SKILL.md frontmatter: skip skill, record error. Duplicate skill
/// names: prefer first match in configured search order. Missing or empty
/// description: skip skill.
pub fn discover_skills(config: &Config, workspace_root: &Path) -> DiscoveryResult {
    let mut skills = Vec::new();
    let mut errors = Vec::new();
    let mut seen_names: HashSet<String> = HashSet::new();

    // Scan configured directories in priority order.
    for dir in &config.skills_dirs {
        let resolved = if dir.is_relative() {
            workspace_root.join(dir)
        } else {
            dir.clone()
        };

        // Determine location based on whether it's under workspace root.
        let location = if resolved.starts_with(workspace_root) {
            SkillLocation::Project
        } else {
            SkillLocation::Global
        };

        scan_directory(
            &resolved,
            location,
            &mut skills,
            &mut errors,
            &mut seen_names,
        );
    }

    // Also scan the synced built-in skills directory.
    if config.skills_sync_on_start {
        scan_directory(
            &config.skills_sync_dir,
            SkillLocation::Global,
            &mut skills,
            &mut errors,
            &mut seen_names,
        );
    }

    debug!(
        count = skills.len(),
        errors = errors.len(),
        "discovered skills"
    );

    DiscoveryResult { skills, errors }
}

/// Scan a single directory for skills.
fn scan_directory(
    dir: &Path,
    location: SkillLocation,
    skills: &mut Vec<SkillMetadata>,
    errors: &mut Vec<DiscoveryError>,
    seen_names: &mut HashSet<String>,
) {
    if !dir.exists() {
        debug!(path = %dir.display(), "skills directory not found, skipping");
        return;
    }

    if !dir.is_dir() {
        debug!(path = %dir.display(), "skills path is not a directory, skipping");
        return;
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                path = %dir.display(),
                error = %e,
                "failed to read skills directory"
            );
            return;
        }
    };

    for entry in entries.filter_map(Result::ok) {
        let skill_dir = entry.path();

        // Each skill is a subdirectory containing SKILL.md.
        if !skill_dir.is_dir() {
            continue;
        }

        let skill_md_path = skill_dir.join("SKILL.md");
        if !skill_md_path.exists() {
            debug!(
                path = %skill_dir.display(),
                "no SKILL.md found, skipping"
            );
            continue;
        }

        // Read and parse SKILL.md.
        let content = match fs::read_to_string(&skill_md_path) {
            Ok(content) => content,
            Err(e) => {
                let skill_name = skill_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("unknown")
                    .to_string();
                warn!(
                    path = %skill_md_path.display(),
                    error = %e,
                    "failed to read SKILL.md"
                );
                errors.push(DiscoveryError {
                    name: skill_name,
                    path: skill_md_path.clone(),
                    error: SkillError::InvalidYaml(format!("IO error: {e}")),
                });
                continue;
            }
        };

        match parse_skill_md(&content, skill_dir.clone(), location) {
            Ok(metadata) => {
                // Check for duplicates (prefer first match).
                if seen_names.contains(&metadata.name) {
                    debug!(
                        name = %metadata.name,
                        path = %skill_dir.display(),
                        "duplicate skill name, skipping"
                    );
                    continue;
                }

                seen_names.insert(metadata.name.clone());
                skills.push(metadata);
            }
            Err(e) => {
                let skill_name = skill_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("unknown")
                    .to_string();
                warn!(
                    path = %skill_md_path.display(),
                    error = %e,
                    "failed to parse SKILL.md"
                );
                errors.push(DiscoveryError {
                    name: skill_name,
                    path: skill_md_path.clone(),
                    error: e,
                });
            }
        }
    }
}
