//! Configuration parsing for the queue daemon.
//!
//! Matches the key=value dotfile format historically used by this family
//! of daemons (`.forgequeue/config`). Precedence: CLI flags > `--config`
//! file > `.forgequeue/config` > defaults.

use crate::types::{PauseMode, PublishMode, SkillsPolicyMode};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
}

/// Daemon configuration. Field names match the config keys accepted by
/// the `.forgequeue/config` dotfile.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // Storage and network
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub auth_token: Option<String>,

    // Queue/lease discipline
    pub lease_ttl_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub lease_reap_interval_secs: u64,

    // Observer hints
    pub max_events: usize,
    pub max_visible_rows: usize,

    // Worker-pause gate
    pub worker_pause_default_mode: PauseMode,

    // Skills materializer and cache
    pub skills_policy_mode: SkillsPolicyMode,
    pub skills_allowlist: Vec<String>,
    pub skills_builtin_dir: PathBuf,
    pub skills_sync_dir: PathBuf,
    pub skills_sync_on_start: bool,
    pub skills_dirs: Vec<PathBuf>,
    pub skills_cache_dir: PathBuf,

    // Publish
    pub publish_default_mode: PublishMode,

    // Manifest ingest sub-engine
    pub manifest_default_max_docs: Option<u64>,

    // External tool invocation
    pub runtime_cli: String,
    pub runtime_timeout_sec: u32,
    pub runtime_retries: u32,
    pub runtime_retry_backoff_sec: u32,
    pub pr_tool: String,

    // Auth lookup order is fixed (profile, then environment, then error);
    // this is where the profile lives when configured.
    pub auth_profile_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map_or_else(|| PathBuf::from("~/.local/share/forgequeue"), |d| d.join("forgequeue"));
        Self {
            bind_addr: "127.0.0.1:4730".to_string(),
            auth_token: None,
            lease_ttl_secs: 300,
            heartbeat_interval_secs: 75,
            lease_reap_interval_secs: 30,
            max_events: 20_000,
            max_visible_rows: 1_500,
            worker_pause_default_mode: PauseMode::Drain,
            skills_policy_mode: SkillsPolicyMode::Permissive,
            skills_allowlist: Vec::new(),
            skills_builtin_dir: PathBuf::from("skills"),
            skills_sync_dir: data_dir.join("skills"),
            skills_sync_on_start: true,
            skills_dirs: vec![
                PathBuf::from(".agent/skills"),
                dirs::home_dir()
                    .map_or_else(|| PathBuf::from("~/.agent/skills"), |h| h.join(".agent/skills")),
            ],
            skills_cache_dir: data_dir.join("skills_cache"),
            publish_default_mode: PublishMode::None,
            manifest_default_max_docs: None,
            runtime_cli: "claude".to_string(),
            runtime_timeout_sec: 600,
            runtime_retries: 0,
            runtime_retry_backoff_sec: 5,
            pr_tool: "gh".to_string(),
            auth_profile_path: None,
            data_dir,
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };
            let key = key.trim();
            let value = Self::unquote(value.trim());
            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "bind_addr" => self.bind_addr = value.to_string(),
            "auth_token" => self.auth_token = Some(value.to_string()),
            "lease_ttl_secs" => self.lease_ttl_secs = Self::parse_int(key, value)?,
            "heartbeat_interval_secs" => self.heartbeat_interval_secs = Self::parse_int(key, value)?,
            "lease_reap_interval_secs" => self.lease_reap_interval_secs = Self::parse_int(key, value)?,
            "max_events" => self.max_events = Self::parse_int::<usize>(key, value)?,
            "max_visible_rows" => self.max_visible_rows = Self::parse_int::<usize>(key, value)?,
            "worker_pause_default_mode" => {
                self.worker_pause_default_mode = match value {
                    "drain" => PauseMode::Drain,
                    "quiesce" => PauseMode::Quiesce,
                    _ => {
                        return Err(ConfigError::InvalidLine(format!(
                            "worker_pause_default_mode must be 'drain' or 'quiesce', got '{value}'"
                        )))
                    }
                };
            }
            "skills.policy_mode" | "skills_policy_mode" => {
                self.skills_policy_mode = match value {
                    "permissive" => SkillsPolicyMode::Permissive,
                    "allowlist" => SkillsPolicyMode::Allowlist,
                    _ => {
                        return Err(ConfigError::InvalidLine(format!(
                            "skills_policy_mode must be 'permissive' or 'allowlist', got '{value}'"
                        )))
                    }
                };
            }
            "skills.allowlist" | "skills_allowlist" => {
                self.skills_allowlist = value.split_whitespace().map(String::from).collect();
            }
            "skills_builtin_dir" => self.skills_builtin_dir = PathBuf::from(value),
            "skills_sync_dir" => self.skills_sync_dir = PathBuf::from(value),
            "skills_sync_on_start" => self.skills_sync_on_start = Self::parse_bool(key, value)?,
            "skills_dirs" => {
                self.skills_dirs = value.split_whitespace().map(PathBuf::from).collect();
            }
            "skills_cache_dir" => self.skills_cache_dir = PathBuf::from(value),
            "publish.default_mode" | "publish_default_mode" => {
                self.publish_default_mode = match value {
                    "none" => PublishMode::None,
                    "branch" => PublishMode::Branch,
                    "pr" => PublishMode::Pr,
                    _ => {
                        return Err(ConfigError::InvalidLine(format!(
                            "publish_default_mode must be 'none', 'branch', or 'pr', got '{value}'"
                        )))
                    }
                };
            }
            "manifest_default_max_docs" => {
                self.manifest_default_max_docs = Some(Self::parse_int(key, value)?);
            }
            "runtime_cli" => self.runtime_cli = value.to_string(),
            "runtime_timeout_sec" => self.runtime_timeout_sec = Self::parse_int(key, value)?,
            "runtime_retries" => self.runtime_retries = Self::parse_int(key, value)?,
            "runtime_retry_backoff_sec" => {
                self.runtime_retry_backoff_sec = Self::parse_int(key, value)?;
            }
            "pr_tool" => self.pr_tool = value.to_string(),
            "auth_profile_path" => self.auth_profile_path = Some(PathBuf::from(value)),
            _ => {
                eprintln!("Warning: unknown config key: {key}");
            }
        }
        Ok(())
    }

    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Resolve relative paths against a workspace root.
    pub fn resolve_paths(&mut self, workspace_root: &Path) {
        if self.data_dir.is_relative() {
            self.data_dir = workspace_root.join(&self.data_dir);
        }
        if self.skills_builtin_dir.is_relative() {
            self.skills_builtin_dir = workspace_root.join(&self.skills_builtin_dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.lease_ttl_secs, 300);
        assert_eq!(config.bind_addr, "127.0.0.1:4730");
        assert_eq!(config.skills_policy_mode, SkillsPolicyMode::Permissive);
        assert_eq!(config.publish_default_mode, PublishMode::None);
        assert_eq!(config.runtime_cli, "claude");
    }

    #[test]
    fn parse_simple_config() {
        let mut config = Config::default();
        let content = r#"
lease_ttl_secs=120
runtime_cli="codex"
skills_policy_mode=allowlist
"#;
        config.parse_content(content).unwrap();
        assert_eq!(config.lease_ttl_secs, 120);
        assert_eq!(config.runtime_cli, "codex");
        assert_eq!(config.skills_policy_mode, SkillsPolicyMode::Allowlist);
    }

    #[test]
    fn parse_skills_allowlist() {
        let mut config = Config::default();
        config
            .parse_content("skills_allowlist=pdf-processing code-review")
            .unwrap();
        assert_eq!(
            config.skills_allowlist,
            vec!["pdf-processing".to_string(), "code-review".to_string()]
        );
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(Config::unquote("\"hello\""), "hello");
        assert_eq!(Config::unquote("'world'"), "world");
        assert_eq!(Config::unquote("noquotes"), "noquotes");
    }

    #[test]
    fn parse_bool_accepts_variants() {
        assert!(Config::parse_bool("test", "true").unwrap());
        assert!(Config::parse_bool("test", "1").unwrap());
        assert!(!Config::parse_bool("test", "false").unwrap());
        assert!(!Config::parse_bool("test", "off").unwrap());
    }

    #[test]
    fn parse_invalid_publish_mode_errors() {
        let mut config = Config::default();
        let result = config.parse_content("publish_default_mode=maybe");
        assert!(result.is_err());
    }

    #[test]
    fn parse_invalid_int_errors() {
        let mut config = Config::default();
        let result = config.parse_content("lease_ttl_secs=not-a-number");
        assert!(result.is_err());
    }
}
