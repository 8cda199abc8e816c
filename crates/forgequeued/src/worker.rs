//! Task worker runtime: the per-claim stage driver (preflight, prepare,
//! execute, publish, finalize) plus the poll-and-claim outer loop.
//!
//! One `WorkerLoop` drives at most one claimed job at a time on its main
//! track (single-threaded per claimed job); the
//! concurrent heartbeat renewal and the stage driver's own blocking points
//! (child-process I/O, git, PR tool) are the only suspension points.

use chrono::Utc;
use forgequeue_core::errors::{ErrorKind, TypedError};
use forgequeue_core::events::{EventPayload, LogEventPayload, StageEventPayload};
use forgequeue_core::types::{
    EventKind, LogStream, PublishMode, RequiredCapabilities, SkillsPolicyMode, Stage, TaskPayload,
    TaskSkillRef, TaskStep,
};
use forgequeue_core::{artifacts, Artifact, Id, Job, JobOutcome, JobPayload};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::git;
use crate::pr;
use crate::queue::QueueService;
use crate::skills::{self, SkillsMetrics};
use crate::storage::Storage;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Static configuration for one worker process, sourced from environment
/// at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub advertised_capabilities: RequiredCapabilities,
    pub allowed_types: Vec<String>,
    pub allowed_repositories: Option<Vec<String>>,
    pub data_dir: PathBuf,
    pub heartbeat_interval_secs: u64,
    pub claim_poll_interval: Duration,
    pub skills_cache_dir: PathBuf,
    pub skills_policy_mode: SkillsPolicyMode,
    pub skills_allowlist: Vec<String>,
    pub skills_adapter_dirs: Vec<PathBuf>,
    pub runtime_cli: String,
    pub runtime_timeout_sec: u32,
    pub runtime_retries: u32,
    pub runtime_retry_backoff_sec: u32,
    pub pr_tool: String,
}

impl WorkerConfig {
    /// Build a worker's static config from the daemon's shared `Config`
    /// plus environment overrides (CLI surface (worker
    /// daemon)"): `FORGEQUEUE_WORKER_ID_PREFIX`, `FORGEQUEUE_CAPABILITIES`,
    /// `FORGEQUEUE_ALLOWED_TYPES`, `FORGEQUEUE_ALLOWED_REPOSITORIES`.
    pub fn from_env(config: &forgequeue_core::Config, index: usize) -> Self {
        let prefix = std::env::var("FORGEQUEUE_WORKER_ID_PREFIX").unwrap_or_else(|_| "worker".to_string());
        let worker_id = format!("{prefix}-{index}");

        let advertised_capabilities = std::env::var("FORGEQUEUE_CAPABILITIES")
            .ok()
            .map(|v| crate::capabilities_from_csv(&v))
            .unwrap_or_default();

        let allowed_types = std::env::var("FORGEQUEUE_ALLOWED_TYPES")
            .ok()
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_else(crate::default_allowed_types);

        let allowed_repositories = std::env::var("FORGEQUEUE_ALLOWED_REPOSITORIES")
            .ok()
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect());

        Self {
            worker_id,
            advertised_capabilities,
            allowed_types,
            allowed_repositories,
            data_dir: config.data_dir.clone(),
            heartbeat_interval_secs: config.heartbeat_interval_secs,
            claim_poll_interval: Duration::from_secs(2),
            skills_cache_dir: config.skills_cache_dir.clone(),
            skills_policy_mode: config.skills_policy_mode,
            skills_allowlist: config.skills_allowlist.clone(),
            skills_adapter_dirs: vec![PathBuf::from("skills_active")],
            runtime_cli: config.runtime_cli.clone(),
            runtime_timeout_sec: config.runtime_timeout_sec,
            runtime_retries: config.runtime_retries,
            runtime_retry_backoff_sec: config.runtime_retry_backoff_sec,
            pr_tool: config.pr_tool.clone(),
        }
    }
}

/// The task worker runtime: claims jobs from `queue` and drives each one
/// through its full stage lifecycle.
pub struct WorkerLoop {
    queue: Arc<QueueService>,
    storage: Arc<Storage>,
    skills_metrics: Arc<SkillsMetrics>,
    config: WorkerConfig,
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<QueueService>,
        storage: Arc<Storage>,
        skills_metrics: Arc<SkillsMetrics>,
        config: WorkerConfig,
    ) -> Self {
        Self { queue, storage, skills_metrics, config }
    }

    /// Poll-claim-execute loop. Runs until `shutdown` is signalled via
    /// `QueueService::shutdown()`, at which point the current in-flight
    /// job is allowed to reach its next safe boundary before returning.
    pub async fn run(&self) {
        loop {
            let claimed = match self
                .queue
                .claim_job(
                    &self.config.worker_id,
                    &self.config.advertised_capabilities,
                    Some(&self.config.allowed_types),
                    self.config.allowed_repositories.as_deref(),
                )
                .await
            {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::time::sleep(self.config.claim_poll_interval).await;
                    continue;
                }
                Err(crate::queue::QueueError::Shutdown) => {
                    info!("worker loop shutting down");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "claim failed");
                    tokio::time::sleep(self.config.claim_poll_interval).await;
                    continue;
                }
            };

            info!(job_id = %claimed.id, job_type = %claimed.payload.type_name(), "claimed job");
            self.drive(claimed).await;
        }
    }

    /// Run one claimed job end-to-end, including the concurrent heartbeat
    /// renewal task.
    async fn drive(&self, job: Job) {
        let job_id = job.id.clone();
        let heartbeat = self.spawn_heartbeat(job_id.clone());

        let outcome = match &job.payload {
            JobPayload::Task(task) => self.run_task(&job, task).await,
            JobPayload::Manifest(_) => crate::manifest::run_manifest_job(&self.storage, &self.queue, &job).await,
        };

        heartbeat.abort();

        match outcome {
            Ok(()) => {}
            Err(typed) => {
                self.settle_failure(&job, typed).await;
            }
        }
    }

    fn spawn_heartbeat(&self, job_id: Id) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let worker_id = self.config.worker_id.clone();
        let interval = Duration::from_secs(self.config.heartbeat_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = queue.heartbeat(&job_id, &worker_id).await {
                    warn!(job_id = %job_id, error = %e, "heartbeat failed; lease may expire");
                }
            }
        })
    }

    /// Decide the terminal/requeue outcome for an escalated stage error,
    /// per the cancellation propagation policy.
    async fn settle_failure(&self, job: &Job, err: TypedError) {
        if err.kind == ErrorKind::Cancelled {
            let _ = self.queue.report_terminal(&job.id, &self.config.worker_id, JobOutcome::Cancelled, Some(err.message.as_str())).await;
            return;
        }
        if err.kind == ErrorKind::Capability {
            info!(job_id = %job.id, "capability error; requeuing for another worker");
            let _ = self.queue.requeue_job(&job.id).await;
            return;
        }
        if err.kind.terminal_on_first_occurrence() {
            let _ = self.queue.report_terminal(&job.id, &self.config.worker_id, JobOutcome::Failure, Some(err.message.as_str())).await;
            return;
        }
        // Re-fetch attempt_count: claim_job already incremented it for this attempt.
        match self.queue.get_job(&job.id).await {
            Ok(current) if current.attempt_count < current.max_attempts => {
                warn!(job_id = %job.id, attempt = current.attempt_count, max = current.max_attempts, error = %err, "stage failed; requeuing for retry");
                let _ = self.queue.requeue_job(&job.id).await;
            }
            _ => {
                let _ = self.queue.report_terminal(&job.id, &self.config.worker_id, JobOutcome::Failure, Some(err.message.as_str())).await;
            }
        }
    }

    async fn emit_stage(&self, job_id: &Id, stage: Stage, status: &str, duration_ms: Option<u64>, error: Option<String>) {
        let payload = EventPayload::Stage(StageEventPayload { stage, kind: EventKind::Stage, status: status.to_string(), duration_ms, error });
        if let Err(e) = self.queue.append_event(job_id, &payload, &stage.event_name()).await {
            warn!(job_id = %job_id, error = %e, "failed to append stage event");
        }
    }

    async fn emit_log(&self, job_id: &Id, stage: Stage, stream: LogStream, line: &str, step_id: Option<&str>) {
        let payload = EventPayload::Log(LogEventPayload {
            stage,
            kind: EventKind::Log,
            stream,
            line: line.to_string(),
            step_id: step_id.map(str::to_string),
        });
        let _ = self.queue.append_event(job_id, &payload, line).await;
    }

    async fn is_cancel_requested(&self, job_id: &Id) -> bool {
        matches!(self.queue.get_job(job_id).await, Ok(job) if job.cancel_requested_at.is_some())
    }

    fn run_root(&self, job_id: &Id) -> PathBuf {
        self.config.data_dir.join("runs").join(job_id.to_string())
    }

    // --- Task job lifecycle ---

    async fn run_task(&self, job: &Job, task: &TaskPayload) -> Result<(), TypedError> {
        self.stage_preflight(job, task).await?;

        if self.is_cancel_requested(&job.id).await {
            return Err(TypedError::new(ErrorKind::Cancelled, "cancel observed at preflight boundary"));
        }

        let run_root = self.run_root(&job.id);
        let prepared = self.stage_prepare(job, task, &run_root).await?;

        if self.is_cancel_requested(&job.id).await {
            self.cleanup_run(&prepared, false).await;
            return Err(TypedError::new(ErrorKind::Cancelled, "cancel observed after prepare"));
        }

        let execute_result = self.stage_execute(job, task, &prepared).await;
        let execute_outcome = match execute_result {
            Ok(()) => None,
            Err(err) => Some(err),
        };

        if let Some(err) = execute_outcome {
            self.cleanup_run(&prepared, false).await;
            return Err(err);
        }

        if self.is_cancel_requested(&job.id).await {
            self.cleanup_run(&prepared, false).await;
            return Err(TypedError::new(ErrorKind::Cancelled, "cancel observed after execute"));
        }

        self.stage_publish(job, task, &prepared).await?;

        self.stage_finalize(job, &prepared, true).await;
        Ok(())
    }

    async fn stage_preflight(&self, job: &Job, task: &TaskPayload) -> Result<(), TypedError> {
        let started = Utc::now();
        self.emit_stage(&job.id, Stage::Preflight, "started", None, None).await;

        if !command_on_path("git") {
            let err = TypedError::new(ErrorKind::Capability, "git is not available on this worker");
            self.emit_stage(&job.id, Stage::Preflight, "failed", Some(elapsed_ms(started)), Some(err.message.clone())).await;
            return Err(err);
        }
        if !command_on_path(&task.runtime.mode) && !command_on_path(&self.config.runtime_cli) {
            let err = TypedError::new(
                ErrorKind::Capability,
                format!("runtime CLI '{}' is not available on this worker", task.runtime.mode),
            );
            self.emit_stage(&job.id, Stage::Preflight, "failed", Some(elapsed_ms(started)), Some(err.message.clone())).await;
            return Err(err);
        }
        if task.publish.mode == PublishMode::Pr && !pr::is_tool_available(&self.config.pr_tool) {
            let err = TypedError::new(ErrorKind::Capability, format!("PR tool '{}' is not available", self.config.pr_tool));
            self.emit_stage(&job.id, Stage::Preflight, "failed", Some(elapsed_ms(started)), Some(err.message.clone())).await;
            return Err(err);
        }

        self.emit_stage(&job.id, Stage::Preflight, "succeeded", Some(elapsed_ms(started)), None).await;
        Ok(())
    }

    async fn stage_prepare(&self, job: &Job, task: &TaskPayload, run_root: &Path) -> Result<PreparedRun, TypedError> {
        let started = Utc::now();
        self.emit_stage(&job.id, Stage::Prepare, "started", None, None).await;

        let workspace_root = run_root.join("workspace");
        let repository = task.repository.clone();
        let starting_branch = task.git.starting_branch.clone();
        let clone_result = {
            let workspace_root = workspace_root.clone();
            let starting_branch = starting_branch.clone();
            tokio::task::spawn_blocking(move || {
                git::clone_repository(&repository, &workspace_root, starting_branch.as_deref())
            })
            .await
            .map_err(|e| TypedError::new(ErrorKind::Transient, format!("prepare task panicked: {e}")))?
        };
        if let Err(e) = clone_result {
            let err = TypedError::new(ErrorKind::Tool, format!("git clone failed: {e}"));
            self.emit_stage(&job.id, Stage::Prepare, "failed", Some(elapsed_ms(started)), Some(err.message.clone())).await;
            return Err(err);
        }

        let working_branch = if task.git.new_branch.is_empty() {
            git::default_working_branch(&task.repository, job.id.as_ref())
        } else {
            task.git.new_branch.clone()
        };
        let base_branch = {
            let workspace_root = workspace_root.clone();
            let starting_branch = starting_branch.clone();
            tokio::task::spawn_blocking(move || match starting_branch {
                Some(b) => Ok(b),
                None => git::detect_default_branch(&workspace_root),
            })
            .await
            .map_err(|e| TypedError::new(ErrorKind::Transient, format!("prepare task panicked: {e}")))?
        };
        let base_branch = base_branch.map_err(|e| TypedError::new(ErrorKind::Tool, format!("failed to detect default branch: {e}")))?;

        {
            let workspace_root = workspace_root.clone();
            let working_branch = working_branch.clone();
            let base_branch = base_branch.clone();
            tokio::task::spawn_blocking(move || git::checkout_working_branch(&workspace_root, &working_branch, &base_branch))
                .await
                .map_err(|e| TypedError::new(ErrorKind::Transient, format!("prepare task panicked: {e}")))?
                .map_err(|e| TypedError::new(ErrorKind::Tool, format!("failed to checkout working branch: {e}")))?;
        }

        let skill_selections = self.materialize_skills(job, task, run_root).await;
        let skill_workspace = match skill_selections {
            Ok(ws) => ws,
            Err(err) => {
                self.emit_stage(&job.id, Stage::Prepare, "failed", Some(elapsed_ms(started)), Some(err.message.clone())).await;
                return Err(err);
            }
        };

        let prepare_log = format!(
            "cloned {} at {}; working branch {}\n",
            task.repository, base_branch, working_branch
        );
        let _ = self.write_artifact(&job.id, "logs/prepare.log", prepare_log.as_bytes(), "text/plain").await;

        self.emit_stage(&job.id, Stage::Prepare, "succeeded", Some(elapsed_ms(started)), None).await;

        Ok(PreparedRun {
            run_root: run_root.to_path_buf(),
            workspace_root,
            working_branch,
            base_branch,
            skill_workspace,
        })
    }

    /// Resolve, verify, and activate every skill the task (and its steps)
    /// select, applying the configured policy gate.
    async fn materialize_skills(&self, job: &Job, task: &TaskPayload, run_root: &Path) -> Result<Option<skills::RunSkillWorkspace>, TypedError> {
        let mut selections: Vec<&TaskSkillRef> = Vec::new();
        if let Some(skill) = &task.skill {
            selections.push(skill);
        }
        for step in &task.steps {
            if let Some(skill) = &step.skill {
                selections.push(skill);
            }
        }
        if selections.is_empty() {
            return Ok(None);
        }

        let mut seen_names = BTreeSet::new();
        for s in &selections {
            if !seen_names.insert(s.id.clone()) {
                return Err(TypedError::new(ErrorKind::Validation, format!("duplicate skill selection: {}", s.id)));
            }
        }

        let mut cached = Vec::with_capacity(selections.len());
        for selection in selections.iter().copied() {
            let registered = skills::registry::resolve(
                &self.storage,
                selection,
                self.config.skills_policy_mode,
                &self.config.skills_allowlist,
            )
            .await
            .map_err(|e| match e {
                skills::RegistryError::PolicyRejected(s) => TypedError::new(ErrorKind::Policy, format!("skill '{s}' is not on the allowlist")),
                skills::RegistryError::NotFound(s) => TypedError::new(ErrorKind::Capability, format!("skill '{s}' is not registered")),
                skills::RegistryError::Storage(e) => TypedError::new(ErrorKind::Transient, e.to_string()),
            })?;
            self.skills_metrics.inc_resolved(1);

            let record = skills::fetch_and_verify(&self.storage, &self.config.skills_cache_dir, &registered, &skills::NoopVerifier)
                .await
                .map_err(|e| {
                    if matches!(e, skills::CacheError::IntegrityMismatch { .. }) {
                        self.skills_metrics.inc_integrity_failed();
                        TypedError::new(ErrorKind::Integrity, e.to_string())
                    } else {
                        TypedError::new(ErrorKind::Transient, e.to_string())
                    }
                })?;
            self.skills_metrics.inc_verified(1);
            cached.push((selection.id.clone(), record));
        }

        let adapter_paths: Vec<PathBuf> =
            self.config.skills_adapter_dirs.iter().map(|d| run_root.join(d)).collect();
        let workspace = skills::activate(run_root, &cached, &adapter_paths).map_err(|e| {
            self.skills_metrics.inc_activation_failed();
            TypedError::new(ErrorKind::Integrity, format!("skill activation failed: {e}"))
        })?;

        Ok(Some(workspace))
    }

    async fn stage_execute(&self, job: &Job, task: &TaskPayload, prepared: &PreparedRun) -> Result<(), TypedError> {
        let started = Utc::now();
        self.emit_stage(&job.id, Stage::Execute, "started", None, None).await;

        let steps: Vec<TaskStep> = if task.steps.is_empty() {
            vec![TaskStep { id: "step-0001".to_string(), instructions: task.instructions.clone(), skill: task.skill.clone() }]
        } else {
            task.steps.clone()
        };

        let mut union_output = String::new();
        for (index, step) in steps.iter().enumerate() {
            if self.is_cancel_requested(&job.id).await {
                let err = TypedError::new(ErrorKind::Cancelled, "cancel observed between steps");
                self.emit_stage(&job.id, Stage::Execute, "cancelled", Some(elapsed_ms(started)), Some(err.message.clone())).await;
                return Err(err);
            }

            match self.execute_step(job, step, &prepared.workspace_root).await {
                Ok(output) => {
                    union_output.push_str(&output);
                    let name = format!("logs/steps/step-{:04}.log", index + 1);
                    let _ = self.write_artifact(&job.id, &name, output.as_bytes(), "text/plain").await;
                }
                Err(e) => {
                    self.emit_stage(&job.id, Stage::Execute, "failed", Some(elapsed_ms(started)), Some(e.message.clone())).await;
                    return Err(e);
                }
            }
        }

        let _ = self.write_artifact(&job.id, "logs/execute.log", union_output.as_bytes(), "text/plain").await;
        self.emit_stage(&job.id, Stage::Execute, "succeeded", Some(elapsed_ms(started)), None).await;
        Ok(())
    }

    async fn execute_step(&self, job: &Job, step: &TaskStep, working_dir: &Path) -> Result<String, TypedError> {
        let runtime_cli = self.config.runtime_cli.clone();
        let max_attempts = self.config.runtime_retries + 1;
        let mut last_err = None;

        for attempt in 1..=max_attempts {
            debug!(job_id = %job.id, step_id = %step.id, attempt, "executing step");
            match self.spawn_step(&runtime_cli, step, working_dir, job).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    warn!(job_id = %job.id, step_id = %step.id, attempt, error = %e, "step execution failed");
                    last_err = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(Duration::from_secs(self.config.runtime_retry_backoff_sec as u64)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| TypedError::new(ErrorKind::Tool, "step execution exhausted retries")))
    }

    async fn spawn_step(&self, runtime_cli: &str, step: &TaskStep, working_dir: &Path, job: &Job) -> Result<String, TypedError> {
        let mut cmd = Command::new(runtime_cli);
        cmd.arg("-p")
            .arg(&step.instructions)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TypedError::new(ErrorKind::Capability, format!("runtime CLI '{runtime_cli}' not found"))
            } else {
                TypedError::new(ErrorKind::Tool, format!("failed to spawn '{runtime_cli}': {e}"))
            }
        })?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut combined = String::new();
        let wait = async {
            loop {
                tokio::select! {
                    line = stdout_lines.next_line() => {
                        match line {
                            Ok(Some(l)) => {
                                self.emit_log(&job.id, Stage::Execute, LogStream::Stdout, &l, Some(&step.id)).await;
                                combined.push_str(&l);
                                combined.push('\n');
                            }
                            Ok(None) => break,
                            Err(_) => break,
                        }
                    }
                    line = stderr_lines.next_line() => {
                        match line {
                            Ok(Some(l)) => {
                                self.emit_log(&job.id, Stage::Execute, LogStream::Stderr, &l, Some(&step.id)).await;
                                combined.push_str(&l);
                                combined.push('\n');
                            }
                            Ok(None) => {}
                            Err(_) => {}
                        }
                    }
                }
            }
        };

        let timeout_sec = self.config.runtime_timeout_sec;
        let status = if timeout_sec > 0 {
            let fut = async {
                wait.await;
                child.wait().await
            };
            match tokio::time::timeout(Duration::from_secs(timeout_sec as u64), fut).await {
                Ok(result) => result,
                Err(_) => {
                    let _ = child.start_kill();
                    return Err(TypedError::new(ErrorKind::Transient, format!("step '{}' timed out after {timeout_sec}s", step.id)));
                }
            }
        } else {
            wait.await;
            child.wait().await
        };

        let status = status.map_err(|e| TypedError::new(ErrorKind::Tool, format!("failed to wait for '{runtime_cli}': {e}")))?;
        if !status.success() {
            return Err(TypedError::new(
                ErrorKind::Tool,
                format!("step '{}' exited with {}", step.id, status.code().unwrap_or(-1)),
            ));
        }
        Ok(combined)
    }

    async fn stage_publish(&self, job: &Job, task: &TaskPayload, prepared: &PreparedRun) -> Result<(), TypedError> {
        let started = Utc::now();
        self.emit_stage(&job.id, Stage::Publish, "started", None, None).await;

        if task.publish.mode == PublishMode::None {
            self.emit_stage(&job.id, Stage::Publish, "succeeded", Some(elapsed_ms(started)), None).await;
            return Ok(());
        }

        let workspace_root = prepared.workspace_root.clone();
        let commit_message = task.publish.commit_message.clone().unwrap_or_else(|| "forgequeue: apply task changes".to_string());
        let working_branch = prepared.working_branch.clone();
        let committed = {
            let workspace_root = workspace_root.clone();
            tokio::task::spawn_blocking(move || git::commit_all(&workspace_root, &commit_message))
                .await
                .map_err(|e| TypedError::new(ErrorKind::Transient, format!("publish task panicked: {e}")))?
                .map_err(|e| TypedError::new(ErrorKind::Tool, format!("commit failed: {e}")))?
        };

        {
            let workspace_root = workspace_root.clone();
            let working_branch = working_branch.clone();
            tokio::task::spawn_blocking(move || git::push_branch(&workspace_root, &working_branch))
                .await
                .map_err(|e| TypedError::new(ErrorKind::Transient, format!("publish task panicked: {e}")))?
                .map_err(|e| TypedError::new(ErrorKind::Tool, format!("push failed: {e}")))?;
        }

        let mut publish_log = format!("pushed branch {working_branch} (committed changes: {committed})\n");
        let mut result_json = serde_json::json!({ "mode": task.publish.mode.as_str(), "branch": working_branch });

        if task.publish.mode == PublishMode::Pr {
            let pr_tool = self.config.pr_tool.clone();
            let base_branch = task.publish.pr_base_branch.clone().unwrap_or_else(|| prepared.base_branch.clone());
            let title = task.publish.pr_title.clone().unwrap_or_else(|| task.instructions.chars().take(72).collect());
            let body = task.publish.pr_body.clone().unwrap_or_default();
            let head_branch = working_branch.clone();
            let url = {
                let workspace_root = workspace_root.clone();
                tokio::task::spawn_blocking(move || pr::create_pull_request(&pr_tool, &workspace_root, &head_branch, &base_branch, &title, &body))
                    .await
                    .map_err(|e| TypedError::new(ErrorKind::Transient, format!("publish task panicked: {e}")))?
                    .map_err(|e| TypedError::new(ErrorKind::Tool, format!("pr create failed: {e}")))?
            };
            publish_log.push_str(&format!("opened pull request: {url}\n"));
            result_json["pr_url"] = serde_json::Value::String(url);
        }

        let _ = self.write_artifact(&job.id, "logs/publish.log", publish_log.as_bytes(), "text/plain").await;
        let _ = self
            .write_artifact(&job.id, "publish_result.json", serde_json::to_vec_pretty(&result_json).unwrap_or_default().as_slice(), "application/json")
            .await;

        self.emit_stage(&job.id, Stage::Publish, "succeeded", Some(elapsed_ms(started)), None).await;
        Ok(())
    }

    async fn stage_finalize(&self, job: &Job, prepared: &PreparedRun, succeeded: bool) {
        let started = Utc::now();
        self.emit_stage(&job.id, Stage::Finalize, "started", None, None).await;

        let outcome = if succeeded { JobOutcome::Success } else { JobOutcome::Failure };
        if let Err(e) = self.queue.report_terminal(&job.id, &self.config.worker_id, outcome, None).await {
            warn!(job_id = %job.id, error = %e, "failed to report terminal outcome");
        }

        self.cleanup_run(prepared, succeeded).await;
        self.emit_stage(&job.id, Stage::Finalize, "succeeded", Some(elapsed_ms(started)), None).await;
    }

    /// On success, destroy the run workspace; on failure, preserve
    /// artifacts only (the finalize stage).
    async fn cleanup_run(&self, prepared: &PreparedRun, succeeded: bool) {
        if let Some(workspace) = &prepared.skill_workspace {
            let _ = skills::deactivate(workspace);
        }
        if succeeded {
            let run_root = prepared.run_root.clone();
            let _ = tokio::task::spawn_blocking(move || std::fs::remove_dir_all(&run_root)).await;
        }
    }

    async fn write_artifact(&self, job_id: &Id, name: &str, content: &[u8], content_type: &str) -> Result<(), TypedError> {
        let data_dir = self.config.data_dir.clone();
        let job_id_for_write = job_id.clone();
        let name_for_write = name.to_string();
        let content = content.to_vec();
        let (path, _checksum, size_bytes) = tokio::task::spawn_blocking(move || {
            artifacts::write_artifact(&data_dir, &job_id_for_write, &name_for_write, &content)
        })
        .await
        .map_err(|e| TypedError::new(ErrorKind::Transient, format!("artifact write task panicked: {e}")))?
        .map_err(|e| TypedError::new(ErrorKind::Transient, format!("artifact write failed: {e}")))?;

        let artifact = Artifact {
            id: Id::new(),
            job_id: job_id.clone(),
            name: name.to_string(),
            size_bytes,
            content_type: content_type.to_string(),
            created_at: Utc::now(),
            storage_ref: path.to_string_lossy().to_string(),
        };
        self.queue.insert_artifact(&artifact).await.map_err(|e| TypedError::new(ErrorKind::Transient, e.to_string()))?;
        Ok(())
    }
}

fn elapsed_ms(started: chrono::DateTime<Utc>) -> u64 {
    (Utc::now() - started).num_milliseconds().max(0) as u64
}

fn command_on_path(name: &str) -> bool {
    std::process::Command::new("which").arg(name).output().map(|o| o.status.success()).unwrap_or(false)
}

/// Artifacts and identifiers threaded between a task job's prepare, execute,
/// publish, and finalize stages.
struct PreparedRun {
    run_root: PathBuf,
    workspace_root: PathBuf,
    working_branch: String,
    base_branch: String,
    skill_workspace: Option<skills::RunSkillWorkspace>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_on_path_finds_sh() {
        assert!(command_on_path("sh"));
    }

    #[test]
    fn command_on_path_rejects_nonsense() {
        assert!(!command_on_path("definitely-not-a-real-binary-xyz"));
    }
}
