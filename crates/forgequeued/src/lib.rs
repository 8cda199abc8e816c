//! forgequeued — durable agent job queue daemon.
//!
//! Library components for the daemon process: the queue store, the task
//! worker runtime, the skills materializer, the manifest ingest
//! sub-engine, the proposal queue, and the HTTP control plane.

pub mod git;
pub mod manifest;
pub mod pause;
pub mod pr;
pub mod proposals;
pub mod queue;
pub mod server;
pub mod skills;
pub mod storage;
pub mod worker;

use std::collections::BTreeSet;
use std::sync::Arc;

use forgequeue_core::Config;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pause::PauseGate;
use queue::QueueService;
use skills::SkillsMetrics;
use storage::Storage;
use worker::{WorkerConfig, WorkerLoop};

/// Type alias for application-level errors with context and backtraces.
pub type AppResult<T> = eyre::Result<T>;

/// The assembled daemon: queue store, worker-pause gate, skills metrics,
/// and the embedded worker loop(s) it spawns at startup.
pub struct Daemon {
    config: Config,
    storage: Arc<Storage>,
    queue: Arc<QueueService>,
    pause_gate: Arc<PauseGate>,
    skills_metrics: Arc<SkillsMetrics>,
    worker_handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Daemon {
    /// Construct the daemon: open (and migrate) the SQLite store, wire the
    /// pause gate and queue service, and sync the configured skill
    /// directories into the registry when `skills_sync_on_start` is set.
    pub async fn new(config: Config) -> AppResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db_path = config.data_dir.join("forgequeue.db");
        let storage = Storage::new(&db_path).await?;
        storage.migrate_embedded().await?;
        let storage = Arc::new(storage);

        let pause_gate =
            Arc::new(PauseGate::with_default_mode(Arc::clone(&storage), config.worker_pause_default_mode));
        let queue = Arc::new(QueueService::new(
            Arc::clone(&storage),
            Arc::clone(&pause_gate),
            config.lease_ttl_secs,
        ));
        let skills_metrics = Arc::new(SkillsMetrics::new());

        if config.skills_sync_on_start {
            if let Err(e) = sync_skills(&storage, &config).await {
                warn!(error = %e, "skill directory sync failed at startup");
            }
        }

        Ok(Self {
            config,
            storage,
            queue,
            pause_gate,
            skills_metrics,
            worker_handles: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn queue(&self) -> &Arc<QueueService> {
        &self.queue
    }

    pub fn pause_gate(&self) -> &Arc<PauseGate> {
        &self.pause_gate
    }

    pub fn skills_metrics(&self) -> &Arc<SkillsMetrics> {
        &self.skills_metrics
    }

    /// Run the daemon: spawn the lease reaper, the embedded worker loop(s),
    /// and serve the HTTP control plane until the process is signalled to
    /// stop. Returns once the HTTP server task exits.
    pub async fn run(&self) -> AppResult<()> {
        info!(bind_addr = %self.config.bind_addr, data_dir = %self.config.data_dir.display(), "forgequeued starting");

        self.queue.spawn_lease_reaper(self.config.lease_reap_interval_secs);

        let worker_count = worker_count_from_env();
        for idx in 0..worker_count {
            let worker_config = WorkerConfig::from_env(&self.config, idx);
            let worker = WorkerLoop::new(
                Arc::clone(&self.queue),
                Arc::clone(&self.storage),
                Arc::clone(&self.skills_metrics),
                worker_config,
            );
            let handle = tokio::spawn(async move { worker.run().await });
            self.worker_handles.lock().push(handle);
        }
        info!(count = worker_count, "embedded worker loop(s) started");

        server::start_server(
            Arc::clone(&self.storage),
            Arc::clone(&self.queue),
            Arc::clone(&self.pause_gate),
            self.config.bind_addr.clone(),
            self.config.auth_token.clone(),
        )
        .await
        .map_err(|e| eyre::eyre!("HTTP server error: {e}"))?;

        Ok(())
    }

    /// Request a graceful shutdown: closes the claim gate for every
    /// embedded worker loop. In-flight jobs are allowed to finish; no new
    /// job is claimed.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

/// Number of embedded worker loops to run in-process, from
/// `FORGEQUEUE_WORKER_COUNT` (default 1; 0 runs the control plane only).
fn worker_count_from_env() -> usize {
    std::env::var("FORGEQUEUE_WORKER_COUNT").ok().and_then(|v| v.parse().ok()).unwrap_or(1)
}

/// Discover skills from the configured directories and register each one
/// under a synthetic `latest` version, content-addressed by a hash of its
/// `SKILL.md` body (registry entries name a
/// `contentHash` the cache fetches and verifies against).
async fn sync_skills(storage: &Storage, config: &Config) -> Result<(), skills::registry::RegistryError> {
    let discovery = skills::discover_skills(config, &config.data_dir);
    for err in &discovery.errors {
        warn!(skill = %err.name, path = %err.path.display(), error = ?err.error, "skipped invalid skill");
    }

    for skill in &discovery.skills {
        let skill_md = skill.path.join("SKILL.md");
        let Ok(body) = std::fs::read(&skill_md) else { continue };
        let mut hasher = Sha256::new();
        hasher.update(&body);
        let content_hash = format!("{:x}", hasher.finalize());

        skills::registry::register(
            storage,
            &skill.name,
            "latest",
            &content_hash,
            &format!("local_mirror:{}", skill.path.display()),
            None,
        )
        .await?;
    }

    info!(count = discovery.skills.len(), "synced skills into registry");
    Ok(())
}

/// Advertised capabilities plus the fixed `task`/`manifest` type set a
/// freshly started worker allows, unless overridden by environment.
pub fn default_allowed_types() -> Vec<String> {
    vec!["task".to_string(), "manifest".to_string()]
}

pub fn capabilities_from_csv(value: &str) -> BTreeSet<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}
