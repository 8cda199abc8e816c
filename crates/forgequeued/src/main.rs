//! forgequeued - durable agent job queue daemon
//!
//! Main entry point for the daemon binary.

use clap::Parser;
use forgequeue_core::Config;
use forgequeued::Daemon;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Durable agent job queue daemon: a worker-pool runtime, a skills cache,
/// a manifest ingest sub-engine, and the local HTTP control plane that
/// fronts them.
#[derive(Parser)]
#[command(name = "forgequeued")]
#[command(about = "Durable agent job queue daemon")]
#[command(version)]
struct Cli {
    /// Config file path (overrides .forgequeue/config)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the queue database, skill cache, and artifacts
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Address to bind the HTTP control plane to
    #[arg(long, env = "FORGEQUEUE_BIND_ADDR")]
    bind_addr: Option<String>,

    /// Bearer token required on every HTTP request
    #[arg(long, env = "FORGEQUEUE_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Workspace root that relative config paths resolve against
    #[arg(long, default_value = ".")]
    workspace_root: PathBuf,
}

fn main() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                error!("failed to load config from {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => {
            let mut config = Config::default();
            let dotfile = cli.workspace_root.join(".forgequeue/config");
            if dotfile.exists() {
                if let Err(e) = config.load_file(&dotfile) {
                    error!("failed to load {}: {}", dotfile.display(), e);
                    std::process::exit(1);
                }
            }
            config
        }
    };

    config.resolve_paths(&cli.workspace_root);
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(auth_token) = cli.auth_token {
        config.auth_token = Some(auth_token);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    runtime.block_on(async {
        match Daemon::new(config).await {
            Ok(daemon) => {
                let daemon_ref = &daemon;
                tokio::select! {
                    result = daemon.run() => {
                        if let Err(e) = result {
                            error!("daemon error: {}", e);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("received SIGINT");
                        daemon_ref.shutdown();
                    }
                }
            }
            Err(e) => {
                error!("failed to initialize daemon: {}", e);
                std::process::exit(1);
            }
        }
    });
}
