//! forgequeuectl - CLI client for forgequeued
//!
//! Local control plane client for the durable job queue / task worker
//! daemon.

mod client;
mod render;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::{Parser, Subcommand};
use client::{Client, ClientError, ClaimRequest, RunManifestRequest};
use forgequeue_core::{JobSubmission, ReviewPriority};
use std::path::PathBuf;

/// CLI client for the forgequeued job queue daemon.
#[derive(Parser)]
#[command(name = "forgequeuectl")]
#[command(about = "Control plane for the forgequeued job queue daemon")]
#[command(version)]
struct Cli {
    /// Daemon address (default: http://127.0.0.1:4730)
    #[arg(long, global = true, env = "FORGEQUEUE_ADDR")]
    addr: Option<String>,

    /// Auth token for daemon API
    #[arg(long, global = true, env = "FORGEQUEUE_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a job from a JSON submission document
    Submit {
        /// Path to a JSON file matching the JobSubmission shape (- for stdin)
        file: PathBuf,
    },

    /// List jobs (optionally filter by status/type)
    List {
        /// Filter by status: queued, running, succeeded, failed, cancelled
        #[arg(long)]
        status: Option<String>,

        /// Filter by job type: task, manifest
        #[arg(long)]
        job_type: Option<String>,

        #[arg(long, default_value_t = 100)]
        limit: i64,
    },

    /// Show detailed information about a job
    Get {
        job_id: String,
    },

    /// Cancel a job
    Cancel {
        job_id: String,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Claim the next eligible job as an external worker process
    Claim {
        /// Worker identifier to record against the claimed job
        worker_id: String,

        /// Capabilities this worker advertises (repeatable)
        #[arg(long = "capability")]
        capabilities: Vec<String>,

        /// Job types this worker will accept (repeatable; default: all)
        #[arg(long = "allowed-type")]
        allowed_types: Vec<String>,

        /// Repositories this worker will accept (repeatable; default: all)
        #[arg(long = "allowed-repository")]
        allowed_repositories: Vec<String>,
    },

    /// List events for a job
    Events {
        job_id: String,

        /// Resume from this event id (exclusive)
        #[arg(long)]
        after: Option<i64>,

        #[arg(long, default_value_t = 200)]
        limit: i64,
    },

    /// Stream live events for a job until it reaches a terminal status
    Tail {
        job_id: String,
    },

    /// List artifacts for a job
    Artifacts {
        job_id: String,
    },

    /// Download an artifact to a local file
    ArtifactGet {
        job_id: String,
        artifact_id: String,

        /// Destination path (default: the artifact's recorded name)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show worker-pause status
    PauseStatus,

    /// Pause workers (stop claiming new jobs)
    Pause {
        reason: String,

        /// drain (finish running jobs) or quiesce (stop immediately)
        #[arg(long)]
        mode: Option<String>,
    },

    /// Resume paused workers
    Resume {
        reason: String,

        /// Required unless the queue is already drained
        #[arg(long)]
        force: bool,
    },

    /// List follow-up proposals
    Proposals {
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        repository: Option<String>,

        #[arg(long)]
        include_snoozed: bool,
    },

    /// Show a single proposal
    ProposalGet {
        proposal_id: String,
    },

    /// Promote a proposal into a queued job
    ProposalPromote {
        proposal_id: String,
    },

    /// Dismiss a proposal
    ProposalDismiss {
        proposal_id: String,

        #[arg(long)]
        note: Option<String>,
    },

    /// Change a proposal's review priority
    ProposalPriority {
        proposal_id: String,

        /// low, normal, high, or urgent
        #[arg(value_parser = parse_review_priority)]
        priority: ReviewPriority,
    },

    /// Clear a proposal's snooze so it is visible again
    ProposalUnsnooze {
        proposal_id: String,
    },

    /// Upsert a manifest's YAML definition
    ManifestPut {
        name: String,

        /// Path to the manifest YAML file (- for stdin)
        file: PathBuf,
    },

    /// Show a manifest's stored definition and checkpoints
    ManifestGet {
        name: String,
    },

    /// Submit a job that runs a registered manifest
    ManifestRun {
        name: String,

        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        force_full: bool,

        #[arg(long)]
        max_docs: Option<u64>,

        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
}

fn parse_review_priority(s: &str) -> Result<ReviewPriority, String> {
    match s.to_lowercase().as_str() {
        "low" => Ok(ReviewPriority::Low),
        "normal" => Ok(ReviewPriority::Normal),
        "high" => Ok(ReviewPriority::High),
        "urgent" => Ok(ReviewPriority::Urgent),
        _ => Err(format!("invalid priority '{}', expected: low, normal, high, urgent", s)),
    }
}

fn read_input(path: &std::path::Path) -> Result<String, ClientError> {
    if path.as_os_str() == "-" {
        use std::io::Read;
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).map_err(|e| ClientError::IoError(e.to_string()))?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).map_err(|e| ClientError::IoError(format!("{}: {}", path.display(), e)))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let addr = cli.addr.unwrap_or_else(|| "http://127.0.0.1:4730".to_string());
    let client = Client::new(&addr, cli.token.as_deref());

    // Every subcommand here talks to the daemon; there is no offline path.
    if let Err(e) = client.wait_for_ready().await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }

    let result = run(&client, cli.command).await;

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(client: &Client, command: Command) -> Result<(), ClientError> {
    match command {
        Command::Submit { file } => {
            let content = read_input(&file)?;
            let submission: JobSubmission =
                serde_json::from_str(&content).map_err(|e| ClientError::InvalidOperation(format!("invalid job submission: {e}")))?;
            let job = client.submit_job(&submission).await?;
            render::print_job_created(&job);
            Ok(())
        }
        Command::List { status, job_type, limit } => {
            let jobs = client.list_jobs(status.as_deref(), job_type.as_deref(), Some(limit)).await?;
            render::print_job_list(&jobs);
            Ok(())
        }
        Command::Get { job_id } => {
            let job = client.get_job(&job_id).await?;
            render::print_job_details(&job);
            Ok(())
        }
        Command::Cancel { job_id, reason } => {
            client.cancel_job(&job_id, reason.as_deref()).await?;
            println!("Job {} cancellation requested", job_id);
            Ok(())
        }
        Command::Claim { worker_id, capabilities, allowed_types, allowed_repositories } => {
            let req = ClaimRequest {
                worker_id,
                advertised_capabilities: capabilities.into_iter().collect(),
                allowed_types: if allowed_types.is_empty() { None } else { Some(allowed_types) },
                allowed_repositories: if allowed_repositories.is_empty() { None } else { Some(allowed_repositories) },
            };
            match client.claim_job(&req).await? {
                Some(job) => render::print_job_details(&job),
                None => println!("No eligible job to claim"),
            }
            Ok(())
        }
        Command::Events { job_id, after, limit } => {
            let events = client.list_events(&job_id, after, Some(limit)).await?;
            render::print_event_list(&events);
            Ok(())
        }
        Command::Tail { job_id } => client.tail_events(&job_id).await,
        Command::Artifacts { job_id } => {
            let artifacts = client.list_artifacts(&job_id).await?;
            render::print_artifact_list(&artifacts);
            Ok(())
        }
        Command::ArtifactGet { job_id, artifact_id, out } => {
            let artifacts = client.list_artifacts(&job_id).await?;
            let artifact = artifacts
                .iter()
                .find(|a| a.id.0 == artifact_id)
                .ok_or_else(|| ClientError::NotFound(format!("artifact {artifact_id} on job {job_id}")))?;
            let dest = out.unwrap_or_else(|| PathBuf::from(&artifact.name));
            client.download_artifact(&job_id, &artifact_id, &dest).await?;
            println!("Wrote {}", dest.display());
            Ok(())
        }
        Command::PauseStatus => {
            let status = client.get_worker_pause().await?;
            render::print_worker_pause(&status);
            Ok(())
        }
        Command::Pause { reason, mode } => {
            let status = client.pause_workers(mode.as_deref(), &reason).await?;
            render::print_worker_pause(&status);
            Ok(())
        }
        Command::Resume { reason, force } => {
            let status = client.resume_workers(&reason, force).await?;
            render::print_worker_pause(&status);
            Ok(())
        }
        Command::Proposals { status, repository, include_snoozed } => {
            let proposals = client.list_proposals(status.as_deref(), repository.as_deref(), include_snoozed).await?;
            render::print_proposal_list(&proposals);
            Ok(())
        }
        Command::ProposalGet { proposal_id } => {
            let proposal = client.get_proposal(&proposal_id).await?;
            render::print_proposal_details(&proposal);
            Ok(())
        }
        Command::ProposalPromote { proposal_id } => {
            let job = client.promote_proposal(&proposal_id).await?;
            println!("Promoted proposal {} to job {}", proposal_id, job.id);
            render::print_job_details(&job);
            Ok(())
        }
        Command::ProposalDismiss { proposal_id, note } => {
            client.dismiss_proposal(&proposal_id, note.as_deref()).await?;
            println!("Proposal {} dismissed", proposal_id);
            Ok(())
        }
        Command::ProposalPriority { proposal_id, priority } => {
            client.set_proposal_priority(&proposal_id, priority).await?;
            println!("Proposal {} priority set to {}", proposal_id, priority.as_str());
            Ok(())
        }
        Command::ProposalUnsnooze { proposal_id } => {
            client.unsnooze_proposal(&proposal_id).await?;
            println!("Proposal {} unsnoozed", proposal_id);
            Ok(())
        }
        Command::ManifestPut { name, file } => {
            let yaml = read_input(&file)?;
            let summary = client.put_manifest(&name, &yaml).await?;
            println!("Manifest {} stored (hash {})", summary.name, summary.content_hash);
            Ok(())
        }
        Command::ManifestGet { name } => {
            let view = client.get_manifest(&name).await?;
            render::print_manifest_view(&view);
            Ok(())
        }
        Command::ManifestRun { name, dry_run, force_full, max_docs, priority } => {
            let req = RunManifestRequest { dry_run, force_full, max_docs, priority };
            let job = client.run_manifest(&name, &req).await?;
            println!("Submitted manifest run for {} as job {}", name, job.id);
            render::print_job_details(&job);
            Ok(())
        }
    }
}
