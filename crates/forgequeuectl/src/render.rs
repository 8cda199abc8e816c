//! Output rendering for forgequeuectl.
//!
//! Formats jobs, events, artifacts, proposals, and manifests for
//! terminal display.

use crate::client::{ManifestView, WorkerPauseResponse};
use forgequeue_core::{Artifact, Event, Job, Proposal};

pub fn print_job_created(job: &Job) {
    println!("Created job: {}", job.id);
    println!("  Type:     {}", job.payload.type_name());
    println!("  Status:   {}", job.status.as_str());
    println!("  Priority: {}", job.priority);
}

pub fn print_job_list(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }

    println!("{:<36}  {:<10}  {:<10}  {:<8}  {:<20}", "ID", "TYPE", "STATUS", "ATTEMPT", "CREATED");
    println!("{}", "-".repeat(90));

    for job in jobs {
        println!(
            "{:<36}  {:<10}  {:<10}  {:<8}  {:<20}",
            job.id.0,
            job.payload.type_name(),
            job.status.as_str(),
            format!("{}/{}", job.attempt_count, job.max_attempts),
            format_time(&job.created_at),
        );
    }

    println!();
    println!("{} job(s)", jobs.len());
}

pub fn print_job_details(job: &Job) {
    println!("Job: {}", job.id);
    println!();
    println!("  Type:        {}", job.payload.type_name());
    println!("  Status:      {}", job.status.as_str());
    println!("  Priority:    {}", job.priority);
    println!("  Attempts:    {}/{}", job.attempt_count, job.max_attempts);
    if let Some(repo) = job.payload.repository() {
        println!("  Repository:  {}", repo);
    }
    if !job.required_capabilities.is_empty() {
        println!("  Capabilities: {}", job.required_capabilities.iter().cloned().collect::<Vec<_>>().join(", "));
    }
    if let Some(ref affinity) = job.affinity_key {
        println!("  Affinity:    {}", affinity);
    }
    if let Some(ref worker_id) = job.worker_id {
        println!("  Worker:      {}", worker_id);
    }
    if let Some(ref queue_name) = job.queue_name {
        println!("  Queue:       {}", queue_name);
    }

    println!();
    println!("  Created:     {}", format_time(&job.created_at));
    if let Some(ref started) = job.started_at {
        println!("  Started:     {}", format_time(started));
    }
    if let Some(ref finished) = job.finished_at {
        println!("  Finished:    {}", format_time(finished));
    }
    if let Some(ref lease) = job.lease_expires_at {
        println!("  Lease until: {}", format_time(lease));
    }

    if let Some(ref reason) = job.cancel_reason {
        println!();
        println!("  Cancel reason: {}", reason);
    }
    if let Some(ref error) = job.last_error {
        println!();
        println!("  Last error: {}", error);
    }
}

pub fn print_event_list(events: &[Event]) {
    if events.is_empty() {
        println!("No events found.");
        return;
    }

    for event in events {
        println!("[{}] {} {} - {}", event.id, format_time(&event.created_at), event.level.as_str(), event.message);
    }
}

pub fn print_artifact_list(artifacts: &[Artifact]) {
    if artifacts.is_empty() {
        println!("No artifacts found.");
        return;
    }

    println!("{:<36}  {:<24}  {:<10}  {:<20}", "ID", "NAME", "SIZE", "CREATED");
    println!("{}", "-".repeat(90));

    for artifact in artifacts {
        println!(
            "{:<36}  {:<24}  {:<10}  {:<20}",
            artifact.id.0,
            truncate(&artifact.name, 24),
            artifact.size_bytes,
            format_time(&artifact.created_at),
        );
    }
}

pub fn print_worker_pause(status: &WorkerPauseResponse) {
    println!("Workers paused: {}", status.system.workers_paused);
    println!("  Mode:          {}", status.system.mode);
    if let Some(ref reason) = status.system.reason {
        println!("  Reason:        {}", reason);
    }
    println!("  Version:       {}", status.system.version);
    println!("  Updated:       {}", format_time(&status.system.updated_at));
    println!("  Queued:        {}", status.metrics.queued);
    println!("  Running:       {}", status.metrics.running);
    println!("  Stale running: {}", status.metrics.stale_running);
    println!("  Drained:       {}", status.metrics.is_drained);
    if !status.audit.latest.is_empty() {
        println!("  Recent actions:");
        for entry in &status.audit.latest {
            println!(
                "    {} {} {}",
                format_time(&entry.created_at),
                entry.action,
                entry.reason.as_deref().unwrap_or("")
            );
        }
    }
}

pub fn print_proposal_list(proposals: &[Proposal]) {
    if proposals.is_empty() {
        println!("No proposals found.");
        return;
    }

    println!(
        "{:<36}  {:<10}  {:<20}  {:<10}  {:<24}",
        "ID", "STATUS", "REPOSITORY", "PRIORITY", "CATEGORY"
    );
    println!("{}", "-".repeat(110));

    for proposal in proposals {
        println!(
            "{:<36}  {:<10}  {:<20}  {:<10}  {:<24}",
            proposal.id.0,
            proposal.status.as_str(),
            truncate(&proposal.repository, 20),
            proposal.review_priority.as_str(),
            truncate(&proposal.category, 24),
        );
    }

    println!();
    println!("{} proposal(s)", proposals.len());
}

pub fn print_proposal_details(proposal: &Proposal) {
    println!("Proposal: {}", proposal.id);
    println!();
    println!("  Status:      {}", proposal.status.as_str());
    println!("  Repository:  {}", proposal.repository);
    println!("  Category:    {}", proposal.category);
    println!("  Priority:    {}", proposal.review_priority.as_str());
    if !proposal.tags.is_empty() {
        println!("  Tags:        {}", proposal.tags.join(", "));
    }
    println!("  Origin:      {} ({})", proposal.origin.source, proposal.origin.id);
    if let Some(ref preview) = proposal.task_preview {
        println!();
        println!("  Preview:");
        println!("    {}", preview.replace('\n', "\n    "));
    }
    if let Some(ref until) = proposal.snoozed_until {
        println!();
        println!("  Snoozed until: {}", format_time(until));
    }
    if let Some(ref job_id) = proposal.promoted_job_id {
        println!();
        println!("  Promoted job: {}", job_id);
    }

    println!();
    println!("  Created: {}", format_time(&proposal.created_at));
    println!("  Updated: {}", format_time(&proposal.updated_at));
}

pub fn print_manifest_view(view: &ManifestView) {
    println!("Manifest: {}", view.name);
    println!("  Content hash: {}", view.content_hash);

    if !view.checkpoints.is_empty() {
        println!();
        println!("  Checkpoints:");
        println!("    {:<30}  {:<10}  {:<20}  {:<20}", "SOURCE", "DOCS", "LAST STARTED", "LAST FINISHED");
        for checkpoint in &view.checkpoints {
            println!(
                "    {:<30}  {:<10}  {:<20}  {:<20}",
                truncate(&checkpoint.data_source_id, 30),
                checkpoint.doc_count,
                checkpoint.last_run_started_at.as_ref().map(format_time).unwrap_or_else(|| "-".to_string()),
                checkpoint.last_run_finished_at.as_ref().map(format_time).unwrap_or_else(|| "-".to_string()),
            );
        }
    }
}

fn format_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
