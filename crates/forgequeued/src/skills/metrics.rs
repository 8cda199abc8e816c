//! Skills materializer telemetry counters, read by the telemetry endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Atomic counters tracking the skills pipeline's
/// `pending -> resolving -> fetching -> verifying -> activating -> ready|failed`
/// progression across all runs.
#[derive(Debug, Default)]
pub struct SkillsMetrics {
    /// Skills resolved against the registry/allowlist.
    pub resolved_total: AtomicUsize,
    /// Skills whose cache artifact passed content-hash verification.
    pub verified_total: AtomicUsize,
    /// Skills that failed `sha256(artifact) == registry.content_hash`.
    pub integrity_failed_total: AtomicUsize,
    /// Skills that failed to materialize into `skills_active/`.
    pub activation_failed_total: AtomicUsize,
}

impl SkillsMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_resolved(&self, count: usize) {
        self.resolved_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_verified(&self, count: usize) {
        self.verified_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_integrity_failed(&self) {
        self.integrity_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_activation_failed(&self) {
        self.activation_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_resolved(&self) -> usize {
        self.resolved_total.load(Ordering::Relaxed)
    }

    pub fn get_verified(&self) -> usize {
        self.verified_total.load(Ordering::Relaxed)
    }

    pub fn get_integrity_failed(&self) -> usize {
        self.integrity_failed_total.load(Ordering::Relaxed)
    }

    pub fn get_activation_failed(&self) -> usize {
        self.activation_failed_total.load(Ordering::Relaxed)
    }
}
