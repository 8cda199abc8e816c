//! Skills materializer and cache: registry resolution, content-addressed
//! verified cache, and per-run activation on top of SKILL.md
//! discovery/parsing.

mod activate;
mod cache;
mod catalog;
mod metrics;
pub mod registry;

pub use activate::{activate, deactivate, ActivationError, RunSkillWorkspace};
pub use cache::{fetch_and_verify, CacheError, NoopVerifier, SignatureVerifier, SkillCacheRecord};
pub use catalog::{discover_skills, DiscoveryError, DiscoveryResult};
pub use metrics::SkillsMetrics;
pub use registry::{ArtifactSource, RegisteredSkill, RegistryError};
