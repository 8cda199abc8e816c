pub mod artifacts;
pub mod config;
pub mod errors;
pub mod events;
pub mod prompt;
pub mod skills;
pub mod types;

pub use artifacts::{artifact_path, read_artifact, write_artifact, ArtifactError};
pub use config::Config;
pub use errors::{ErrorKind, TypedError};
pub use prompt::sanitize_branch_name;
pub use types::{
    Artifact, Event, Id, Job, JobOutcome, JobPayload, JobStatus, JobSubmission, ManifestAction,
    ManifestOptions, ManifestPayload, ManifestSource, ManifestStage, PauseMode, Proposal,
    ProposalOrigin, ProposalStatus, PublishMode, RequiredCapabilities, ReviewPriority, Stage,
    SkillsPolicyMode, TaskGit, TaskPayload, TaskPublish, TaskRuntime, TaskSkillRef, TaskStep,
};
