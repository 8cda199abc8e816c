//! Manifest ingest sub-engine: declarative ingestion of
//! filesystem document sources into a local vector store, with
//! content-addressed chunk ids and checkpointed incremental reruns.

pub mod adapters;
pub mod engine;
pub mod point_id;

pub use engine::{
    get_manifest, upsert_manifest, run_manifest_job, ManifestError, ManifestSummary, ManifestView,
};
