//! Deterministic point identifiers for the manifest ingest sub-engine.
//!
//! The same document chunk must resolve to the same point id across runs
//! so re-ingesting an unchanged document is a no-op and a changed document
//! can be deleted-then-upserted by id, never accumulating duplicates.

use sha2::{Digest, Sha256};

/// `sha256(manifest_name | data_source_id | source_doc_id | chunk_index |
/// provider | model)`, framed with a separator byte so no field can bleed
/// into its neighbor.
pub fn compute_point_id(
    manifest_name: &str,
    data_source_id: &str,
    source_doc_id: &str,
    chunk_index: u64,
    provider: &str,
    model: &str,
) -> String {
    let mut hasher = Sha256::new();
    for field in [manifest_name, data_source_id, source_doc_id] {
        hasher.update(field.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(chunk_index.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(provider.as_bytes());
    hasher.update(b"\0");
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())
}
