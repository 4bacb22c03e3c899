//! Graph persistence layer
//!
//! Two interchangeable backends behind the [`GraphStore`] trait: an
//! in-memory store for tests and ephemeral work, and a SQLite store for
//! durable catalogs. [`RetryingStore`] wraps either one with backoff on
//! transient failures.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::graph::{Edge, Node};

pub mod memory;
pub mod retry;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStore;
pub use retry::{RetryPolicy, RetryingStore};
pub use sqlite::SqliteStore;
pub use traits::{GraphStore, Scope, StoreError, StoreResult};

/// Open a store from a URL.
///
/// Supported schemes:
/// - `memory:` for an empty in-memory store
/// - `sqlite:<path>` for a SQLite file (created if absent)
pub fn open_store(url: &str) -> StoreResult<Arc<dyn GraphStore>> {
    if url == "memory:" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    if let Some(path) = url.strip_prefix("sqlite:") {
        return Ok(Arc::new(SqliteStore::open(path)?));
    }
    Err(StoreError::UnsupportedUrl(url.to_string()))
}

/// Shared edge validation for all backends.
///
/// Self-loops are rejected, and confidence must be a value in
/// [0.0, 1.0]. NaN fails the range check.
pub(crate) fn validate_edge(edge: &Edge) -> StoreResult<()> {
    if edge.source == edge.target {
        return Err(StoreError::InvalidEdge(format!(
            "Self-loop on node '{}'",
            edge.source
        )));
    }
    if !(0.0..=1.0).contains(&edge.confidence) {
        return Err(StoreError::InvalidEdge(format!(
            "Confidence {} outside [0.0, 1.0] for edge '{}'",
            edge.confidence,
            edge.resource_id()
        )));
    }
    Ok(())
}

/// Hash graph content to a fingerprint that is stable under input
/// ordering. Both backends feed this the same logical content, so the
/// fingerprint agrees across them and cached analyses survive a
/// migration from one backend to the other.
pub(crate) fn content_fingerprint(nodes: &[Node], edges: &[Edge]) -> u64 {
    let mut node_refs: Vec<&Node> = nodes.iter().collect();
    node_refs.sort_by(|a, b| a.id.cmp(&b.id));
    let mut edge_refs: Vec<&Edge> = edges.iter().collect();
    edge_refs.sort_by(|a, b| {
        (a.source.as_str(), a.kind.as_str(), a.target.as_str()).cmp(&(
            b.source.as_str(),
            b.kind.as_str(),
            b.target.as_str(),
        ))
    });

    let mut hasher = DefaultHasher::new();
    for node in node_refs {
        node.id.as_str().hash(&mut hasher);
        node.kind.as_str().hash(&mut hasher);
        node.name.hash(&mut hasher);
        node.text.hash(&mut hasher);
        node.hyperlinks.hash(&mut hasher);
        node.standard.hash(&mut hasher);
    }
    for edge in edge_refs {
        edge.source.as_str().hash(&mut hasher);
        edge.kind.as_str().hash(&mut hasher);
        edge.target.as_str().hash(&mut hasher);
        edge.confidence.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}
