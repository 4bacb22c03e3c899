//! Storage trait definitions

use async_trait::async_trait;
use thiserror::Error;

use crate::graph::{Edge, EdgeKind, Node, NodeId, StandardKey};

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Standard not found: {0}")]
    StandardNotFound(String),

    #[error("Invalid edge: {0}")]
    InvalidEdge(String),

    /// Transient failure. `RetryingStore` retries these; everything else
    /// surfaces immediately.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported store url: {0}")]
    UnsupportedUrl(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// What a fingerprint covers.
///
/// Every mutation advances the fingerprints of the scopes it touches.
/// The analysis cache keys on `Graph`; the narrower scopes support
/// targeted freshness checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// All nodes and edges
    Graph,
    /// A standard's sections plus their incident edges
    Standard(StandardKey),
    /// A single node plus its incident edges
    Node(NodeId),
}

/// Trait for graph storage backends
///
/// Implementations must be thread-safe (Send + Sync) to support
/// concurrent access from resolvers, the cache, and workers.
#[async_trait]
pub trait GraphStore: Send + Sync {
    // === Read Operations ===

    /// Load a node by id
    async fn get_node(&self, id: &NodeId) -> StoreResult<Option<Node>>;

    /// All edges incident to a node, both directions, optionally filtered
    /// by kind
    async fn get_edges(&self, id: &NodeId, kinds: Option<&[EdgeKind]>) -> StoreResult<Vec<Edge>>;

    /// All sections belonging to a standard, sorted by node id
    async fn get_standard_sections(&self, key: &StandardKey) -> StoreResult<Vec<Node>>;

    /// Every standard with at least one section, sorted
    async fn list_standards(&self) -> StoreResult<Vec<StandardKey>>;

    /// Bulk read of every node (snapshot load)
    async fn all_nodes(&self) -> StoreResult<Vec<Node>>;

    /// Bulk read of every edge (snapshot load)
    async fn all_edges(&self) -> StoreResult<Vec<Edge>>;

    /// Content fingerprint of the given scope
    async fn fingerprint(&self, scope: &Scope) -> StoreResult<u64>;

    // === Write Operations ===

    /// Insert or update a node. Updating replaces name, text, and links;
    /// the id never changes.
    async fn upsert_node(&self, node: Node) -> StoreResult<()>;

    /// Insert or update an edge. Both endpoints must exist, self-loops are
    /// rejected, and confidence must lie in [0, 1]. Upserting an existing
    /// `(source, target, kind)` triple replaces its confidence.
    async fn upsert_edge(&self, edge: Edge) -> StoreResult<()>;

    /// Delete one edge by its identity triple. Returns whether it existed.
    async fn delete_edge(&self, source: &NodeId, target: &NodeId, kind: EdgeKind)
        -> StoreResult<bool>;

    /// Delete a node and every incident edge. Returns whether it existed.
    async fn delete_node(&self, id: &NodeId) -> StoreResult<bool>;

    /// Delete every section of a standard, cascading their edges.
    /// Returns the number of sections removed; a standard with no
    /// sections does not exist, so that is `StandardNotFound`.
    async fn delete_standard(&self, key: &StandardKey) -> StoreResult<usize>;
}
