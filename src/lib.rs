//! Crosswalk: gap and map analysis between security standards
//!
//! Security catalogs (ASVS, CWE, NIST 800-53, ...) are loaded into one
//! graph alongside Common Requirement Enumeration (CRE) nodes that tie
//! their sections together. The engine walks that graph to answer how
//! two standards map onto each other, caches each answer against a
//! content fingerprint of the graph, and invalidates precisely when an
//! underlying resource changes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use crosswalk::{CrosswalkEngine, StandardKey, store::MemoryStore};
//!
//! # async fn run() -> Result<(), crosswalk::EngineError> {
//! let engine = CrosswalkEngine::new(Arc::new(MemoryStore::new()));
//! let asvs = StandardKey::new("ASVS").with_version("4.0");
//! let cwe = StandardKey::new("CWE");
//! let analysis = engine.analyze(&asvs, &cwe).await?;
//! for mapping in &analysis.mappings {
//!     println!("{} -> {} ({})", mapping.source, mapping.target, mapping.strength);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod embed;
pub mod engine;
pub mod graph;
pub mod jobs;
pub mod resolve;
pub mod store;

pub use cache::{AnalysisCache, CacheError, Lookup, PutOutcome};
pub use embed::{cosine_similarity, Embedder, EmbeddingError, HashEmbedder, RelatedEdgeProposer};
#[cfg(feature = "embeddings")]
pub use embed::FastEmbedEmbedder;
pub use engine::{
    CrosswalkEngine, DeleteReport, DeletedResource, EngineConfig, EngineError, GapReport,
    MirrorReport, PairOutcome, PrecomputeSummary,
};
pub use graph::{Edge, EdgeKind, GraphSnapshot, Node, NodeId, NodeKind, StandardKey};
pub use jobs::{
    InProcessQueue, Job, JobHandle, JobId, JobReport, JobStatus, PrecomputeCoordinator,
    QueueError, TaskQueue, Worker,
};
pub use resolve::{
    MapAnalysisResult, Mapping, PairKey, PathEdge, PathResolver, ResolveConfig, ResolveError,
    Strength,
};
pub use store::{
    open_store, GraphStore, MemoryStore, RetryPolicy, RetryingStore, Scope, SqliteStore,
    StoreError, StoreResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
