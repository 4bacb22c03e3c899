//! Analysis engine
//!
//! Ties the store, resolver and cache together behind one API. Every
//! analysis goes through the cache with a fingerprint check, so callers
//! never see results computed against a graph that has since changed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::{AnalysisCache, CacheError, Lookup, PutOutcome};
use crate::embed::{Embedder, EmbeddingError, RelatedEdgeProposer};
use crate::graph::{EdgeKind, GraphSnapshot, NodeId, StandardKey};
use crate::jobs::{Job, JobReport, QueueError};
use crate::resolve::{MapAnalysisResult, PairKey, PathResolver, ResolveConfig, ResolveError};
use crate::store::{GraphStore, RetryPolicy, RetryingStore, Scope, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("Analysis for pair '{pair}' failed: {source}")]
    ComputeFailed {
        pair: PairKey,
        #[source]
        source: StoreError,
    },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),
}

/// Engine-wide configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub resolve: ResolveConfig,
    pub retry: RetryPolicy,
    /// Concurrent pair resolutions during bulk precomputation
    pub max_concurrent_resolutions: usize,
    /// Similarity threshold for proposed related edges
    pub related_similarity_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolve: ResolveConfig::default(),
            retry: RetryPolicy::default(),
            max_concurrent_resolutions: 8,
            related_similarity_threshold: RelatedEdgeProposer::DEFAULT_THRESHOLD,
        }
    }
}

impl EngineConfig {
    pub fn with_resolve(mut self, resolve: ResolveConfig) -> Self {
        self.resolve = resolve;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent_resolutions(mut self, limit: usize) -> Self {
        self.max_concurrent_resolutions = limit;
        self
    }

    pub fn with_related_similarity_threshold(mut self, threshold: f32) -> Self {
        self.related_similarity_threshold = threshold;
        self
    }
}

/// Per-pair outcome of a bulk precomputation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    /// Cached result was already current
    Fresh,
    Computed,
    /// Graph changed mid-computation, result discarded
    SkippedStale,
    Failed(String),
}

impl fmt::Display for PairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Computed => write!(f, "computed"),
            Self::SkippedStale => write!(f, "skipped (graph changed)"),
            Self::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

/// What a bulk precomputation did, pair by pair
#[derive(Debug, Clone, Default)]
pub struct PrecomputeSummary {
    pub computed: usize,
    pub fresh: usize,
    pub skipped_stale: usize,
    pub failed: usize,
    /// Sorted by pair
    pub outcomes: Vec<(PairKey, PairOutcome)>,
}

impl PrecomputeSummary {
    fn record(&mut self, pair: PairKey, outcome: PairOutcome) {
        match &outcome {
            PairOutcome::Fresh => self.fresh += 1,
            PairOutcome::Computed => self.computed += 1,
            PairOutcome::SkippedStale => self.skipped_stale += 1,
            PairOutcome::Failed(_) => self.failed += 1,
        }
        self.outcomes.push((pair, outcome));
    }

    pub fn pairs(&self) -> usize {
        self.outcomes.len()
    }
}

/// What a resource deletion removed
#[derive(Debug, Clone)]
pub enum DeletedResource {
    Edge { resource_id: String },
    Node { id: NodeId },
    Standard { key: StandardKey, sections: usize },
}

impl fmt::Display for DeletedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Edge { resource_id } => write!(f, "edge {resource_id}"),
            Self::Node { id } => write!(f, "node {id}"),
            Self::Standard { key, sections } => {
                write!(f, "standard {key} ({sections} sections)")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeleteReport {
    pub deleted: DeletedResource,
    pub analyses_invalidated: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct MirrorReport {
    pub nodes: usize,
    pub edges: usize,
}

/// Gap overview for one standard pair: how many mappings exist and
/// which sections on each side appear in none of them
#[derive(Debug, Clone)]
pub struct GapReport {
    pub pair: PairKey,
    pub mappings: usize,
    /// Unmatched sections of the pair's lesser standard
    pub unmatched_left: Vec<NodeId>,
    /// Unmatched sections of the pair's greater standard
    pub unmatched_right: Vec<NodeId>,
}

/// Gap and map analysis over one graph store.
///
/// The store handed in is wrapped with retry-on-unavailable before
/// use; transient backend failures are absorbed up to the configured
/// attempt budget and only then surface as errors.
pub struct CrosswalkEngine {
    store: Arc<dyn GraphStore>,
    cache: AnalysisCache,
    resolver: PathResolver,
    config: EngineConfig,
}

impl CrosswalkEngine {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn GraphStore>, config: EngineConfig) -> Self {
        let store: Arc<dyn GraphStore> = Arc::new(RetryingStore::new(store, config.retry));
        Self {
            store,
            cache: AnalysisCache::new(),
            resolver: PathResolver::new(config.resolve),
            config,
        }
    }

    /// Replace the default in-memory cache, e.g. with a persistent one
    pub fn with_cache(mut self, cache: AnalysisCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Analyze one pair of standards, served from cache when current.
    ///
    /// A cached result is returned only if its fingerprint matches the
    /// live graph; anything else triggers a recomputation. The pair is
    /// unordered, and a standard may be paired with itself.
    pub async fn analyze(
        &self,
        a: &StandardKey,
        b: &StandardKey,
    ) -> Result<MapAnalysisResult, EngineError> {
        let pair = PairKey::new(a.clone(), b.clone());
        match self.analyze_inner(&pair).await {
            Err(EngineError::Store(source @ StoreError::Unavailable(_))) => {
                Err(EngineError::ComputeFailed { pair, source })
            }
            other => other,
        }
    }

    async fn analyze_inner(&self, pair: &PairKey) -> Result<MapAnalysisResult, EngineError> {
        let fingerprint = self.store.fingerprint(&Scope::Graph).await?;
        match self.cache.lookup(pair, fingerprint) {
            Lookup::Hit(result) => {
                tracing::debug!(%pair, "analysis served from cache");
                return Ok(result);
            }
            Lookup::Stale(_) => {
                tracing::debug!(%pair, "cached analysis stale, recomputing");
            }
            Lookup::Miss => {}
        }

        // Resolve in the pair's normalized order so both argument
        // orders produce the identical result.
        let snapshot = GraphSnapshot::load(self.store.as_ref()).await?;
        let result = self.resolver.resolve(&snapshot, pair.a(), pair.b())?;
        self.store_result(result).await
    }

    /// Cache a fresh result, tolerating writers racing on the same pair
    async fn store_result(
        &self,
        result: MapAnalysisResult,
    ) -> Result<MapAnalysisResult, EngineError> {
        let current = self.store.fingerprint(&Scope::Graph).await?;
        match self.cache.try_put(result.clone(), current)? {
            PutOutcome::Stored | PutOutcome::StaleSkipped => Ok(result),
            PutOutcome::Conflict => {
                let refreshed = self.store.fingerprint(&Scope::Graph).await?;
                match self.cache.try_put(result.clone(), refreshed)? {
                    PutOutcome::Conflict => {
                        Err(CacheError::WriteConflict(result.pair.clone()).into())
                    }
                    _ => Ok(result),
                }
            }
        }
    }

    /// Precompute analyses for every unordered pair of the given
    /// standards, or of all known standards when `None`.
    ///
    /// Pairs run concurrently up to the configured limit against one
    /// shared snapshot. A failing pair is reported in the summary and
    /// never aborts the rest of the batch.
    pub async fn precompute_all(
        &self,
        standards: Option<Vec<StandardKey>>,
    ) -> Result<PrecomputeSummary, EngineError> {
        let mut standards = match standards {
            Some(list) if !list.is_empty() => list,
            _ => self.store.list_standards().await?,
        };
        standards.sort();
        standards.dedup();

        let snapshot = Arc::new(GraphSnapshot::load(self.store.as_ref()).await?);
        let base_fingerprint = snapshot.fingerprint();

        let mut summary = PrecomputeSummary::default();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_resolutions.max(1)));
        let mut tasks: JoinSet<(PairKey, Result<MapAnalysisResult, ResolveError>)> =
            JoinSet::new();

        for i in 0..standards.len() {
            for j in (i + 1)..standards.len() {
                let a = standards[i].clone();
                let b = standards[j].clone();
                let pair = PairKey::new(a.clone(), b.clone());

                if let Lookup::Hit(_) = self.cache.lookup(&pair, base_fingerprint) {
                    summary.record(pair, PairOutcome::Fresh);
                    continue;
                }

                let resolver = self.resolver.clone();
                let snapshot = Arc::clone(&snapshot);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return (
                                pair,
                                Err(ResolveError::Store(StoreError::Unavailable(
                                    "resolution limiter closed".to_string(),
                                ))),
                            )
                        }
                    };
                    let outcome = resolver.resolve(&snapshot, &a, &b);
                    (pair, outcome)
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((pair, Ok(result))) => {
                    let outcome = self.put_precomputed(result).await;
                    summary.record(pair, outcome);
                }
                Ok((pair, Err(err))) => {
                    tracing::warn!(%pair, error = %err, "pair resolution failed");
                    summary.record(pair, PairOutcome::Failed(err.to_string()));
                }
                Err(join_err) => {
                    tracing::warn!(error = %join_err, "resolution task aborted");
                    summary.failed += 1;
                }
            }
        }

        summary.outcomes.sort_by(|x, y| x.0.cmp(&y.0));
        tracing::info!(
            pairs = summary.pairs(),
            computed = summary.computed,
            fresh = summary.fresh,
            failed = summary.failed,
            "precomputation finished"
        );
        Ok(summary)
    }

    async fn put_precomputed(&self, result: MapAnalysisResult) -> PairOutcome {
        let current = match self.store.fingerprint(&Scope::Graph).await {
            Ok(fp) => fp,
            Err(err) => return PairOutcome::Failed(err.to_string()),
        };
        match self.cache.try_put(result.clone(), current) {
            Ok(PutOutcome::Stored) => PairOutcome::Computed,
            Ok(PutOutcome::StaleSkipped) => PairOutcome::SkippedStale,
            Ok(PutOutcome::Conflict) => {
                let refreshed = match self.store.fingerprint(&Scope::Graph).await {
                    Ok(fp) => fp,
                    Err(err) => return PairOutcome::Failed(err.to_string()),
                };
                match self.cache.try_put(result, refreshed) {
                    Ok(PutOutcome::Stored) => PairOutcome::Computed,
                    Ok(PutOutcome::StaleSkipped) => PairOutcome::SkippedStale,
                    Ok(PutOutcome::Conflict) => {
                        PairOutcome::Failed("cache write conflict".to_string())
                    }
                    Err(err) => PairOutcome::Failed(err.to_string()),
                }
            }
            Err(err) => PairOutcome::Failed(err.to_string()),
        }
    }

    /// Drop cached analyses depending on a resource, without touching
    /// the graph. Returns how many were removed.
    pub fn invalidate_resource(&self, resource: &str) -> usize {
        self.cache.invalidate_resource(resource)
    }

    /// Delete a graph resource and every cached analysis that depends
    /// on it.
    ///
    /// The resource string is tried as an edge id (`source|kind|target`),
    /// then as a node id, then as a standard key.
    pub async fn delete_resource(&self, resource: &str) -> Result<DeleteReport, EngineError> {
        let deleted = self.delete_graph_resource(resource).await?;
        let analyses_invalidated = self.cache.invalidate_resource(resource);
        tracing::info!(resource, analyses = analyses_invalidated, %deleted, "deleted resource");
        Ok(DeleteReport {
            deleted,
            analyses_invalidated,
        })
    }

    async fn delete_graph_resource(&self, resource: &str) -> Result<DeletedResource, EngineError> {
        if resource.contains('|') {
            let mut parts = resource.splitn(3, '|');
            if let (Some(source), Some(kind), Some(target)) =
                (parts.next(), parts.next(), parts.next())
            {
                if let Some(kind) = EdgeKind::parse(kind) {
                    let source = NodeId::from(source);
                    let target = NodeId::from(target);
                    if self.store.delete_edge(&source, &target, kind).await? {
                        return Ok(DeletedResource::Edge {
                            resource_id: resource.to_string(),
                        });
                    }
                }
            }
            return Err(EngineError::ResourceNotFound(resource.to_string()));
        }

        let id = NodeId::from(resource);
        if self.store.get_node(&id).await?.is_some() {
            self.store.delete_node(&id).await?;
            return Ok(DeletedResource::Node { id });
        }

        let key = StandardKey::parse(resource);
        match self.store.delete_standard(&key).await {
            Ok(sections) => Ok(DeletedResource::Standard { key, sections }),
            Err(StoreError::StandardNotFound(_)) => {
                Err(EngineError::ResourceNotFound(resource.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Copy the whole graph into another store, nodes before edges so
    /// endpoint checks on the target always pass.
    pub async fn mirror_into(&self, target: &dyn GraphStore) -> Result<MirrorReport, EngineError> {
        let nodes = self.store.all_nodes().await?;
        let edges = self.store.all_edges().await?;
        let report = MirrorReport {
            nodes: nodes.len(),
            edges: edges.len(),
        };
        for node in nodes {
            target.upsert_node(node).await?;
        }
        for edge in edges {
            target.upsert_edge(edge).await?;
        }
        tracing::info!(nodes = report.nodes, edges = report.edges, "mirrored graph");
        Ok(report)
    }

    /// Propose `related` edges from text similarity, using the
    /// configured threshold. Returns the number of edges created.
    pub async fn generate_related_edges(
        &self,
        embedder: &dyn Embedder,
    ) -> Result<usize, EngineError> {
        let proposer = RelatedEdgeProposer::new(self.config.related_similarity_threshold);
        Ok(proposer.run(self.store.as_ref(), embedder).await?)
    }

    /// Analyze a pair and report which sections on each side appear in
    /// no mapping at all.
    pub async fn gap_report(
        &self,
        a: &StandardKey,
        b: &StandardKey,
    ) -> Result<GapReport, EngineError> {
        let result = self.analyze(a, b).await?;

        let mut matched: HashSet<&NodeId> = HashSet::new();
        for mapping in &result.mappings {
            matched.insert(&mapping.source);
            matched.insert(&mapping.target);
        }

        let left_sections = self.store.get_standard_sections(result.pair.a()).await?;
        let right_sections = self.store.get_standard_sections(result.pair.b()).await?;
        let unmatched_left = left_sections
            .iter()
            .filter(|s| !matched.contains(&s.id))
            .map(|s| s.id.clone())
            .collect();
        let unmatched_right = right_sections
            .iter()
            .filter(|s| !matched.contains(&s.id))
            .map(|s| s.id.clone())
            .collect();

        Ok(GapReport {
            pair: result.pair.clone(),
            mappings: result.mappings.len(),
            unmatched_left,
            unmatched_right,
        })
    }

    /// Run one queued job to completion
    pub async fn execute_job(&self, job: &Job) -> Result<JobReport, EngineError> {
        match job {
            Job::PrecomputeAll { standards } => {
                let standards = if standards.is_empty() {
                    None
                } else {
                    Some(standards.clone())
                };
                Ok(JobReport::Precompute(self.precompute_all(standards).await?))
            }
            Job::PrecomputeSingle { a, b } => {
                Ok(JobReport::Pair(Box::new(self.analyze(a, b).await?)))
            }
            Job::DeleteCascade { resource } => {
                Ok(JobReport::Delete(self.delete_resource(resource).await?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};
    use crate::store::MemoryStore;

    fn asvs() -> StandardKey {
        StandardKey::new("ASVS").with_version("4.0")
    }

    fn cwe() -> StandardKey {
        StandardKey::new("CWE")
    }

    async fn seeded_engine() -> CrosswalkEngine {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_node(Node::cre("CRE:170-772", "Authentication"))
            .await
            .unwrap();
        store
            .upsert_node(Node::section("ASVS:V2.1.1", "V2.1.1", asvs()))
            .await
            .unwrap();
        store
            .upsert_node(Node::section("CWE:521", "521", cwe()))
            .await
            .unwrap();
        store
            .upsert_edge(Edge::new("CRE:170-772", "ASVS:V2.1.1", EdgeKind::LinksTo))
            .await
            .unwrap();
        store
            .upsert_edge(Edge::new("CRE:170-772", "CWE:521", EdgeKind::LinksTo))
            .await
            .unwrap();
        CrosswalkEngine::new(store)
    }

    // === Scenario: repeated analyses come from the cache ===

    #[tokio::test]
    async fn test_analyze_serves_cached_result() {
        let engine = seeded_engine().await;

        let first = engine.analyze(&asvs(), &cwe()).await.unwrap();
        let second = engine.analyze(&cwe(), &asvs()).await.unwrap();

        // Identical timestamp proves the second call never recomputed
        assert_eq!(second.computed_at, first.computed_at);
        assert_eq!(engine.cache().len(), 1);
        assert_eq!(first.mappings.len(), 1);
    }

    // === Scenario: a graph change forces recomputation ===

    #[tokio::test]
    async fn test_analyze_recomputes_after_write() {
        let engine = seeded_engine().await;
        let first = engine.analyze(&asvs(), &cwe()).await.unwrap();

        engine
            .store()
            .upsert_node(Node::section("CWE:79", "79", cwe()))
            .await
            .unwrap();
        let second = engine.analyze(&asvs(), &cwe()).await.unwrap();

        assert_ne!(second.fingerprint, first.fingerprint);
        assert_eq!(engine.cache().len(), 1, "stale entry was replaced");
    }

    // === Scenario: deleting resources by id string ===

    #[tokio::test]
    async fn test_delete_resource_forms() {
        let engine = seeded_engine().await;
        engine.analyze(&asvs(), &cwe()).await.unwrap();

        let report = engine
            .delete_resource("CRE:170-772|links-to|CWE:521")
            .await
            .unwrap();
        assert!(matches!(report.deleted, DeletedResource::Edge { .. }));
        assert_eq!(report.analyses_invalidated, 1);

        let report = engine.delete_resource("CRE:170-772").await.unwrap();
        assert!(matches!(report.deleted, DeletedResource::Node { .. }));

        let report = engine.delete_resource("ASVS@4.0").await.unwrap();
        assert!(matches!(
            report.deleted,
            DeletedResource::Standard { sections: 1, .. }
        ));

        let err = engine.delete_resource("ASVS@4.0").await.unwrap_err();
        assert!(matches!(err, EngineError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_mirror_into_copies_everything() {
        let engine = seeded_engine().await;
        let target = MemoryStore::new();

        let report = engine.mirror_into(&target).await.unwrap();
        assert_eq!(report.nodes, 3);
        assert_eq!(report.edges, 2);
        assert_eq!(target.all_nodes().await.unwrap().len(), 3);
        assert_eq!(target.all_edges().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_gap_report_lists_unmatched_sections() {
        let engine = seeded_engine().await;
        engine
            .store()
            .upsert_node(Node::section("CWE:79", "79", cwe()))
            .await
            .unwrap();

        let report = engine.gap_report(&asvs(), &cwe()).await.unwrap();
        assert_eq!(report.mappings, 1);
        assert!(report.unmatched_left.is_empty());
        assert_eq!(report.unmatched_right, vec![NodeId::from("CWE:79")]);
    }
}
