//! Path resolution over a graph snapshot

use std::collections::VecDeque;

use chrono::Utc;
use thiserror::Error;

use super::mapping::{MapAnalysisResult, Mapping, PairKey, PathEdge, Strength};
use crate::graph::{AdjEntry, GraphSnapshot, NodeKind, StandardKey};
use crate::store::StoreError;

/// Errors from path resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Standard not found: {0}")]
    StandardNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tuning knobs for the path walk.
#[derive(Debug, Clone, Copy)]
pub struct ResolveConfig {
    /// Maximum number of edges on a path
    pub max_depth: usize,
    /// Edges below this confidence are not traversed
    pub min_confidence: f32,
    /// Paths below this confidence are classified as weak
    pub weak_confidence: f32,
    /// CREs with more incident edges than this are never expanded
    pub hub_degree_cap: usize,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            min_confidence: 0.5,
            weak_confidence: 0.8,
            hub_degree_cap: 128,
        }
    }
}

impl ResolveConfig {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_weak_confidence(mut self, weak_confidence: f32) -> Self {
        self.weak_confidence = weak_confidence;
        self
    }

    pub fn with_hub_degree_cap(mut self, cap: usize) -> Self {
        self.hub_degree_cap = cap;
        self
    }
}

/// A partial path during the walk, tracked by snapshot index
struct SearchPath {
    nodes: Vec<usize>,
    edges: Vec<PathEdge>,
    confidence: f32,
}

/// Finds every simple path between two standards through the CRE graph.
///
/// Paths start at a section of the first standard, cross edges in
/// either direction, pass only through CREs, and end at the first
/// section of the second standard they reach. Sections of any other
/// standard terminate a branch without producing a mapping, so a
/// result never routes through a third catalog.
#[derive(Debug, Clone)]
pub struct PathResolver {
    config: ResolveConfig,
}

impl PathResolver {
    pub fn new(config: ResolveConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ResolveConfig::default())
    }

    pub fn config(&self) -> &ResolveConfig {
        &self.config
    }

    /// Resolve all mappings between two standards.
    ///
    /// Both standards must have at least one section in the snapshot.
    /// The same pair of standards may be given twice to map sections
    /// of one catalog onto each other.
    ///
    /// Output order is deterministic: fewest hops first, then highest
    /// confidence, then node sequence, then edge kinds.
    pub fn resolve(
        &self,
        snapshot: &GraphSnapshot,
        a: &StandardKey,
        b: &StandardKey,
    ) -> Result<MapAnalysisResult, ResolveError> {
        let starts = snapshot.sections_of(a);
        if starts.is_empty() {
            return Err(ResolveError::StandardNotFound(a.to_string()));
        }
        if snapshot.sections_of(b).is_empty() {
            return Err(ResolveError::StandardNotFound(b.to_string()));
        }

        let mut mappings = Vec::new();
        for &start in starts {
            self.walk_from(snapshot, start, b, &mut mappings);
        }

        mappings.sort_by(|x, y| {
            x.hops()
                .cmp(&y.hops())
                .then_with(|| y.confidence.total_cmp(&x.confidence))
                .then_with(|| x.nodes.cmp(&y.nodes))
                .then_with(|| {
                    let xk: Vec<&str> = x.edges.iter().map(|e| e.kind.as_str()).collect();
                    let yk: Vec<&str> = y.edges.iter().map(|e| e.kind.as_str()).collect();
                    xk.cmp(&yk)
                })
        });

        tracing::debug!(
            pair = %PairKey::new(a.clone(), b.clone()),
            mappings = mappings.len(),
            "resolved standard pair"
        );

        Ok(MapAnalysisResult {
            pair: PairKey::new(a.clone(), b.clone()),
            mappings,
            fingerprint: snapshot.fingerprint(),
            computed_at: Utc::now(),
        })
    }

    /// Breadth-first walk from one start section.
    fn walk_from(
        &self,
        snapshot: &GraphSnapshot,
        start: usize,
        target: &StandardKey,
        out: &mut Vec<Mapping>,
    ) {
        let mut queue = VecDeque::new();
        queue.push_back(SearchPath {
            nodes: vec![start],
            edges: Vec::new(),
            confidence: 1.0,
        });

        while let Some(path) = queue.pop_front() {
            if path.edges.len() >= self.config.max_depth {
                continue;
            }
            let Some(&current) = path.nodes.last() else {
                continue;
            };

            for entry in snapshot.neighbors(current) {
                if entry.confidence < self.config.min_confidence {
                    continue;
                }
                if path.nodes.contains(&entry.neighbor) {
                    continue;
                }

                let node = snapshot.node(entry.neighbor);
                match node.kind {
                    NodeKind::Section => {
                        // Any section ends the branch. Only sections of
                        // the target standard become mappings.
                        if node.standard.as_ref() == Some(target) {
                            out.push(self.complete(snapshot, &path, start, current, entry));
                        }
                    }
                    NodeKind::Cre => {
                        if snapshot.degree(entry.neighbor) > self.config.hub_degree_cap {
                            continue;
                        }
                        if path.edges.len() + 1 >= self.config.max_depth {
                            continue;
                        }
                        let mut nodes = path.nodes.clone();
                        nodes.push(entry.neighbor);
                        let mut edges = path.edges.clone();
                        edges.push(Self::path_edge(snapshot, current, entry));
                        queue.push_back(SearchPath {
                            nodes,
                            edges,
                            confidence: path.confidence.min(entry.confidence),
                        });
                    }
                }
            }
        }
    }

    /// Turn a partial path plus the final step into a mapping
    fn complete(
        &self,
        snapshot: &GraphSnapshot,
        path: &SearchPath,
        start: usize,
        current: usize,
        last: &AdjEntry,
    ) -> Mapping {
        let end = snapshot.node(last.neighbor);

        let mut nodes: Vec<_> = path
            .nodes
            .iter()
            .map(|&i| snapshot.node(i).id.clone())
            .collect();
        nodes.push(end.id.clone());

        let mut edges = path.edges.clone();
        edges.push(Self::path_edge(snapshot, current, last));

        let confidence = path.confidence.min(last.confidence);
        let strength = Strength::classify(
            nodes.len().saturating_sub(2),
            confidence,
            self.config.weak_confidence,
        );

        Mapping {
            source: snapshot.node(start).id.clone(),
            target: end.id.clone(),
            nodes,
            edges,
            confidence,
            strength,
        }
    }

    /// Record a traversed edge in its stored orientation
    fn path_edge(snapshot: &GraphSnapshot, from: usize, entry: &AdjEntry) -> PathEdge {
        let (source, target) = if entry.outbound {
            (from, entry.neighbor)
        } else {
            (entry.neighbor, from)
        };
        PathEdge {
            source: snapshot.node(source).id.clone(),
            target: snapshot.node(target).id.clone(),
            kind: entry.kind,
            confidence: entry.confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, EdgeKind, Node, NodeId};
    use crate::store::{GraphStore, MemoryStore};

    fn asvs() -> StandardKey {
        StandardKey::new("ASVS").with_version("4.0")
    }

    fn cwe() -> StandardKey {
        StandardKey::new("CWE")
    }

    fn nist() -> StandardKey {
        StandardKey::new("NIST-800-53")
    }

    async fn add_cre(store: &MemoryStore, id: &str) {
        store.upsert_node(Node::cre(id, id)).await.unwrap();
    }

    async fn add_section(store: &MemoryStore, id: &str, key: StandardKey) {
        store.upsert_node(Node::section(id, id, key)).await.unwrap();
    }

    async fn link(store: &MemoryStore, source: &str, target: &str, kind: EdgeKind, conf: f32) {
        store
            .upsert_edge(Edge::new(source, target, kind).with_confidence(conf))
            .await
            .unwrap();
    }

    /// ASVS section and CWE section joined by one CRE
    async fn basic_store() -> MemoryStore {
        let store = MemoryStore::new();
        add_cre(&store, "CRE:170-772").await;
        add_section(&store, "ASVS:V2.1.1", asvs()).await;
        add_section(&store, "CWE:521", cwe()).await;
        link(&store, "CRE:170-772", "ASVS:V2.1.1", EdgeKind::LinksTo, 1.0).await;
        link(&store, "CRE:170-772", "CWE:521", EdgeKind::LinksTo, 0.9).await;
        store
    }

    // === Scenario: two sections share a CRE ===

    #[tokio::test]
    async fn test_direct_mapping_through_shared_cre() {
        let store = basic_store().await;
        let snapshot = GraphSnapshot::load(&store).await.unwrap();

        let result = PathResolver::with_defaults()
            .resolve(&snapshot, &asvs(), &cwe())
            .unwrap();

        assert_eq!(result.mappings.len(), 1);
        let mapping = &result.mappings[0];
        assert_eq!(mapping.source, NodeId::from("ASVS:V2.1.1"));
        assert_eq!(mapping.target, NodeId::from("CWE:521"));
        assert_eq!(mapping.hops(), 2);
        assert_eq!(mapping.intermediate_cres(), 1);
        assert_eq!(mapping.strength, Strength::Direct);
        assert!((mapping.confidence - 0.9).abs() < 1e-6);
        assert_eq!(result.fingerprint, snapshot.fingerprint());
    }

    // === Scenario: traversed edges keep their stored orientation ===

    #[tokio::test]
    async fn test_path_edges_match_stored_direction() {
        let store = basic_store().await;
        let snapshot = GraphSnapshot::load(&store).await.unwrap();

        let result = PathResolver::with_defaults()
            .resolve(&snapshot, &asvs(), &cwe())
            .unwrap();

        // First hop crosses CRE->ASVS against its direction, and the
        // recorded edge still reads CRE->ASVS.
        let first = &result.mappings[0].edges[0];
        assert_eq!(first.source, NodeId::from("CRE:170-772"));
        assert_eq!(first.target, NodeId::from("ASVS:V2.1.1"));
        assert_eq!(
            first.resource_id(),
            "CRE:170-772|links-to|ASVS:V2.1.1"
        );
    }

    // === Scenario: a section links to the other standard directly ===

    #[tokio::test]
    async fn test_section_to_section_edge_is_direct() {
        let store = MemoryStore::new();
        add_section(&store, "ASVS:V5.1", asvs()).await;
        add_section(&store, "CWE:89", cwe()).await;
        link(&store, "ASVS:V5.1", "CWE:89", EdgeKind::SameAs, 1.0).await;
        let snapshot = GraphSnapshot::load(&store).await.unwrap();

        let result = PathResolver::with_defaults()
            .resolve(&snapshot, &asvs(), &cwe())
            .unwrap();

        assert_eq!(result.mappings.len(), 1);
        assert_eq!(result.mappings[0].hops(), 1);
        assert_eq!(result.mappings[0].intermediate_cres(), 0);
        assert_eq!(result.mappings[0].strength, Strength::Direct);
    }

    /// Chain: ASVS -- C1 -- C2 -- CWE
    async fn chain_store() -> MemoryStore {
        let store = MemoryStore::new();
        add_section(&store, "ASVS:V1.1", asvs()).await;
        add_section(&store, "CWE:79", cwe()).await;
        add_cre(&store, "CRE:100-100").await;
        add_cre(&store, "CRE:200-200").await;
        link(&store, "CRE:100-100", "ASVS:V1.1", EdgeKind::LinksTo, 1.0).await;
        link(&store, "CRE:100-100", "CRE:200-200", EdgeKind::Related, 0.95).await;
        link(&store, "CRE:200-200", "CWE:79", EdgeKind::LinksTo, 1.0).await;
        store
    }

    #[tokio::test]
    async fn test_two_intermediates_are_indirect() {
        let store = chain_store().await;
        let snapshot = GraphSnapshot::load(&store).await.unwrap();

        let result = PathResolver::with_defaults()
            .resolve(&snapshot, &asvs(), &cwe())
            .unwrap();

        assert_eq!(result.mappings.len(), 1);
        assert_eq!(result.mappings[0].hops(), 3);
        assert_eq!(result.mappings[0].intermediate_cres(), 2);
        assert_eq!(result.mappings[0].strength, Strength::Indirect);
    }

    #[tokio::test]
    async fn test_max_depth_bounds_path_length() {
        let store = chain_store().await;
        let snapshot = GraphSnapshot::load(&store).await.unwrap();

        let tight = PathResolver::new(ResolveConfig::default().with_max_depth(2));
        let result = tight.resolve(&snapshot, &asvs(), &cwe()).unwrap();
        assert!(result.mappings.is_empty(), "three hops exceed a depth of two");

        let wide = PathResolver::new(ResolveConfig::default().with_max_depth(3));
        assert_eq!(wide.resolve(&snapshot, &asvs(), &cwe()).unwrap().mappings.len(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_edges_are_not_traversed() {
        let store = MemoryStore::new();
        add_section(&store, "ASVS:V1.1", asvs()).await;
        add_section(&store, "CWE:79", cwe()).await;
        add_cre(&store, "CRE:100-100").await;
        link(&store, "CRE:100-100", "ASVS:V1.1", EdgeKind::LinksTo, 0.4).await;
        link(&store, "CRE:100-100", "CWE:79", EdgeKind::LinksTo, 1.0).await;
        let snapshot = GraphSnapshot::load(&store).await.unwrap();

        let result = PathResolver::with_defaults()
            .resolve(&snapshot, &asvs(), &cwe())
            .unwrap();
        assert!(result.mappings.is_empty());
    }

    // === Scenario: hub CREs never appear on any path ===

    #[tokio::test]
    async fn test_hub_cre_is_never_expanded() {
        let store = basic_store().await;
        // Third edge pushes the CRE's degree to 3
        add_section(&store, "NIST:AC-1", nist()).await;
        link(&store, "CRE:170-772", "NIST:AC-1", EdgeKind::LinksTo, 1.0).await;
        let snapshot = GraphSnapshot::load(&store).await.unwrap();

        let capped = PathResolver::new(ResolveConfig::default().with_hub_degree_cap(2));
        let result = capped.resolve(&snapshot, &asvs(), &cwe()).unwrap();
        assert!(
            result.mappings.is_empty(),
            "the only route runs through a hub"
        );

        let uncapped = PathResolver::with_defaults();
        assert_eq!(uncapped.resolve(&snapshot, &asvs(), &cwe()).unwrap().mappings.len(), 1);
    }

    // === Scenario: a third standard's sections do not relay paths ===

    #[tokio::test]
    async fn test_interior_sections_terminate_branches() {
        let store = MemoryStore::new();
        add_section(&store, "ASVS:V1.1", asvs()).await;
        add_section(&store, "NIST:AC-1", nist()).await;
        add_section(&store, "CWE:79", cwe()).await;
        add_cre(&store, "CRE:100-100").await;
        add_cre(&store, "CRE:200-200").await;
        link(&store, "CRE:100-100", "ASVS:V1.1", EdgeKind::LinksTo, 1.0).await;
        link(&store, "CRE:100-100", "NIST:AC-1", EdgeKind::LinksTo, 1.0).await;
        link(&store, "CRE:200-200", "NIST:AC-1", EdgeKind::LinksTo, 1.0).await;
        link(&store, "CRE:200-200", "CWE:79", EdgeKind::LinksTo, 1.0).await;
        let snapshot = GraphSnapshot::load(&store).await.unwrap();

        let resolver = PathResolver::with_defaults();
        let via_nist = resolver.resolve(&snapshot, &asvs(), &cwe()).unwrap();
        assert!(
            via_nist.mappings.is_empty(),
            "the NIST section cannot act as a bridge"
        );

        let to_nist = resolver.resolve(&snapshot, &asvs(), &nist()).unwrap();
        assert_eq!(to_nist.mappings.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_standard_is_an_error() {
        let store = basic_store().await;
        let snapshot = GraphSnapshot::load(&store).await.unwrap();
        let resolver = PathResolver::with_defaults();

        let err = resolver
            .resolve(&snapshot, &StandardKey::new("PCI-DSS"), &cwe())
            .unwrap_err();
        assert!(matches!(err, ResolveError::StandardNotFound(name) if name == "PCI-DSS"));

        let err = resolver
            .resolve(&snapshot, &asvs(), &StandardKey::new("PCI-DSS"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::StandardNotFound(_)));
    }

    // === Scenario: several routes between the same standards ===

    #[tokio::test]
    async fn test_output_order_is_hops_then_confidence() {
        let store = basic_store().await;
        // Second, lower-confidence CRE between the same two sections
        add_cre(&store, "CRE:300-300").await;
        link(&store, "CRE:300-300", "ASVS:V2.1.1", EdgeKind::LinksTo, 0.9).await;
        link(&store, "CRE:300-300", "CWE:521", EdgeKind::LinksTo, 0.7).await;
        let snapshot = GraphSnapshot::load(&store).await.unwrap();

        let result = PathResolver::with_defaults()
            .resolve(&snapshot, &asvs(), &cwe())
            .unwrap();

        // Both routes take two hops; the weakest edge breaks the tie
        assert_eq!(result.mappings.len(), 2);
        assert!((result.mappings[0].confidence - 0.9).abs() < 1e-6);
        assert!((result.mappings[1].confidence - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_self_pair_maps_sections_of_one_standard() {
        let store = MemoryStore::new();
        add_section(&store, "ASVS:V2.1.1", asvs()).await;
        add_section(&store, "ASVS:V2.1.2", asvs()).await;
        add_cre(&store, "CRE:100-100").await;
        link(&store, "CRE:100-100", "ASVS:V2.1.1", EdgeKind::LinksTo, 1.0).await;
        link(&store, "CRE:100-100", "ASVS:V2.1.2", EdgeKind::LinksTo, 1.0).await;
        let snapshot = GraphSnapshot::load(&store).await.unwrap();

        let result = PathResolver::with_defaults()
            .resolve(&snapshot, &asvs(), &asvs())
            .unwrap();

        // One path per start section, in both directions
        assert_eq!(result.mappings.len(), 2);
        assert_ne!(result.mappings[0].source, result.mappings[1].source);
    }

    #[tokio::test]
    async fn test_cycles_do_not_loop_forever() {
        let store = MemoryStore::new();
        add_section(&store, "ASVS:V1.1", asvs()).await;
        add_section(&store, "CWE:79", cwe()).await;
        add_cre(&store, "CRE:100-100").await;
        add_cre(&store, "CRE:200-200").await;
        add_cre(&store, "CRE:300-300").await;
        link(&store, "CRE:100-100", "CRE:200-200", EdgeKind::Related, 1.0).await;
        link(&store, "CRE:200-200", "CRE:300-300", EdgeKind::Related, 1.0).await;
        link(&store, "CRE:300-300", "CRE:100-100", EdgeKind::Related, 1.0).await;
        link(&store, "CRE:100-100", "ASVS:V1.1", EdgeKind::LinksTo, 1.0).await;
        link(&store, "CRE:200-200", "CWE:79", EdgeKind::LinksTo, 1.0).await;
        let snapshot = GraphSnapshot::load(&store).await.unwrap();

        let result = PathResolver::with_defaults()
            .resolve(&snapshot, &asvs(), &cwe())
            .unwrap();

        // Short way around and the long way around the triangle
        assert_eq!(result.mappings.len(), 2);
        assert_eq!(result.mappings[0].hops(), 3);
        assert_eq!(result.mappings[1].hops(), 4);
    }
}
