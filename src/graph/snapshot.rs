//! Read-only indexed view of the graph for path resolution

use std::collections::{BTreeMap, HashMap};

use crate::store::{GraphStore, Scope, StoreError};

use super::edge::EdgeKind;
use super::node::{Node, NodeId, NodeKind};
use super::standard::StandardKey;

/// One incident edge as seen from a node
#[derive(Debug, Clone, Copy)]
pub struct AdjEntry {
    /// Arena index of the node on the other end
    pub neighbor: usize,
    /// Relationship kind
    pub kind: EdgeKind,
    /// Edge confidence
    pub confidence: f32,
    /// True when the stored edge runs from this node to the neighbor
    pub outbound: bool,
}

/// Immutable, indexed view of the whole graph.
///
/// Built once per resolution run and shared behind `Arc` by every resolver
/// working against the same graph state. Nodes live in an arena sorted by
/// id; each edge is indexed under both endpoints, and adjacency lists are
/// sorted by (neighbor id, kind) so traversal order is deterministic.
///
/// The fingerprint is captured before the bulk reads. A graph mutated
/// mid-load therefore looks stale to the cache rather than fresh.
pub struct GraphSnapshot {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    adjacency: Vec<Vec<AdjEntry>>,
    sections: BTreeMap<StandardKey, Vec<usize>>,
    fingerprint: u64,
}

impl GraphSnapshot {
    /// Materialize a snapshot of the store's current state
    pub async fn load(store: &dyn GraphStore) -> Result<Self, StoreError> {
        let fingerprint = store.fingerprint(&Scope::Graph).await?;
        let mut nodes = store.all_nodes().await?;
        let edges = store.all_edges().await?;

        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let index: HashMap<NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut adjacency: Vec<Vec<AdjEntry>> = vec![Vec::new(); nodes.len()];
        for edge in &edges {
            let (Some(&source), Some(&target)) =
                (index.get(&edge.source), index.get(&edge.target))
            else {
                tracing::warn!(
                    edge = %edge.resource_id(),
                    "edge references a missing node, skipping"
                );
                continue;
            };
            adjacency[source].push(AdjEntry {
                neighbor: target,
                kind: edge.kind,
                confidence: edge.confidence,
                outbound: true,
            });
            adjacency[target].push(AdjEntry {
                neighbor: source,
                kind: edge.kind,
                confidence: edge.confidence,
                outbound: false,
            });
        }
        for list in &mut adjacency {
            list.sort_by(|a, b| {
                nodes[a.neighbor]
                    .id
                    .cmp(&nodes[b.neighbor].id)
                    .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
            });
        }

        // Nodes are id-sorted, so each per-standard list comes out sorted too
        let mut sections: BTreeMap<StandardKey, Vec<usize>> = BTreeMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if node.kind == NodeKind::Section {
                if let Some(key) = &node.standard {
                    sections.entry(key.clone()).or_default().push(i);
                }
            }
        }

        Ok(Self {
            nodes,
            index,
            adjacency,
            sections,
            fingerprint,
        })
    }

    /// The node at an arena index
    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    /// Look up a node by id
    pub fn node_by_id(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Arena index of a node id
    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// All incident edges of a node, both directions
    pub fn neighbors(&self, idx: usize) -> &[AdjEntry] {
        &self.adjacency[idx]
    }

    /// Total degree (in + out) of a node
    pub fn degree(&self, idx: usize) -> usize {
        self.adjacency[idx].len()
    }

    /// Arena indices of a standard's sections, ascending by node id
    pub fn sections_of(&self, key: &StandardKey) -> &[usize] {
        self.sections.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every standard with at least one section, in key order
    pub fn standards(&self) -> impl Iterator<Item = &StandardKey> {
        self.sections.keys()
    }

    /// Graph fingerprint at load time
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Number of nodes in the snapshot
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
