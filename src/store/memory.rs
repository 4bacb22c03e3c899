//! In-memory graph store

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{GraphStore, Scope, StoreError, StoreResult};
use super::{content_fingerprint, validate_edge};
use crate::graph::{Edge, EdgeKind, Node, NodeId, StandardKey};

/// DashMap-backed store.
///
/// The primary test double and the in-process target for short-lived runs.
/// A revision counter advances on every mutation; the graph-scope
/// fingerprint is memoized against it so repeated freshness checks on an
/// unchanged graph stay cheap.
pub struct MemoryStore {
    nodes: DashMap<NodeId, Node>,
    /// Keyed by the edge's resource id (`source|kind|target`)
    edges: DashMap<String, Edge>,
    revision: AtomicU64,
    graph_fingerprint: Mutex<Option<(u64, u64)>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            edges: DashMap::new(),
            revision: AtomicU64::new(0),
            graph_fingerprint: Mutex::new(None),
        }
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    fn sorted_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.iter().map(|r| r.value().clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    fn sorted_edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self.edges.iter().map(|r| r.value().clone()).collect();
        edges.sort_by(|a, b| a.resource_id().cmp(&b.resource_id()));
        edges
    }

    fn edges_incident_to(&self, ids: &HashSet<&NodeId>) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .edges
            .iter()
            .filter(|r| ids.contains(&r.value().source) || ids.contains(&r.value().target))
            .map(|r| r.value().clone())
            .collect();
        edges.sort_by(|a, b| a.resource_id().cmp(&b.resource_id()));
        edges
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn get_node(&self, id: &NodeId) -> StoreResult<Option<Node>> {
        Ok(self.nodes.get(id).map(|r| r.value().clone()))
    }

    async fn get_edges(&self, id: &NodeId, kinds: Option<&[EdgeKind]>) -> StoreResult<Vec<Edge>> {
        let mut edges: Vec<Edge> = self
            .edges
            .iter()
            .filter(|r| {
                let edge = r.value();
                (edge.source == *id || edge.target == *id)
                    && kinds.map_or(true, |ks| ks.contains(&edge.kind))
            })
            .map(|r| r.value().clone())
            .collect();
        edges.sort_by(|a, b| a.resource_id().cmp(&b.resource_id()));
        Ok(edges)
    }

    async fn get_standard_sections(&self, key: &StandardKey) -> StoreResult<Vec<Node>> {
        let mut sections: Vec<Node> = self
            .nodes
            .iter()
            .filter(|r| r.value().standard.as_ref() == Some(key))
            .map(|r| r.value().clone())
            .collect();
        sections.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sections)
    }

    async fn list_standards(&self) -> StoreResult<Vec<StandardKey>> {
        let keys: BTreeSet<StandardKey> = self
            .nodes
            .iter()
            .filter_map(|r| r.value().standard.clone())
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn all_nodes(&self) -> StoreResult<Vec<Node>> {
        Ok(self.sorted_nodes())
    }

    async fn all_edges(&self) -> StoreResult<Vec<Edge>> {
        Ok(self.sorted_edges())
    }

    async fn fingerprint(&self, scope: &Scope) -> StoreResult<u64> {
        match scope {
            Scope::Graph => {
                let revision = self.revision.load(Ordering::SeqCst);
                {
                    let memo = self.graph_fingerprint.lock().unwrap();
                    if let Some((rev, fp)) = *memo {
                        if rev == revision {
                            return Ok(fp);
                        }
                    }
                }
                let fp = content_fingerprint(&self.sorted_nodes(), &self.sorted_edges());
                // A write racing the compute advances the revision, so the
                // memoized pairing can only be missed, never trusted stale.
                *self.graph_fingerprint.lock().unwrap() = Some((revision, fp));
                Ok(fp)
            }
            Scope::Standard(key) => {
                let sections = self.get_standard_sections(key).await?;
                let ids: HashSet<&NodeId> = sections.iter().map(|n| &n.id).collect();
                Ok(content_fingerprint(&sections, &self.edges_incident_to(&ids)))
            }
            Scope::Node(id) => {
                let nodes: Vec<Node> = self.get_node(id).await?.into_iter().collect();
                let ids: HashSet<&NodeId> = std::iter::once(id).collect();
                Ok(content_fingerprint(&nodes, &self.edges_incident_to(&ids)))
            }
        }
    }

    async fn upsert_node(&self, node: Node) -> StoreResult<()> {
        self.nodes.insert(node.id.clone(), node);
        self.bump();
        Ok(())
    }

    async fn upsert_edge(&self, edge: Edge) -> StoreResult<()> {
        validate_edge(&edge)?;
        if !self.nodes.contains_key(&edge.source) {
            return Err(StoreError::NodeNotFound(edge.source.to_string()));
        }
        if !self.nodes.contains_key(&edge.target) {
            return Err(StoreError::NodeNotFound(edge.target.to_string()));
        }
        self.edges.insert(edge.resource_id(), edge);
        self.bump();
        Ok(())
    }

    async fn delete_edge(
        &self,
        source: &NodeId,
        target: &NodeId,
        kind: EdgeKind,
    ) -> StoreResult<bool> {
        let key = format!("{}|{}|{}", source, kind.as_str(), target);
        let removed = self.edges.remove(&key).is_some();
        if removed {
            self.bump();
        }
        Ok(removed)
    }

    async fn delete_node(&self, id: &NodeId) -> StoreResult<bool> {
        if self.nodes.remove(id).is_none() {
            return Ok(false);
        }
        self.edges
            .retain(|_, edge| edge.source != *id && edge.target != *id);
        self.bump();
        Ok(true)
    }

    async fn delete_standard(&self, key: &StandardKey) -> StoreResult<usize> {
        let sections: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|r| r.value().standard.as_ref() == Some(key))
            .map(|r| r.key().clone())
            .collect();
        if sections.is_empty() {
            return Err(StoreError::StandardNotFound(key.to_string()));
        }
        let ids: HashSet<NodeId> = sections.iter().cloned().collect();
        for id in &sections {
            self.nodes.remove(id);
        }
        self.edges
            .retain(|_, edge| !ids.contains(&edge.source) && !ids.contains(&edge.target));
        self.bump();
        Ok(sections.len())
    }
}
