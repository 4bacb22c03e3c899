//! Mapping types produced by path resolution

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::{EdgeKind, NodeId, StandardKey};

/// How strongly a mapping ties two sections together.
///
/// Classification looks at the number of intermediate CREs on the path
/// and at the path confidence. A low-confidence path is `Weak` no
/// matter how short it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    Direct,
    Indirect,
    Weak,
}

impl Strength {
    /// Classify a path by intermediate CRE count and confidence.
    ///
    /// Up to one intermediate CRE is `Direct`, two or three are
    /// `Indirect`, anything longer is `Weak`. Paths whose confidence
    /// falls below `weak_confidence` are demoted to `Weak` regardless
    /// of length.
    pub fn classify(intermediate_cres: usize, confidence: f32, weak_confidence: f32) -> Self {
        if confidence < weak_confidence {
            return Self::Weak;
        }
        match intermediate_cres {
            0 | 1 => Self::Direct,
            2 | 3 => Self::Indirect,
            _ => Self::Weak,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Indirect => "indirect",
            Self::Weak => "weak",
        }
    }
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A traversed edge, kept in its stored orientation.
///
/// The walk crosses edges in both directions, but the recorded source
/// and target always match the edge as stored so the mapping can be
/// tied back to the exact graph resource it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    pub confidence: f32,
}

impl PathEdge {
    /// Stable resource identifier, `source|kind|target`
    pub fn resource_id(&self) -> String {
        format!("{}|{}|{}", self.source, self.kind.as_str(), self.target)
    }
}

/// One path from a section of the first standard to a section of the
/// second, through intermediate CREs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    /// Section of the first standard where the path starts
    pub source: NodeId,
    /// Section of the second standard where the path ends
    pub target: NodeId,
    /// Every node on the path, endpoints included, in walk order
    pub nodes: Vec<NodeId>,
    /// Every edge on the path, in walk order
    pub edges: Vec<PathEdge>,
    /// Weakest edge confidence along the path
    pub confidence: f32,
    pub strength: Strength,
}

impl Mapping {
    /// Number of edges on the path
    pub fn hops(&self) -> usize {
        self.edges.len()
    }

    /// Number of interior nodes, which are always CREs
    pub fn intermediate_cres(&self) -> usize {
        self.nodes.len().saturating_sub(2)
    }
}

/// Unordered pair of standards identifying one analysis.
///
/// Construction normalizes the order, so `(ASVS, CWE)` and
/// `(CWE, ASVS)` name the same analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    a: StandardKey,
    b: StandardKey,
}

impl PairKey {
    pub fn new(x: StandardKey, y: StandardKey) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    /// Lesser standard of the pair
    pub fn a(&self) -> &StandardKey {
        &self.a
    }

    /// Greater standard of the pair
    pub fn b(&self) -> &StandardKey {
        &self.b
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.a, self.b)
    }
}

/// Complete result of resolving one standard pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapAnalysisResult {
    pub pair: PairKey,
    pub mappings: Vec<Mapping>,
    /// Graph fingerprint the analysis was computed against
    pub fingerprint: u64,
    pub computed_at: DateTime<Utc>,
}

impl MapAnalysisResult {
    /// Every graph resource this result depends on, sorted.
    ///
    /// Covers both standards of the pair (versioned and bare name),
    /// every node on every path, and every traversed edge. Deleting
    /// any of these invalidates the result.
    pub fn resources(&self) -> Vec<String> {
        let mut set: BTreeSet<String> = BTreeSet::new();
        for key in [self.pair.a(), self.pair.b()] {
            set.insert(key.to_string());
            if key.version.is_some() {
                set.insert(key.name.clone());
            }
        }
        for mapping in &self.mappings {
            for node in &mapping.nodes {
                set.insert(node.to_string());
            }
            for edge in &mapping.edges {
                set.insert(edge.resource_id());
            }
        }
        set.into_iter().collect()
    }
}
