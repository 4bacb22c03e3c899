//! Typed, weighted links between graph nodes

use serde::{Deserialize, Serialize};

use super::node::NodeId;

/// The relationship an edge expresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    /// CRE hierarchy: a parent CRE contains a child CRE
    Contains,
    /// A CRE is linked to a standard section
    LinksTo,
    /// Two CREs describe the same requirement
    SameAs,
    /// Weaker association, typically proposed from text similarity
    Related,
}

impl EdgeKind {
    /// Every kind, in a fixed order. Handy for filters.
    pub const ALL: [EdgeKind; 4] = [
        EdgeKind::Contains,
        EdgeKind::LinksTo,
        EdgeKind::SameAs,
        EdgeKind::Related,
    ];

    /// Stable string form used in storage, resource ids, and logs
    pub fn as_str(&self) -> &str {
        match self {
            EdgeKind::Contains => "contains",
            EdgeKind::LinksTo => "links-to",
            EdgeKind::SameAs => "same-as",
            EdgeKind::Related => "related",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contains" => Some(EdgeKind::Contains),
            "links-to" => Some(EdgeKind::LinksTo),
            "same-as" => Some(EdgeKind::SameAs),
            "related" => Some(EdgeKind::Related),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed edge in the requirements graph.
///
/// Identity is the `(source, target, kind)` triple; upserting the same
/// triple again replaces the confidence instead of duplicating the edge.
/// Storage keeps the direction, but traversal treats every kind as
/// bidirectional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node
    pub source: NodeId,
    /// Target node
    pub target: NodeId,
    /// Type of relationship
    pub kind: EdgeKind,
    /// Confidence in the link (0.0 - 1.0). Curated links carry 1.0;
    /// embedding-proposed links stay below it.
    pub confidence: f32,
}

impl Edge {
    /// Create a new edge with full confidence
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>, kind: EdgeKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            confidence: 1.0,
        }
    }

    /// Set the confidence
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Render the identity triple as a resource id: `source|kind|target`.
    ///
    /// This is the form cache invalidation and the delete cascade key on,
    /// so it always reflects the stored direction.
    pub fn resource_id(&self) -> String {
        format!("{}|{}|{}", self.source, self.kind.as_str(), self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_kind_round_trip() {
        for kind in EdgeKind::ALL {
            assert_eq!(EdgeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EdgeKind::parse("unknown"), None);
    }

    #[test]
    fn test_edge_defaults_to_full_confidence() {
        let edge = Edge::new("CRE:170-772", "ASVS@4.0:V2.1.1", EdgeKind::LinksTo);
        assert_eq!(edge.confidence, 1.0);
    }

    #[test]
    fn test_resource_id_format() {
        let edge = Edge::new("CRE:170-772", "ASVS@4.0:V2.1.1", EdgeKind::LinksTo)
            .with_confidence(0.9);
        assert_eq!(edge.resource_id(), "CRE:170-772|links-to|ASVS@4.0:V2.1.1");
    }

    #[test]
    fn test_edge_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&EdgeKind::LinksTo).unwrap();
        assert_eq!(json, "\"links-to\"");
        let json = serde_json::to_string(&EdgeKind::SameAs).unwrap();
        assert_eq!(json, "\"same-as\"");
    }
}
