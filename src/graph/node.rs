//! Node representation in the requirements graph

use serde::{Deserialize, Serialize};

use super::standard::StandardKey;

/// Unique identifier for a node.
///
/// IDs are caller-supplied strings. CRE nodes conventionally use their
/// enumeration id (`"CRE:170-772"`), standard sections a
/// `"<standard>@<version>:<section>"` form (`"ASVS@4.0:V1.1.1"`), but the
/// graph itself only requires uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a NodeId from a string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What kind of entity a node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A Common Requirement Enumeration entry, the shared vocabulary
    /// that standards link into
    Cre,
    /// A section of a concrete standard (a control, requirement, rule...)
    Section,
}

impl NodeKind {
    /// Stable string form used in storage and logs
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Cre => "cre",
            NodeKind::Section => "section",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cre" => Some(NodeKind::Cre),
            "section" => Some(NodeKind::Section),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A node in the requirements graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier
    pub id: NodeId,
    /// CRE entry or standard section
    pub kind: NodeKind,
    /// Human-readable name (CRE title, section heading)
    pub name: String,
    /// Full requirement text, when the source provides it
    pub text: Option<String>,
    /// Links out to source documents
    pub hyperlinks: Vec<String>,
    /// The standard a section belongs to. Always `None` for CRE nodes.
    pub standard: Option<StandardKey>,
}

impl Node {
    /// Create a CRE node
    pub fn cre(id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Cre,
            name: name.into(),
            text: None,
            hyperlinks: Vec::new(),
            standard: None,
        }
    }

    /// Create a section node belonging to a standard
    pub fn section(id: impl Into<NodeId>, name: impl Into<String>, standard: StandardKey) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Section,
            name: name.into(),
            text: None,
            hyperlinks: Vec::new(),
            standard: Some(standard),
        }
    }

    /// Attach requirement text
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Add a hyperlink to a source document
    pub fn with_hyperlink(mut self, url: impl Into<String>) -> Self {
        self.hyperlinks.push(url.into());
        self
    }

    /// True for CRE nodes
    pub fn is_cre(&self) -> bool {
        self.kind == NodeKind::Cre
    }

    /// True for standard section nodes
    pub fn is_section(&self) -> bool {
        self.kind == NodeKind::Section
    }

    /// The text an embedder should see for this node
    pub fn embeddable_text(&self) -> String {
        match &self.text {
            Some(text) => format!("{}: {}", self.name, text),
            None => self.name.clone(),
        }
    }
}
