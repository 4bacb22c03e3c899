//! Core graph data structures

mod edge;
mod node;
mod snapshot;
mod standard;

pub use edge::{Edge, EdgeKind};
pub use node::{Node, NodeId, NodeKind};
pub use snapshot::{AdjEntry, GraphSnapshot};
pub use standard::StandardKey;
