//! Cross-standard path resolution

pub mod mapping;
pub mod resolver;

pub use mapping::{MapAnalysisResult, Mapping, PairKey, PathEdge, Strength};
pub use resolver::{PathResolver, ResolveConfig, ResolveError};
