//! Text embeddings and similarity-based edge proposals
//!
//! The [`Embedder`] trait hides the model behind a synchronous batch
//! call. The real model (fastembed) is compiled in behind the
//! `embeddings` feature; [`HashEmbedder`] is a deterministic stand-in
//! that needs no model download.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use thiserror::Error;

use crate::graph::{Edge, EdgeKind, Node, NodeId};
use crate::store::{GraphStore, StoreError};

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding produced no result")]
    EmptyResult,

    #[error("Embedding model error: {0}")]
    Model(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Batch text embedding
pub trait Embedder: Send + Sync {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Cosine similarity between two vectors, 0.0 when either has no
/// magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Deterministic hashed bag-of-words embedder.
///
/// Tokens are lowercased, stripped of punctuation and hashed into a
/// fixed number of buckets; the vector is L2-normalized. Good enough
/// for tests and for running the proposer without a model download,
/// not a substitute for a real model.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Embedder for HashEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dim];
                for token in text.split_whitespace() {
                    let token: String = token
                        .chars()
                        .filter(|c| c.is_alphanumeric())
                        .collect::<String>()
                        .to_lowercase();
                    if token.is_empty() {
                        continue;
                    }
                    let mut hasher = DefaultHasher::new();
                    token.hash(&mut hasher);
                    vector[(hasher.finish() as usize) % self.dim] += 1.0;
                }
                let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in &mut vector {
                        *x /= norm;
                    }
                }
                vector
            })
            .collect())
    }
}

#[cfg(feature = "embeddings")]
mod fastembed_impl {
    use std::sync::Mutex;

    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    use super::{Embedder, EmbeddingError};

    /// Embedder backed by a local fastembed model.
    ///
    /// The model mutates internal buffers while embedding, hence the
    /// mutex around it.
    pub struct FastEmbedEmbedder {
        model: Mutex<TextEmbedding>,
    }

    impl FastEmbedEmbedder {
        pub fn new(model: EmbeddingModel) -> Result<Self, EmbeddingError> {
            let text_embedding = TextEmbedding::try_new(
                InitOptions::new(model).with_show_download_progress(false),
            )
            .map_err(|e| EmbeddingError::Model(e.to_string()))?;
            Ok(Self {
                model: Mutex::new(text_embedding),
            })
        }

        /// Nomic Embed v1.5, a reasonable default for requirement text
        pub fn default_model() -> Result<Self, EmbeddingError> {
            Self::new(EmbeddingModel::NomicEmbedTextV15)
        }
    }

    impl Embedder for FastEmbedEmbedder {
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut model = self.model.lock().unwrap();
            let embeddings = model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::Model(e.to_string()))?;
            if embeddings.is_empty() && !texts.is_empty() {
                return Err(EmbeddingError::EmptyResult);
            }
            Ok(embeddings)
        }
    }
}

#[cfg(feature = "embeddings")]
pub use fastembed_impl::FastEmbedEmbedder;

fn unordered(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Proposes `related` edges between CREs and sections whose text
/// embeds close together.
///
/// Pairs that already share an edge of any kind are left alone, so
/// repeated runs over an unchanged graph create nothing new. Proposed
/// edges carry the similarity as confidence, capped below 1.0 to keep
/// them distinguishable from curated links.
pub struct RelatedEdgeProposer {
    threshold: f32,
}

impl RelatedEdgeProposer {
    pub const DEFAULT_THRESHOLD: f32 = 0.75;

    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn with_defaults() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }

    /// Returns the number of edges created.
    pub async fn run(
        &self,
        store: &dyn GraphStore,
        embedder: &dyn Embedder,
    ) -> Result<usize, EmbeddingError> {
        let nodes = store.all_nodes().await?;
        let candidates: Vec<&Node> = nodes.iter().filter(|n| n.text.is_some()).collect();
        if candidates.len() < 2 {
            return Ok(0);
        }

        let texts: Vec<String> = candidates.iter().map(|n| n.embeddable_text()).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = embedder.embed_batch(&refs)?;
        if vectors.len() != candidates.len() {
            return Err(EmbeddingError::EmptyResult);
        }

        let mut connected: HashSet<(NodeId, NodeId)> = HashSet::new();
        for edge in store.all_edges().await? {
            connected.insert(unordered(edge.source, edge.target));
        }

        let mut created = 0;
        for (i, cre) in candidates.iter().enumerate() {
            if !cre.is_cre() {
                continue;
            }
            for (j, section) in candidates.iter().enumerate() {
                if !section.is_section() {
                    continue;
                }
                if connected.contains(&unordered(cre.id.clone(), section.id.clone())) {
                    continue;
                }
                let similarity = cosine_similarity(&vectors[i], &vectors[j]);
                if similarity >= self.threshold {
                    store
                        .upsert_edge(
                            Edge::new(cre.id.clone(), section.id.clone(), EdgeKind::Related)
                                .with_confidence(similarity.min(0.99)),
                        )
                        .await?;
                    created += 1;
                }
            }
        }

        tracing::info!(created, "proposed related edges");
        Ok(created)
    }
}
