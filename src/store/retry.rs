//! Retry wrapper for transient store failures

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{GraphStore, Scope, StoreError, StoreResult};
use crate::graph::{Edge, EdgeKind, Node, NodeId, StandardKey};

/// Backoff schedule for retrying transient store errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on each subsequent retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

macro_rules! with_retry {
    ($self:expr, $op:literal, $call:expr) => {{
        let mut attempt = 1u32;
        loop {
            match $call {
                Err(StoreError::Unavailable(reason)) if attempt < $self.policy.max_attempts => {
                    let delay = $self.policy.backoff(attempt);
                    tracing::warn!(
                        op = $op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "store unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => break other,
            }
        }
    }};
}

/// Store decorator that retries `Unavailable` errors with exponential
/// backoff. Every other error kind passes through immediately, since
/// retrying a validation failure or a missing node cannot help.
pub struct RetryingStore {
    inner: Arc<dyn GraphStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn GraphStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl GraphStore for RetryingStore {
    async fn get_node(&self, id: &NodeId) -> StoreResult<Option<Node>> {
        with_retry!(self, "get_node", self.inner.get_node(id).await)
    }

    async fn get_edges(&self, id: &NodeId, kinds: Option<&[EdgeKind]>) -> StoreResult<Vec<Edge>> {
        with_retry!(self, "get_edges", self.inner.get_edges(id, kinds).await)
    }

    async fn get_standard_sections(&self, key: &StandardKey) -> StoreResult<Vec<Node>> {
        with_retry!(
            self,
            "get_standard_sections",
            self.inner.get_standard_sections(key).await
        )
    }

    async fn list_standards(&self) -> StoreResult<Vec<StandardKey>> {
        with_retry!(self, "list_standards", self.inner.list_standards().await)
    }

    async fn all_nodes(&self) -> StoreResult<Vec<Node>> {
        with_retry!(self, "all_nodes", self.inner.all_nodes().await)
    }

    async fn all_edges(&self) -> StoreResult<Vec<Edge>> {
        with_retry!(self, "all_edges", self.inner.all_edges().await)
    }

    async fn fingerprint(&self, scope: &Scope) -> StoreResult<u64> {
        with_retry!(self, "fingerprint", self.inner.fingerprint(scope).await)
    }

    async fn upsert_node(&self, node: Node) -> StoreResult<()> {
        with_retry!(self, "upsert_node", self.inner.upsert_node(node.clone()).await)
    }

    async fn upsert_edge(&self, edge: Edge) -> StoreResult<()> {
        with_retry!(self, "upsert_edge", self.inner.upsert_edge(edge.clone()).await)
    }

    async fn delete_edge(
        &self,
        source: &NodeId,
        target: &NodeId,
        kind: EdgeKind,
    ) -> StoreResult<bool> {
        with_retry!(
            self,
            "delete_edge",
            self.inner.delete_edge(source, target, kind).await
        )
    }

    async fn delete_node(&self, id: &NodeId) -> StoreResult<bool> {
        with_retry!(self, "delete_node", self.inner.delete_node(id).await)
    }

    async fn delete_standard(&self, key: &StandardKey) -> StoreResult<usize> {
        with_retry!(
            self,
            "delete_standard",
            self.inner.delete_standard(key).await
        )
    }
}
