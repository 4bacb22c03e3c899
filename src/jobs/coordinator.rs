//! High-level entry points for queued work

use std::sync::Arc;

use super::{Job, JobHandle, QueueError, TaskQueue};
use crate::engine::CrosswalkEngine;
use crate::graph::StandardKey;

/// Front door for background work against one engine.
///
/// The coordinator decides what runs inline and what goes through the
/// queue. Cache invalidation for deletes is synchronous, so no caller
/// can observe a stale analysis for a resource whose deletion has been
/// accepted, while the graph mutation itself runs as a job.
pub struct PrecomputeCoordinator {
    engine: Arc<CrosswalkEngine>,
    queue: Arc<dyn TaskQueue>,
}

impl PrecomputeCoordinator {
    pub fn new(engine: Arc<CrosswalkEngine>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { engine, queue }
    }

    /// Queue precomputation for every pair of the given standards, or
    /// for all known standards when the list is empty.
    pub async fn enqueue_precompute(
        &self,
        standards: Vec<StandardKey>,
    ) -> Result<JobHandle, QueueError> {
        self.queue.enqueue(Job::PrecomputeAll { standards }).await
    }

    /// Queue precomputation for a single pair
    pub async fn enqueue_single(
        &self,
        a: StandardKey,
        b: StandardKey,
    ) -> Result<JobHandle, QueueError> {
        self.queue.enqueue(Job::PrecomputeSingle { a, b }).await
    }

    /// Invalidate every analysis depending on a resource, then queue
    /// its deletion. Returns how many analyses were dropped up front
    /// along with the handle for the queued deletion.
    pub async fn enqueue_delete_cascade(
        &self,
        resource: impl Into<String>,
    ) -> Result<(usize, JobHandle), QueueError> {
        let resource = resource.into();
        let invalidated = self.engine.invalidate_resource(&resource);
        tracing::info!(resource, invalidated, "queueing resource deletion");
        let handle = self
            .queue
            .enqueue(Job::DeleteCascade { resource })
            .await?;
        Ok((invalidated, handle))
    }
}
