//! Background job types and the task queue seam
//!
//! Long-running work (bulk precomputation, cascading deletes) runs as
//! jobs behind the [`TaskQueue`] trait. The in-process queue in
//! [`queue`] is the only implementation here; the trait keeps the
//! seam open for an external queue without touching callers.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::engine::{DeleteReport, PrecomputeSummary};
use crate::graph::StandardKey;
use crate::resolve::MapAnalysisResult;

pub mod coordinator;
pub mod queue;

pub use coordinator::PrecomputeCoordinator;
pub use queue::{InProcessQueue, JobReceiver, Worker};

/// Work that can be queued
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Job {
    /// Precompute analyses for every pair of the given standards, or
    /// for every known standard when empty
    PrecomputeAll { standards: Vec<StandardKey> },
    /// Precompute the analysis for one pair
    PrecomputeSingle { a: StandardKey, b: StandardKey },
    /// Delete a graph resource and drop every dependent analysis
    DeleteCascade { resource: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a finished job produced
#[derive(Debug, Clone)]
pub enum JobReport {
    Precompute(PrecomputeSummary),
    Pair(Box<MapAnalysisResult>),
    Delete(DeleteReport),
}

#[derive(Debug, Clone)]
pub enum JobStatus {
    Queued,
    Running,
    Done(JobReport),
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job queue is closed")]
    Closed,
}

/// Handle to a queued job. Status updates arrive over a watch channel,
/// so polling and waiting are both cheap.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    status: watch::Receiver<JobStatus>,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, status: watch::Receiver<JobStatus>) -> Self {
        Self { id, status }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Most recent status
    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Wait until the job finishes or fails.
    ///
    /// If the queue shuts down before the job completes, the last
    /// observed status is returned as-is.
    pub async fn wait(mut self) -> JobStatus {
        loop {
            {
                let current = self.status.borrow();
                if current.is_terminal() {
                    return current.clone();
                }
            }
            if self.status.changed().await.is_err() {
                return self.status.borrow().clone();
            }
        }
    }
}

/// Accepts jobs for asynchronous execution
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<JobHandle, QueueError>;
}
