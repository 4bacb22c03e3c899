//! In-process job queue and worker

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::{Job, JobHandle, JobId, JobStatus, QueueError, TaskQueue};
use crate::engine::CrosswalkEngine;

struct QueuedJob {
    id: JobId,
    job: Job,
    status: watch::Sender<JobStatus>,
}

/// Unbounded in-process queue.
///
/// Cloning the queue is cheap; all clones feed the same receiver.
#[derive(Clone)]
pub struct InProcessQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
}

/// Receiving half handed to a [`Worker`]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<QueuedJob>,
}

impl InProcessQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, JobReceiver { rx })
    }
}

#[async_trait]
impl TaskQueue for InProcessQueue {
    async fn enqueue(&self, job: Job) -> Result<JobHandle, QueueError> {
        let id = JobId::new();
        let (status_tx, status_rx) = watch::channel(JobStatus::Queued);
        tracing::debug!(%id, "enqueueing job");
        self.tx
            .send(QueuedJob {
                id,
                job,
                status: status_tx,
            })
            .map_err(|_| QueueError::Closed)?;
        Ok(JobHandle::new(id, status_rx))
    }
}

/// Drains a [`JobReceiver`], executing jobs one at a time against the
/// engine. Status updates are best-effort; a dropped handle only means
/// nobody is listening.
pub struct Worker {
    engine: Arc<CrosswalkEngine>,
    receiver: JobReceiver,
}

impl Worker {
    pub fn new(engine: Arc<CrosswalkEngine>, receiver: JobReceiver) -> Self {
        Self { engine, receiver }
    }

    /// Run until the queue side is dropped
    pub async fn run(mut self) {
        while let Some(queued) = self.receiver.rx.recv().await {
            let _ = queued.status.send(JobStatus::Running);
            tracing::info!(id = %queued.id, "job started");

            let status = match self.engine.execute_job(&queued.job).await {
                Ok(report) => {
                    tracing::info!(id = %queued.id, "job finished");
                    JobStatus::Done(report)
                }
                Err(err) => {
                    tracing::warn!(id = %queued.id, error = %err, "job failed");
                    JobStatus::Failed(err.to_string())
                }
            };
            let _ = queued.status.send(status);
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
