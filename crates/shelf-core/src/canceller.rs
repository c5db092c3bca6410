use crate::error::AppError;
use crate::job::QueueSet;
use crate::job_queue::WorkQueue;
use crate::registry::TaskRegistry;
use crate::task::{CANCELLED_SENTINEL, TaskStatus};
use crate::task_store::TaskStore;

/// Operator feedback for a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOutcome {
    pub task_id: i64,
    pub removed: usize,
}

/// Stops a task: fails its record with the cancellation sentinel and purges
/// every queued entry that belongs to it.
///
/// A unit already executing stops at its next checkpoint.
#[derive(Clone)]
pub struct JobCanceller<S: TaskStore, Q: WorkQueue> {
    registry: TaskRegistry<S>,
    queue: Q,
}

impl<S: TaskStore, Q: WorkQueue> JobCanceller<S, Q> {
    pub fn new(registry: TaskRegistry<S>, queue: Q) -> Self {
        Self { registry, queue }
    }

    pub async fn cancel(&self, task_id: i64) -> Result<CancelOutcome, AppError> {
        let record = self.registry.get(task_id).await?;
        if !matches!(record.status, TaskStatus::Pending | TaskStatus::Running) {
            return Err(AppError::NotRunning {
                id: task_id,
                status: record.status.to_string(),
            });
        }

        if !self.registry.mark_failed(task_id, CANCELLED_SENTINEL).await? {
            tracing::info!(task_id, "Task reached a terminal state before cancel landed");
        }

        let correlation_id = record.queue_correlation_id.as_deref();
        let mut removed = 0;
        for set in QueueSet::ALL {
            let entries = self.queue.entries(set).await?;
            for entry in entries
                .iter()
                .filter(|e| e.correlates_to(task_id, correlation_id))
            {
                match self.queue.remove(entry.id).await {
                    Ok(true) => {
                        removed += 1;
                        tracing::debug!(task_id, entry_id = %entry.id, ?set, "Queue entry removed");
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(
                            task_id,
                            entry_id = %entry.id,
                            error = %e,
                            "Failed to remove queue entry"
                        )
                    }
                }
            }
        }

        tracing::info!(task_id, removed, "Task cancelled");
        Ok(CancelOutcome { task_id, removed })
    }
}
