use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::job::{JobEnvelope, UnitArgs};
use crate::job_queue::WorkQueue;
use crate::registry::TaskRegistry;
use crate::task::{TaskRecord, TaskType};
use crate::task_store::TaskStore;

/// Enqueue path: task record first, then the queue entry, then the link.
#[derive(Clone)]
pub struct TaskDispatcher<S: TaskStore, Q: WorkQueue> {
    registry: TaskRegistry<S>,
    queue: Q,
}

impl<S: TaskStore, Q: WorkQueue> TaskDispatcher<S, Q> {
    pub fn new(registry: TaskRegistry<S>, queue: Q) -> Self {
        Self { registry, queue }
    }

    pub fn registry(&self) -> &TaskRegistry<S> {
        &self.registry
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub async fn enqueue(
        &self,
        task_type: TaskType,
        args: UnitArgs,
    ) -> Result<TaskRecord, AppError> {
        self.enqueue_at(task_type, args, None).await
    }

    /// Creates a `pending` record and dispatches a unit that carries its id.
    ///
    /// If dispatch fails the record is failed with the dispatch error so it
    /// does not linger as `pending`.
    pub async fn enqueue_at(
        &self,
        task_type: TaskType,
        args: UnitArgs,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<TaskRecord, AppError> {
        let mut record = self.registry.create(task_type, args.limit).await?;

        let envelope = JobEnvelope::new(
            task_type,
            UnitArgs {
                task_id: Some(record.id),
                ..args
            },
        );

        let job_id = match self.queue.dispatch(&envelope.to_payload(), run_at).await {
            Ok(id) => id.to_string(),
            Err(e) => {
                let message = format!("Dispatch failed: {e}");
                if let Err(mark_err) = self.registry.mark_failed(record.id, &message).await {
                    tracing::error!(
                        task_id = record.id,
                        error = %mark_err,
                        "Failed to mark undispatched task"
                    );
                }
                return Err(e);
            }
        };

        self.registry.set_correlation_id(record.id, &job_id).await?;
        record.queue_correlation_id = Some(job_id.clone());

        tracing::info!(task_id = record.id, %task_type, %job_id, "Unit enqueued");
        Ok(record)
    }
}
