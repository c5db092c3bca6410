use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::canceller::{CancelOutcome, JobCanceller};
use crate::dispatch::TaskDispatcher;
use crate::error::AppError;
use crate::job::UnitArgs;
use crate::job_queue::WorkQueue;
use crate::registry::TaskRegistry;
use crate::schedule::{CronDefinition, ScheduleStore, ScheduleSynchronizer, SyncReport};
use crate::task::{TaskRecord, TaskType};
use crate::task_store::TaskStore;

/// Operator-facing entry points of the acquisition core.
#[derive(Clone)]
pub struct HarvestService<S, Q, C>
where
    S: TaskStore,
    Q: WorkQueue,
    C: ScheduleStore,
{
    dispatcher: TaskDispatcher<S, Q>,
    canceller: JobCanceller<S, Q>,
    schedules: ScheduleSynchronizer<C, S, Q>,
}

impl<S, Q, C> HarvestService<S, Q, C>
where
    S: TaskStore,
    Q: WorkQueue,
    C: ScheduleStore,
{
    pub fn new(tasks: S, queue: Q, schedules: C) -> Self {
        let registry = TaskRegistry::new(tasks);
        let dispatcher = TaskDispatcher::new(registry.clone(), queue.clone());
        Self {
            canceller: JobCanceller::new(registry, queue),
            schedules: ScheduleSynchronizer::new(schedules, dispatcher.clone()),
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &TaskDispatcher<S, Q> {
        &self.dispatcher
    }

    pub async fn enqueue(
        &self,
        task_type: TaskType,
        args: UnitArgs,
    ) -> Result<TaskRecord, AppError> {
        self.dispatcher.enqueue(task_type, args).await
    }

    pub async fn cancel(&self, task_id: i64) -> Result<CancelOutcome, AppError> {
        self.canceller.cancel(task_id).await
    }

    pub async fn status(&self, task_id: i64) -> Result<TaskRecord, AppError> {
        self.dispatcher.registry().get(task_id).await
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<TaskRecord>, AppError> {
        self.dispatcher.registry().list_recent(limit).await
    }

    pub async fn schedules(&self) -> Result<Vec<CronDefinition>, AppError> {
        self.schedules.schedules().list().await
    }

    pub async fn set_schedule(
        &self,
        task_type: TaskType,
        expression: &str,
        enabled: bool,
    ) -> Result<CronDefinition, AppError> {
        self.schedules.set(task_type, expression, enabled).await
    }

    pub async fn sync_schedules(&self) -> Result<SyncReport, AppError> {
        self.schedules.sync_schedules().await
    }

    pub async fn run_due_schedules(&self) -> Result<Vec<TaskRecord>, AppError> {
        self.schedules.run_due_schedules().await
    }

    /// Re-syncs registrations every `interval` until cancelled. With
    /// `run_due` each tick also enqueues due definitions directly.
    pub async fn run_schedule_loop(
        &self,
        cancel_token: CancellationToken,
        interval: Duration,
        run_due: bool,
    ) {
        loop {
            if let Err(e) = self.sync_schedules().await {
                tracing::error!(error = %e, "Schedule sync failed");
            }
            if run_due {
                match self.run_due_schedules().await {
                    Ok(records) if !records.is_empty() => {
                        tracing::info!(enqueued = records.len(), "Due schedules enqueued")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Running due schedules failed"),
                }
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = cancel_token.cancelled() => break,
            }
        }
        tracing::info!("Schedule loop stopped");
    }
}
