use std::future::Future;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::cancellation::TaskContext;
use crate::dispatch::TaskDispatcher;
use crate::error::AppError;
use crate::job::{JobEnvelope, UnitArgs};
use crate::job_queue::WorkQueue;
use crate::task::{TaskStats, TaskType};
use crate::task_store::TaskStore;
use crate::traits::{Notifier, TaskEvent};

/// Message stored when a worker stops mid-unit for shutdown.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted by worker shutdown";

/// Work a finished unit asks to be scheduled next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOutcome {
    pub follow_ups: Vec<(TaskType, UnitArgs)>,
}

impl UnitOutcome {
    pub fn done() -> Self {
        Self::default()
    }
}

/// Body of an acquisition unit. Counters go through the context.
pub trait UnitExecutor: Send + Sync + Clone {
    fn execute<S: TaskStore>(
        &self,
        ctx: &mut TaskContext<S>,
        args: &UnitArgs,
    ) -> impl Future<Output = Result<UnitOutcome, AppError>> + Send;
}

/// How a unit run ended, from the queue's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(TaskStats),
    /// Failed and recorded; the queue entry is still done.
    Failed(String),
    /// Operator cancel observed at a checkpoint.
    Cancelled,
    /// Worker shutdown; the entry stays claimed until the release sweep.
    Interrupted,
    /// Record was no longer pending (cancelled before start or a replay).
    Skipped,
}

/// Lifecycle wrapper shared by every unit: start, run, record, notify.
///
/// Unit errors are absorbed into the task record so the queue never
/// retries them. Only infrastructure failures reach the caller.
#[derive(Clone)]
pub struct UnitRunner<S, Q, E, N>
where
    S: TaskStore,
    Q: WorkQueue,
    E: UnitExecutor,
    N: Notifier,
{
    dispatcher: TaskDispatcher<S, Q>,
    executor: E,
    notifier: N,
}

impl<S, Q, E, N> UnitRunner<S, Q, E, N>
where
    S: TaskStore,
    Q: WorkQueue,
    E: UnitExecutor,
    N: Notifier,
{
    pub fn new(dispatcher: TaskDispatcher<S, Q>, executor: E, notifier: N) -> Self {
        Self {
            dispatcher,
            executor,
            notifier,
        }
    }

    pub fn dispatcher(&self) -> &TaskDispatcher<S, Q> {
        &self.dispatcher
    }

    pub async fn run(
        &self,
        envelope: &JobEnvelope,
        token: CancellationToken,
    ) -> Result<RunOutcome, AppError> {
        let registry = self.dispatcher.registry();
        let task_type = envelope.task_type;

        let record = match envelope.args.task_id {
            Some(id) => registry.get(id).await?,
            None => registry.create(task_type, envelope.args.limit).await?,
        };
        let task_id = record.id;

        if !registry.mark_running(task_id).await? {
            tracing::info!(
                task_id,
                %task_type,
                status = %record.status,
                "Task not pending, skipping"
            );
            return Ok(RunOutcome::Skipped);
        }

        self.notifier
            .notify(TaskEvent::Started {
                task_id,
                task_type,
                limit: record.item_limit,
            })
            .await;

        let started = Instant::now();
        let mut ctx = TaskContext::new(registry.clone(), &record, token);
        let result = self.executor.execute(&mut ctx, &envelope.args).await;
        let stats = *ctx.stats();

        match result {
            Ok(outcome) => {
                registry.mark_completed(task_id, &stats).await?;
                let duration = started.elapsed();
                tracing::info!(
                    task_id,
                    %task_type,
                    processed = stats.processed,
                    created = stats.created,
                    updated = stats.updated,
                    errors = stats.errors,
                    duration_ms = duration.as_millis() as u64,
                    "Task completed"
                );
                self.notifier
                    .notify(TaskEvent::Completed {
                        task_id,
                        task_type,
                        stats,
                        duration,
                    })
                    .await;

                for (follow_type, args) in outcome.follow_ups {
                    if let Err(e) = self.dispatcher.enqueue(follow_type, args).await {
                        tracing::error!(
                            task_id,
                            follow_up = %follow_type,
                            error = %e,
                            "Failed to enqueue follow-up"
                        );
                    }
                }
                Ok(RunOutcome::Completed(stats))
            }
            Err(e) if e.is_cancellation() => {
                if registry.is_cancelled(task_id).await? {
                    tracing::info!(
                        task_id,
                        %task_type,
                        processed = stats.processed,
                        "Task cancelled mid-run"
                    );
                    Ok(RunOutcome::Cancelled)
                } else {
                    registry.mark_failed(task_id, INTERRUPTED_MESSAGE).await?;
                    tracing::warn!(task_id, %task_type, "Task interrupted by shutdown");
                    Ok(RunOutcome::Interrupted)
                }
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(task_id, %task_type, error = %message, "Task failed");
                registry.mark_failed(task_id, &message).await?;
                self.notifier
                    .notify(TaskEvent::Failed {
                        task_id,
                        task_type,
                        error: message.clone(),
                    })
                    .await;
                Ok(RunOutcome::Failed(message))
            }
        }
    }
}
