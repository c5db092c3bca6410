use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{JobEnvelope, QueueEntry, RecurringJob, WorkerConfig};
use crate::job_queue::WorkQueue;
use crate::runner::{RunOutcome, UnitExecutor, UnitRunner};
use crate::schedule::compute_next_run;
use crate::task::TaskType;
use crate::task_store::TaskStore;
use crate::traits::Notifier;

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    RecurringFired {
        name: &'a str,
        task_id: i64,
    },
    EntryClaimed {
        entry: &'a QueueEntry,
    },
    UnitStarted {
        entry_id: Uuid,
        task_type: TaskType,
        task_id: Option<i64>,
    },
    UnitFinished {
        entry_id: Uuid,
        outcome: &'a RunOutcome,
    },
    EntryFailed {
        entry_id: Uuid,
        error: &'a str,
        will_retry: bool,
    },
    ShuttingDown {
        worker_id: &'a str,
        entries_released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for queue entries");
            }
            WorkerEvent::RecurringFired { name, task_id } => {
                tracing::info!(%name, task_id, "Recurring unit fired");
            }
            WorkerEvent::EntryClaimed { entry } => {
                tracing::info!(entry_id = %entry.id, attempts = entry.attempts, "Entry claimed");
            }
            WorkerEvent::UnitStarted {
                entry_id,
                task_type,
                task_id,
            } => {
                tracing::info!(%entry_id, %task_type, ?task_id, "Running unit");
            }
            WorkerEvent::UnitFinished { entry_id, outcome } => {
                tracing::info!(%entry_id, ?outcome, "Unit finished");
            }
            WorkerEvent::EntryFailed {
                entry_id,
                error,
                will_retry,
            } => {
                tracing::warn!(%entry_id, %error, %will_retry, "Entry failed");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                entries_released,
            } => {
                tracing::info!(%worker_id, %entries_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Worker that fires recurring registrations, then claims and runs units.
pub struct WorkerService<S, Q, E, N>
where
    S: TaskStore,
    Q: WorkQueue,
    E: UnitExecutor,
    N: Notifier,
{
    runner: UnitRunner<S, Q, E, N>,
    config: WorkerConfig,
}

impl<S, Q, E, N> WorkerService<S, Q, E, N>
where
    S: TaskStore,
    Q: WorkQueue,
    E: UnitExecutor,
    N: Notifier,
{
    pub fn new(runner: UnitRunner<S, Q, E, N>, config: WorkerConfig) -> Self {
        Self { runner, config }
    }

    fn queue(&self) -> &Q {
        self.runner.dispatcher().queue()
    }

    /// Run the worker loop until cancellation.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), AppError> {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            if let Err(e) = self.fire_due_recurring(reporter).await {
                tracing::error!(error = %e, "Failed to fire recurring units");
            }

            reporter.report(WorkerEvent::Polling);

            match self.queue().claim(&self.config.worker_id).await {
                Ok(Some(entry)) => {
                    reporter.report(WorkerEvent::EntryClaimed { entry: &entry });
                    self.process_entry(&entry, cancel_token.child_token(), reporter)
                        .await;
                }
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim queue entry");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        // Graceful shutdown: hand claimed entries back to the live set
        let released = self
            .queue()
            .release_worker_entries(&self.config.worker_id)
            .await
            .unwrap_or(0);

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.config.worker_id,
            entries_released: released,
        });
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }

    /// Enqueues one unit per due registration. The compare-and-set on the
    /// fire time lets only one worker fire a given slot.
    pub async fn fire_due_recurring<WR: WorkerReporter>(
        &self,
        reporter: &WR,
    ) -> Result<usize, AppError> {
        let now = Utc::now();
        let mut fired = 0;
        for job in self.queue().due_recurring(now).await? {
            let Some(expected) = job.next_fire_at else {
                continue;
            };
            let next = compute_next_run(&job.cron, true, Some(expected), now);
            if !self.queue().advance_recurring(&job.name, expected, next).await? {
                continue;
            }
            let task_id = self.fire(&job).await?;
            reporter.report(WorkerEvent::RecurringFired {
                name: &job.name,
                task_id,
            });
            fired += 1;
        }
        Ok(fired)
    }

    async fn fire(&self, job: &RecurringJob) -> Result<i64, AppError> {
        let record = self
            .runner
            .dispatcher()
            .enqueue(job.task_type, job.args.clone())
            .await?;
        Ok(record.id)
    }

    async fn process_entry<WR: WorkerReporter>(
        &self,
        entry: &QueueEntry,
        token: CancellationToken,
        reporter: &WR,
    ) {
        let envelope = match JobEnvelope::from_payload(&entry.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                let error_msg = format!("Undecodable payload: {e}");
                reporter.report(WorkerEvent::EntryFailed {
                    entry_id: entry.id,
                    error: &error_msg,
                    will_retry: false,
                });
                if let Err(e) = self.queue().fail(entry.id, &error_msg, None).await {
                    tracing::error!(entry_id = %entry.id, error = %e, "Failed to mark entry dead");
                }
                return;
            }
        };

        reporter.report(WorkerEvent::UnitStarted {
            entry_id: entry.id,
            task_type: envelope.task_type,
            task_id: envelope.args.task_id,
        });

        match self.runner.run(&envelope, token).await {
            Ok(RunOutcome::Interrupted) => {
                // Still claimed; the shutdown sweep hands it back to pending.
                tracing::info!(entry_id = %entry.id, "Leaving interrupted entry for release");
            }
            Ok(outcome) => {
                reporter.report(WorkerEvent::UnitFinished {
                    entry_id: entry.id,
                    outcome: &outcome,
                });
                if let Err(e) = self.queue().complete(entry.id).await {
                    tracing::error!(entry_id = %entry.id, error = %e, "Failed to mark entry done");
                }
            }
            Err(e) => {
                let error_msg = e.to_string();
                let can_retry = entry.can_retry() && e.is_retryable();
                reporter.report(WorkerEvent::EntryFailed {
                    entry_id: entry.id,
                    error: &error_msg,
                    will_retry: can_retry,
                });

                let next_retry = if can_retry {
                    Some(entry.calculate_next_retry(&self.config.retry_config))
                } else {
                    None
                };

                if let Err(e) = self.queue().fail(entry.id, &error_msg, next_retry).await {
                    tracing::error!(
                        entry_id = %entry.id,
                        error = %e,
                        "Failed to mark entry as failed"
                    );
                }
            }
        }
    }
}
