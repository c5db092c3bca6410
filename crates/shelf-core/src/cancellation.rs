use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::registry::TaskRegistry;
use crate::task::{Counter, TaskRecord, TaskStats, TaskType};
use crate::task_store::TaskStore;

/// Execution context threaded through a running unit.
///
/// Carries the task id, the local counter snapshot and a cancellation token.
/// The token trips either from the outside (worker shutdown) or the first
/// time a checkpoint observes the operator-cancel sentinel on the record.
pub struct TaskContext<S: TaskStore> {
    registry: TaskRegistry<S>,
    task_id: i64,
    task_type: TaskType,
    item_limit: Option<u32>,
    stats: TaskStats,
    token: CancellationToken,
}

impl<S: TaskStore> TaskContext<S> {
    pub fn new(registry: TaskRegistry<S>, record: &TaskRecord, token: CancellationToken) -> Self {
        Self {
            registry,
            task_id: record.id,
            task_type: record.task_type,
            item_limit: record.item_limit,
            stats: TaskStats::default(),
            token,
        }
    }

    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn item_limit(&self) -> Option<u32> {
        self.item_limit
    }

    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Checkpoint between work items.
    ///
    /// Returns [`AppError::Cancelled`] once the token is tripped or the record
    /// carries the cancellation sentinel. Every call re-checks.
    pub async fn check_not_cancelled(&self) -> Result<(), AppError> {
        if self.token.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if self.registry.is_cancelled(self.task_id).await? {
            tracing::info!(task_id = self.task_id, "Task stopped by operator");
            self.token.cancel();
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    /// Bumps the local snapshot and the persisted counter.
    pub async fn bump(&mut self, counter: Counter) -> Result<(), AppError> {
        self.stats.bump(counter);
        self.registry.increment(self.task_id, counter).await
    }

    pub fn limit_reached(&self) -> bool {
        matches!(self.item_limit, Some(limit) if self.stats.processed >= limit)
    }

    /// Items still allowed under the limit, if any.
    pub fn remaining(&self) -> Option<usize> {
        self.item_limit
            .map(|limit| limit.saturating_sub(self.stats.processed) as usize)
    }
}
