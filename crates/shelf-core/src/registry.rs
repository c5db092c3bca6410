use crate::error::AppError;
use crate::task::{Counter, NewTask, TaskRecord, TaskStats, TaskType};
use crate::task_store::TaskStore;

/// Task state machine on top of a [`TaskStore`].
#[derive(Clone)]
pub struct TaskRegistry<S: TaskStore> {
    store: S,
}

impl<S: TaskStore> TaskRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a `pending` record. A limit of zero is rejected.
    pub async fn create(
        &self,
        task_type: TaskType,
        item_limit: Option<u32>,
    ) -> Result<TaskRecord, AppError> {
        if item_limit == Some(0) {
            return Err(AppError::InvalidInput(
                "item limit must be a positive integer".into(),
            ));
        }

        let record = self
            .store
            .insert(NewTask {
                task_type,
                item_limit,
            })
            .await?;

        tracing::info!(task_id = record.id, %task_type, ?item_limit, "Task created");
        Ok(record)
    }

    /// Loads a record or fails with [`AppError::NotFound`].
    pub async fn get(&self, id: i64) -> Result<TaskRecord, AppError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {id}")))
    }

    pub async fn list_recent(&self, limit: usize) -> Result<Vec<TaskRecord>, AppError> {
        self.store.list_recent(limit).await
    }

    /// Returns false when the record already left `pending`.
    pub async fn mark_running(&self, id: i64) -> Result<bool, AppError> {
        let changed = self.store.mark_running(id).await?;
        if !changed {
            tracing::debug!(task_id = id, "mark_running skipped: task is not pending");
        }
        Ok(changed)
    }

    pub async fn mark_completed(&self, id: i64, stats: &TaskStats) -> Result<bool, AppError> {
        let changed = self.store.mark_completed(id, stats).await?;
        if !changed {
            tracing::debug!(task_id = id, "mark_completed skipped: task already terminal");
        }
        Ok(changed)
    }

    pub async fn mark_failed(&self, id: i64, message: &str) -> Result<bool, AppError> {
        let changed = self.store.mark_failed(id, message).await?;
        if !changed {
            tracing::debug!(task_id = id, "mark_failed skipped: task already terminal");
        }
        Ok(changed)
    }

    pub async fn increment(&self, id: i64, counter: Counter) -> Result<(), AppError> {
        self.store.increment(id, counter).await
    }

    pub async fn set_correlation_id(
        &self,
        id: i64,
        correlation_id: &str,
    ) -> Result<bool, AppError> {
        self.store.set_correlation_id(id, correlation_id).await
    }

    /// Reloads the record and checks for the operator-cancel sentinel.
    pub async fn is_cancelled(&self, id: i64) -> Result<bool, AppError> {
        Ok(self.get(id).await?.is_cancelled())
    }
}
