use std::future::Future;

use crate::error::AppError;
use crate::task::{Counter, NewTask, TaskRecord, TaskStats};

/// Persistence interface for task records.
///
/// Terminal transitions are guarded at the data layer: they only apply while
/// the record is still `pending` or `running`, and report whether a row was
/// changed. Replaying them is therefore a no-op.
pub trait TaskStore: Send + Sync + Clone {
    fn insert(&self, task: NewTask) -> impl Future<Output = Result<TaskRecord, AppError>> + Send;

    fn get(&self, id: i64) -> impl Future<Output = Result<Option<TaskRecord>, AppError>> + Send;

    /// `pending -> running`: stamps `started_at`, clears `error_message`.
    fn mark_running(&self, id: i64) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// `{pending, running} -> completed`: stamps `completed_at` and copies
    /// counters without letting any of them decrease.
    fn mark_completed(
        &self,
        id: i64,
        stats: &TaskStats,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// `{pending, running} -> failed`: stamps `completed_at`, stores `message`.
    fn mark_failed(
        &self,
        id: i64,
        message: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn increment(
        &self,
        id: i64,
        counter: Counter,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Sets the queue correlation id unless one is already present.
    fn set_correlation_id(
        &self,
        id: i64,
        correlation_id: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Newest first.
    fn list_recent(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<TaskRecord>, AppError>> + Send;
}
