use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{QueueEntry, QueueSet, RecurringJob};

/// Persistent work queue for acquisition units.
///
/// Implementations must support atomic claiming via `SELECT FOR UPDATE SKIP LOCKED`
/// or equivalent to prevent multiple workers from claiming the same entry.
pub trait WorkQueue: Send + Sync + Clone {
    /// Enqueues a payload. With `run_at` in the future the entry is scheduled.
    /// Returns the native job id.
    fn dispatch(
        &self,
        payload: &Value,
        run_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    /// Atomically claims the next live entry, or a scheduled/retry entry
    /// whose `run_at` has passed.
    fn claim(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<QueueEntry>, AppError>> + Send;

    fn complete(&self, id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    /// With `retry_at` the entry moves to the retry set; otherwise it is dead.
    fn fail(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Introspection over one collection.
    fn entries(
        &self,
        set: QueueSet,
    ) -> impl Future<Output = Result<Vec<QueueEntry>, AppError>> + Send;

    /// Removes an entry that is not running. Returns false if nothing matched.
    fn remove(&self, id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Releases all entries held by a specific worker (for graceful shutdown).
    fn release_worker_entries(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Creates or replaces the registration with the same name.
    fn register_recurring(
        &self,
        job: &RecurringJob,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn remove_recurring(&self, name: &str) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn list_recurring(&self) -> impl Future<Output = Result<Vec<RecurringJob>, AppError>> + Send;

    /// Registrations whose `next_fire_at <= now`.
    fn due_recurring(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<RecurringJob>, AppError>> + Send;

    /// Compare-and-set on `next_fire_at`. Exactly one caller wins a firing.
    fn advance_recurring(
        &self,
        name: &str,
        expected: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;
}
