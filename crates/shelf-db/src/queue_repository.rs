use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use shelf_core::error::AppError;
use shelf_core::job::{QueueEntry, QueueSet, RecurringJob, UNIT_QUEUE, UnitArgs};
use shelf_core::job_queue::WorkQueue;

/// PostgreSQL-backed work queue using `SELECT FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct QueueRepository {
    pool: Pool<Postgres>,
}

impl QueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    queue: String,
    payload: Value,
    state: String,
    run_at: DateTime<Utc>,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    worker_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for QueueEntry {
    type Error = AppError;

    fn try_from(row: EntryRow) -> Result<Self, AppError> {
        Ok(QueueEntry {
            id: row.id,
            queue: row.queue,
            payload: row.payload,
            state: row.state.parse().map_err(AppError::DatabaseError)?,
            run_at: row.run_at,
            attempts: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            last_error: row.last_error,
            worker_id: row.worker_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecurringRow {
    name: String,
    cron: String,
    task_type: String,
    args: Value,
    next_fire_at: Option<DateTime<Utc>>,
}

impl TryFrom<RecurringRow> for RecurringJob {
    type Error = AppError;

    fn try_from(row: RecurringRow) -> Result<Self, AppError> {
        let args = serde_json::from_value::<UnitArgs>(row.args).unwrap_or_else(|e| {
            tracing::warn!(
                name = %row.name,
                error = %e,
                "Unreadable recurring args, using defaults"
            );
            UnitArgs::default()
        });
        Ok(RecurringJob {
            name: row.name,
            cron: row.cron,
            task_type: row.task_type.parse().map_err(AppError::DatabaseError)?,
            args,
            next_fire_at: row.next_fire_at,
        })
    }
}

impl WorkQueue for QueueRepository {
    async fn dispatch(
        &self,
        payload: &Value,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid, AppError> {
        let queue = payload
            .get("queue")
            .and_then(Value::as_str)
            .unwrap_or(UNIT_QUEUE);

        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO queue_entries (queue, payload, state, run_at)
            VALUES (
                $1, $2,
                CASE WHEN $3::timestamptz > NOW() THEN 'scheduled' ELSE 'pending' END,
                COALESCE($3::timestamptz, NOW())
            )
            RETURNING id
            "#,
        )
        .bind(queue)
        .bind(payload)
        .bind(run_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(id)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<QueueEntry>, AppError> {
        let row = sqlx::query_as::<_, EntryRow>(
            r#"
            UPDATE queue_entries
            SET state = 'running', worker_id = $1, updated_at = NOW()
            WHERE id = (
                SELECT id FROM queue_entries
                WHERE state = 'pending'
                   OR (state IN ('scheduled', 'retry') AND run_at <= NOW())
                ORDER BY (state = 'pending') DESC, run_at ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    async fn complete(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE queue_entries
            SET state = 'done', last_error = NULL, worker_id = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn fail(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE queue_entries
            SET
                state = CASE WHEN $3::timestamptz IS NOT NULL THEN 'retry' ELSE 'dead' END,
                attempts = attempts + 1,
                run_at = COALESCE($3::timestamptz, run_at),
                last_error = $2,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(retry_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn entries(&self, set: QueueSet) -> Result<Vec<QueueEntry>, AppError> {
        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT * FROM queue_entries
            WHERE state = $1
            ORDER BY run_at ASC, created_at ASC
            "#,
        )
        .bind(set.state().as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn remove(&self, id: Uuid) -> Result<bool, AppError> {
        let result =
            sqlx::query(r#"DELETE FROM queue_entries WHERE id = $1 AND state <> 'running'"#)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_worker_entries(&self, worker_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_entries
            SET state = 'pending', worker_id = NULL, updated_at = NOW()
            WHERE worker_id = $1 AND state = 'running'
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(%worker_id, error = %e, "Failed to release claimed entries");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(result.rows_affected())
    }

    async fn register_recurring(&self, job: &RecurringJob) -> Result<(), AppError> {
        let args = serde_json::to_value(&job.args)?;
        sqlx::query(
            r#"
            INSERT INTO recurring_jobs (name, cron, task_type, args, next_fire_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE
            SET cron = EXCLUDED.cron,
                task_type = EXCLUDED.task_type,
                args = EXCLUDED.args,
                next_fire_at = EXCLUDED.next_fire_at,
                updated_at = NOW()
            "#,
        )
        .bind(&job.name)
        .bind(&job.cron)
        .bind(job.task_type.as_str())
        .bind(args)
        .bind(job.next_fire_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn remove_recurring(&self, name: &str) -> Result<bool, AppError> {
        let result = sqlx::query(r#"DELETE FROM recurring_jobs WHERE name = $1"#)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_recurring(&self) -> Result<Vec<RecurringJob>, AppError> {
        let rows = sqlx::query_as::<_, RecurringRow>(
            r#"SELECT name, cron, task_type, args, next_fire_at FROM recurring_jobs ORDER BY name"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn due_recurring(&self, now: DateTime<Utc>) -> Result<Vec<RecurringJob>, AppError> {
        let rows = sqlx::query_as::<_, RecurringRow>(
            r#"
            SELECT name, cron, task_type, args, next_fire_at FROM recurring_jobs
            WHERE next_fire_at IS NOT NULL AND next_fire_at <= $1
            ORDER BY next_fire_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn advance_recurring(
        &self,
        name: &str,
        expected: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE recurring_jobs
            SET next_fire_at = $3, updated_at = NOW()
            WHERE name = $1 AND next_fire_at = $2
            "#,
        )
        .bind(name)
        .bind(expected)
        .bind(next)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
