use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use shelf_core::error::AppError;
use shelf_core::task::{Counter, NewTask, TaskRecord, TaskStats};
use shelf_core::task_store::TaskStore;

/// PostgreSQL-backed task records (`parser_tasks`).
///
/// Terminal transitions carry their status guard in the `WHERE` clause so a
/// late or replayed write never overwrites a terminal record.
#[derive(Clone)]
pub struct TaskRepository {
    pool: Pool<Postgres>,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    task_type: String,
    status: String,
    item_limit: Option<i32>,
    processed: i32,
    created: i32,
    updated: i32,
    error_count: i32,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    queue_correlation_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = AppError;

    fn try_from(row: TaskRow) -> Result<Self, AppError> {
        Ok(TaskRecord {
            id: row.id,
            task_type: row.task_type.parse().map_err(AppError::DatabaseError)?,
            status: row.status.parse().map_err(AppError::DatabaseError)?,
            item_limit: row.item_limit.map(|l| l.max(0) as u32),
            processed: row.processed.max(0) as u32,
            created: row.created.max(0) as u32,
            updated: row.updated.max(0) as u32,
            error_count: row.error_count.max(0) as u32,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            queue_correlation_id: row.queue_correlation_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl TaskStore for TaskRepository {
    async fn insert(&self, task: NewTask) -> Result<TaskRecord, AppError> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            INSERT INTO parser_tasks (task_type, item_limit)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(task.task_type.as_str())
        .bind(task.item_limit.map(to_i32))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.try_into()
    }

    async fn get(&self, id: i64) -> Result<Option<TaskRecord>, AppError> {
        let row = sqlx::query_as::<_, TaskRow>(r#"SELECT * FROM parser_tasks WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    async fn mark_running(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE parser_tasks
            SET status = 'running', started_at = NOW(), error_message = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(&self, id: i64, stats: &TaskStats) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE parser_tasks
            SET status = 'completed',
                completed_at = NOW(),
                updated_at = NOW(),
                processed = GREATEST(processed, $2),
                created = GREATEST(created, $3),
                updated = GREATEST(updated, $4),
                error_count = GREATEST(error_count, $5)
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id)
        .bind(to_i32(stats.processed))
        .bind(to_i32(stats.created))
        .bind(to_i32(stats.updated))
        .bind(to_i32(stats.errors))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: i64, message: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE parser_tasks
            SET status = 'failed', completed_at = NOW(), error_message = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment(&self, id: i64, counter: Counter) -> Result<(), AppError> {
        let column = counter.column();
        let sql = format!(
            "UPDATE parser_tasks SET {column} = {column} + 1, updated_at = NOW() WHERE id = $1"
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    async fn set_correlation_id(&self, id: i64, correlation_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE parser_tasks
            SET queue_correlation_id = $2, updated_at = NOW()
            WHERE id = $1 AND queue_correlation_id IS NULL
            "#,
        )
        .bind(id)
        .bind(correlation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<TaskRecord>, AppError> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT * FROM parser_tasks
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
