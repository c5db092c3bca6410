use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use shelf_core::error::AppError;
use shelf_core::schedule::{CronDefinition, ScheduleStore};
use shelf_core::task::TaskType;

/// Cron definitions in `cron_schedules`, one row per task type.
#[derive(Clone)]
pub struct ScheduleRepository {
    pool: Pool<Postgres>,
}

impl ScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    task_type: String,
    schedule: String,
    enabled: bool,
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
}

impl TryFrom<ScheduleRow> for CronDefinition {
    type Error = AppError;

    fn try_from(row: ScheduleRow) -> Result<Self, AppError> {
        Ok(CronDefinition {
            task_type: row.task_type.parse().map_err(AppError::DatabaseError)?,
            schedule: row.schedule,
            enabled: row.enabled,
            last_run_at: row.last_run_at,
            next_run_at: row.next_run_at,
        })
    }
}

impl ScheduleStore for ScheduleRepository {
    async fn list(&self) -> Result<Vec<CronDefinition>, AppError> {
        let rows = sqlx::query_as::<_, ScheduleRow>(
            r#"
            SELECT task_type, schedule, enabled, last_run_at, next_run_at
            FROM cron_schedules
            ORDER BY task_type
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get(&self, task_type: TaskType) -> Result<Option<CronDefinition>, AppError> {
        let row = sqlx::query_as::<_, ScheduleRow>(
            r#"
            SELECT task_type, schedule, enabled, last_run_at, next_run_at
            FROM cron_schedules
            WHERE task_type = $1
            "#,
        )
        .bind(task_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    async fn save(&self, definition: &CronDefinition) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO cron_schedules (task_type, schedule, enabled, last_run_at, next_run_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (task_type) DO UPDATE
            SET schedule = EXCLUDED.schedule,
                enabled = EXCLUDED.enabled,
                last_run_at = EXCLUDED.last_run_at,
                next_run_at = EXCLUDED.next_run_at,
                updated_at = NOW()
            "#,
        )
        .bind(definition.task_type.as_str())
        .bind(&definition.schedule)
        .bind(definition.enabled)
        .bind(definition.last_run_at)
        .bind(definition.next_run_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}
