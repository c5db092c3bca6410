use shelf_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::catalog_repository::CatalogRepository;
use crate::config::DatabaseConfig;
use crate::queue_repository::QueueRepository;
use crate::schedule_repository::ScheduleRepository;
use crate::task_repository::TaskRepository;

/// Central database facade: owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Database connection failed");
                AppError::DatabaseError(format!("Failed to connect: {e}"))
            })?;

        tracing::debug!(max_connections = config.max_connections, "Database pool ready");
        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Migration failed");
                AppError::DatabaseError(format!("Migration failed: {e}"))
            })?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    pub fn task_repo(&self) -> TaskRepository {
        TaskRepository::new(self.pool.clone())
    }

    pub fn queue_repo(&self) -> QueueRepository {
        QueueRepository::new(self.pool.clone())
    }

    pub fn schedule_repo(&self) -> ScheduleRepository {
        ScheduleRepository::new(self.pool.clone())
    }

    pub fn catalog_repo(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
