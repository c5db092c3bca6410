pub mod catalog_repository;
pub mod config;
pub mod database;
pub mod queue_repository;
pub mod schedule_repository;
pub mod task_repository;

pub use catalog_repository::CatalogRepository;
pub use config::DatabaseConfig;
pub use database::Database;
pub use queue_repository::QueueRepository;
pub use schedule_repository::ScheduleRepository;
pub use task_repository::TaskRepository;
