use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved `error_message` marking a task stopped by an operator.
pub const CANCELLED_SENTINEL: &str = "Stopped manually by operator";

/// Kind of acquisition work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Categories,
    Products,
    Bestsellers,
    PopularCategories,
    CategoryImages,
    ProductImages,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::Categories,
        TaskType::Products,
        TaskType::Bestsellers,
        TaskType::PopularCategories,
        TaskType::CategoryImages,
        TaskType::ProductImages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Categories => "categories",
            TaskType::Products => "products",
            TaskType::Bestsellers => "bestsellers",
            TaskType::PopularCategories => "popular_categories",
            TaskType::CategoryImages => "category_images",
            TaskType::ProductImages => "product_images",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "categories" | "category_sync" => Ok(TaskType::Categories),
            "products" | "product_sync" => Ok(TaskType::Products),
            "bestsellers" | "bestseller_sync" => Ok(TaskType::Bestsellers),
            "popular_categories" | "popular_category_sync" => Ok(TaskType::PopularCategories),
            "category_images" | "category_image_sync" => Ok(TaskType::CategoryImages),
            "product_images" | "product_image_sync" => Ok(TaskType::ProductImages),
            _ => Err(format!("Unknown task type: {}", s)),
        }
    }
}

/// Lifecycle state of a task record.
///
/// Transitions only go `pending -> running -> {completed, failed}`; the
/// cancel path may also move `pending -> failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// Monotonic counters carried by a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Processed,
    Created,
    Updated,
    Errors,
}

impl Counter {
    /// Column name in the task table.
    pub fn column(&self) -> &'static str {
        match self {
            Counter::Processed => "processed",
            Counter::Created => "created",
            Counter::Updated => "updated",
            Counter::Errors => "error_count",
        }
    }
}

/// Counter snapshot accumulated by a running unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub processed: u32,
    pub created: u32,
    pub updated: u32,
    pub errors: u32,
}

impl TaskStats {
    pub fn bump(&mut self, counter: Counter) {
        let slot = match counter {
            Counter::Processed => &mut self.processed,
            Counter::Created => &mut self.created,
            Counter::Updated => &mut self.updated,
            Counter::Errors => &mut self.errors,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Durable record tracking one acquisition run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub item_limit: Option<u32>,
    pub processed: u32,
    pub created: u32,
    pub updated: u32,
    pub error_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub queue_correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// True iff the record was failed by an operator cancel.
    pub fn is_cancelled(&self) -> bool {
        self.status == TaskStatus::Failed
            && self.error_message.as_deref() == Some(CANCELLED_SENTINEL)
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            processed: self.processed,
            created: self.created,
            updated: self.updated,
            errors: self.error_count,
        }
    }

    pub fn duration(&self) -> Option<chrono::TimeDelta> {
        Some(self.completed_at? - self.started_at?)
    }
}

/// Request to create a new task record.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub item_limit: Option<u32>,
}
