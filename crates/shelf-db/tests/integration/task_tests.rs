use shelf_core::task::{CANCELLED_SENTINEL, Counter, NewTask, TaskStats, TaskStatus, TaskType};
use shelf_core::task_store::TaskStore;
use shelf_db::TaskRepository;

use crate::integration::common::setup_test_db;

fn new_task(task_type: TaskType, limit: Option<u32>) -> NewTask {
    NewTask {
        task_type,
        item_limit: limit,
    }
}

#[tokio::test]
async fn insert_creates_pending_record() {
    let (pool, _container) = setup_test_db().await;
    let repo = TaskRepository::new(pool);

    let record = repo.insert(new_task(TaskType::Products, Some(25))).await.unwrap();

    assert_eq!(record.task_type, TaskType::Products);
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.item_limit, Some(25));
    assert_eq!(record.processed, 0);
    assert!(record.started_at.is_none());
    assert!(record.queue_correlation_id.is_none());
}

#[tokio::test]
async fn running_then_completed_keeps_higher_counters() {
    let (pool, _container) = setup_test_db().await;
    let repo = TaskRepository::new(pool);
    let record = repo.insert(new_task(TaskType::Categories, None)).await.unwrap();

    assert!(repo.mark_running(record.id).await.unwrap());
    assert!(!repo.mark_running(record.id).await.unwrap());

    for _ in 0..4 {
        repo.increment(record.id, Counter::Processed).await.unwrap();
    }
    let stale = TaskStats {
        processed: 2,
        created: 3,
        ..TaskStats::default()
    };
    assert!(repo.mark_completed(record.id, &stale).await.unwrap());

    let stored = repo.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.processed, 4);
    assert_eq!(stored.created, 3);
    assert!(stored.started_at.is_some());
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn terminal_records_ignore_further_transitions() {
    let (pool, _container) = setup_test_db().await;
    let repo = TaskRepository::new(pool);
    let record = repo.insert(new_task(TaskType::Bestsellers, None)).await.unwrap();

    assert!(repo.mark_failed(record.id, CANCELLED_SENTINEL).await.unwrap());
    assert!(!repo.mark_completed(record.id, &TaskStats::default()).await.unwrap());
    assert!(!repo.mark_failed(record.id, "later error").await.unwrap());
    assert!(!repo.mark_running(record.id).await.unwrap());

    let stored = repo.get(record.id).await.unwrap().unwrap();
    assert!(stored.is_cancelled());
}

#[tokio::test]
async fn increment_applies_after_terminal_state() {
    let (pool, _container) = setup_test_db().await;
    let repo = TaskRepository::new(pool);
    let record = repo.insert(new_task(TaskType::Products, None)).await.unwrap();
    repo.mark_failed(record.id, CANCELLED_SENTINEL).await.unwrap();

    repo.increment(record.id, Counter::Errors).await.unwrap();

    assert_eq!(repo.get(record.id).await.unwrap().unwrap().error_count, 1);
    assert!(repo.increment(9999, Counter::Errors).await.is_err());
}

#[tokio::test]
async fn correlation_id_is_written_once() {
    let (pool, _container) = setup_test_db().await;
    let repo = TaskRepository::new(pool);
    let record = repo.insert(new_task(TaskType::Products, None)).await.unwrap();

    assert!(repo.set_correlation_id(record.id, "first").await.unwrap());
    assert!(!repo.set_correlation_id(record.id, "second").await.unwrap());

    let stored = repo.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.queue_correlation_id.as_deref(), Some("first"));
}

#[tokio::test]
async fn list_recent_is_newest_first() {
    let (pool, _container) = setup_test_db().await;
    let repo = TaskRepository::new(pool);
    let first = repo.insert(new_task(TaskType::Categories, None)).await.unwrap();
    let second = repo.insert(new_task(TaskType::Products, None)).await.unwrap();
    let third = repo.insert(new_task(TaskType::ProductImages, None)).await.unwrap();

    let recent = repo.list_recent(2).await.unwrap();
    let ids: Vec<i64> = recent.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![third.id, second.id]);
    assert!(!ids.contains(&first.id));
}

#[tokio::test]
async fn get_missing_returns_none() {
    let (pool, _container) = setup_test_db().await;
    let repo = TaskRepository::new(pool);

    assert!(repo.get(42).await.unwrap().is_none());
}
