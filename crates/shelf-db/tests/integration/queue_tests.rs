use chrono::{SubsecRound, TimeDelta, Utc};
use serde_json::json;
use shelf_core::job::{EntryState, JobEnvelope, QueueSet, RecurringJob, UnitArgs};
use shelf_core::job_queue::WorkQueue;
use shelf_core::task::TaskType;
use shelf_db::QueueRepository;

use crate::integration::common::setup_test_db;

fn payload(task_id: i64) -> serde_json::Value {
    JobEnvelope::new(
        TaskType::Products,
        UnitArgs {
            task_id: Some(task_id),
            ..UnitArgs::default()
        },
    )
    .to_payload()
}

#[tokio::test]
async fn dispatch_then_claim_sets_running() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);

    let id = repo.dispatch(&payload(1), None).await.unwrap();
    assert_eq!(repo.entries(QueueSet::Live).await.unwrap().len(), 1);

    let claimed = repo.claim("worker-1").await.unwrap().expect("entry should be claimable");
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.state, EntryState::Running);
    assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
    assert_eq!(claimed.queue, "parser");
    assert_eq!(claimed.payload["correlation"]["task_id"], 1);

    assert!(repo.claim("worker-2").await.unwrap().is_none());
}

#[tokio::test]
async fn future_run_at_is_scheduled_and_not_claimable() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);

    repo.dispatch(&payload(2), Some(Utc::now() + TimeDelta::hours(1)))
        .await
        .unwrap();

    assert!(repo.entries(QueueSet::Live).await.unwrap().is_empty());
    assert_eq!(repo.entries(QueueSet::Scheduled).await.unwrap().len(), 1);
    assert!(repo.claim("worker-1").await.unwrap().is_none());
}

#[tokio::test]
async fn fail_with_retry_then_without() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);
    let id = repo.dispatch(&payload(3), None).await.unwrap();
    repo.claim("worker-1").await.unwrap();

    repo.fail(id, "boom", Some(Utc::now() - TimeDelta::seconds(1)))
        .await
        .unwrap();
    let retry = repo.entries(QueueSet::Retry).await.unwrap();
    assert_eq!(retry.len(), 1);
    assert_eq!(retry[0].attempts, 1);
    assert_eq!(retry[0].last_error.as_deref(), Some("boom"));

    // Past run_at: the retry entry is claimable again.
    let again = repo.claim("worker-1").await.unwrap().unwrap();
    assert_eq!(again.id, id);

    repo.fail(id, "fatal", None).await.unwrap();
    assert!(repo.entries(QueueSet::Retry).await.unwrap().is_empty());
    assert!(repo.claim("worker-1").await.unwrap().is_none());
}

#[tokio::test]
async fn remove_skips_running_entries() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);
    let running = repo.dispatch(&payload(4), None).await.unwrap();
    repo.claim("worker-1").await.unwrap();
    let pending = repo.dispatch(&payload(4), None).await.unwrap();

    assert!(!repo.remove(running).await.unwrap());
    assert!(repo.remove(pending).await.unwrap());
    assert!(!repo.remove(pending).await.unwrap());
}

#[tokio::test]
async fn release_returns_running_entries_to_live() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);
    repo.dispatch(&payload(5), None).await.unwrap();
    repo.dispatch(&payload(6), None).await.unwrap();
    repo.claim("worker-1").await.unwrap();
    repo.claim("worker-2").await.unwrap();

    assert_eq!(repo.release_worker_entries("worker-1").await.unwrap(), 1);
    assert_eq!(repo.entries(QueueSet::Live).await.unwrap().len(), 1);
}

#[tokio::test]
async fn completed_entries_leave_every_set() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);
    let id = repo.dispatch(&json!({"wrapped": "categories", "args": []}), None).await.unwrap();
    repo.claim("worker-1").await.unwrap();

    repo.complete(id).await.unwrap();

    for set in QueueSet::ALL {
        assert!(repo.entries(set).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn recurring_register_replace_and_advance() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);
    let due_at = (Utc::now() - TimeDelta::minutes(1)).trunc_subsecs(0);
    let mut job = RecurringJob {
        name: "parser_bestsellers".into(),
        cron: "0 3 * * *".into(),
        task_type: TaskType::Bestsellers,
        args: UnitArgs::with_limit(Some(10)),
        next_fire_at: Some(due_at),
    };
    repo.register_recurring(&job).await.unwrap();
    job.cron = "0 4 * * *".into();
    repo.register_recurring(&job).await.unwrap();

    let listed = repo.list_recurring().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].cron, "0 4 * * *");
    assert_eq!(listed[0].args.limit, Some(10));

    let due = repo.due_recurring(Utc::now()).await.unwrap();
    assert_eq!(due.len(), 1);

    let next = Some(Utc::now() + TimeDelta::hours(1));
    assert!(repo.advance_recurring(&job.name, due_at, next).await.unwrap());
    assert!(!repo.advance_recurring(&job.name, due_at, next).await.unwrap());
    assert!(repo.due_recurring(Utc::now()).await.unwrap().is_empty());

    assert!(repo.remove_recurring(&job.name).await.unwrap());
    assert!(!repo.remove_recurring(&job.name).await.unwrap());
}

#[tokio::test]
async fn unreadable_recurring_args_fall_back_to_defaults() {
    let (pool, _container) = setup_test_db().await;
    sqlx::query(
        r#"INSERT INTO recurring_jobs (name, cron, task_type, args) VALUES ($1, $2, $3, $4)"#,
    )
    .bind("parser_products")
    .bind("0 5 * * *")
    .bind("products")
    .bind(json!({"limit": "many"}))
    .execute(&pool)
    .await
    .unwrap();

    let listed = QueueRepository::new(pool).list_recurring().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].task_type, TaskType::Products);
    assert_eq!(listed[0].args, UnitArgs::default());
    assert!(listed[0].next_fire_at.is_none());
}
