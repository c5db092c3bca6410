use chrono::{SubsecRound, TimeDelta, Utc};
use shelf_core::schedule::{CronDefinition, ScheduleStore};
use shelf_core::task::TaskType;
use shelf_db::ScheduleRepository;

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn save_inserts_then_replaces() {
    let (pool, _container) = setup_test_db().await;
    let repo = ScheduleRepository::new(pool);

    let mut definition = CronDefinition::new(TaskType::Categories, "0 2 * * *", true);
    repo.save(&definition).await.unwrap();

    definition.schedule = "30 5 * * *".into();
    definition.enabled = false;
    definition.last_run_at = Some(Utc::now().trunc_subsecs(0));
    definition.refresh(Utc::now());
    repo.save(&definition).await.unwrap();

    let stored = repo.get(TaskType::Categories).await.unwrap().unwrap();
    assert_eq!(stored.schedule, "30 5 * * *");
    assert!(!stored.enabled);
    assert!(stored.next_run_at.is_none());
    assert_eq!(stored.last_run_at, definition.last_run_at);
    assert_eq!(repo.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn list_covers_every_task_type_once() {
    let (pool, _container) = setup_test_db().await;
    let repo = ScheduleRepository::new(pool);

    for (i, task_type) in TaskType::ALL.into_iter().enumerate() {
        repo.save(&CronDefinition::new(task_type, format!("{i} 3 * * *"), true))
            .await
            .unwrap();
    }

    let listed = repo.list().await.unwrap();
    assert_eq!(listed.len(), TaskType::ALL.len());
    assert!(listed.iter().all(|d| d.next_run_at.unwrap() > Utc::now() - TimeDelta::seconds(1)));
}

#[tokio::test]
async fn get_unknown_type_is_none() {
    let (pool, _container) = setup_test_db().await;
    let repo = ScheduleRepository::new(pool);

    assert!(repo.get(TaskType::ProductImages).await.unwrap().is_none());
}
