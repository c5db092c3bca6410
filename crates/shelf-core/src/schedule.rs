//! Operator-defined cron schedules and their mirror as native recurring
//! registrations on the work queue.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::TaskDispatcher;
use crate::error::AppError;
use crate::job::{RECURRING_PREFIX, RecurringJob, UnitArgs, recurring_name, recurring_task_type};
use crate::job_queue::WorkQueue;
use crate::task::{TaskRecord, TaskType};
use crate::task_store::TaskStore;

/// One cron definition per task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronDefinition {
    pub task_type: TaskType,
    /// Five-field (`m h dom mon dow`) or six/seven-field cron expression.
    pub schedule: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl CronDefinition {
    pub fn new(task_type: TaskType, schedule: impl Into<String>, enabled: bool) -> Self {
        let mut definition = Self {
            task_type,
            schedule: schedule.into(),
            enabled,
            last_run_at: None,
            next_run_at: None,
        };
        definition.refresh(Utc::now());
        definition
    }

    /// Recomputes `next_run_at` from the expression.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.next_run_at = compute_next_run(&self.schedule, self.enabled, self.last_run_at, now);
    }

    /// Stamps `last_run_at` and moves `next_run_at` one period on.
    pub fn mark_as_run(&mut self, now: DateTime<Utc>) {
        self.last_run_at = Some(now);
        self.refresh(now);
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_some_and(|next| next <= now)
    }
}

fn parse_schedule(expression: &str) -> Option<cron::Schedule> {
    let trimmed = expression.trim();
    let normalized = match trimmed.split_whitespace().count() {
        5 => format!("0 {trimmed}"),
        6 | 7 => trimmed.to_string(),
        _ => return None,
    };
    cron::Schedule::from_str(&normalized).ok()
}

/// Whether `expression` parses as a cron schedule.
pub fn is_valid_schedule(expression: &str) -> bool {
    parse_schedule(expression).is_some()
}

/// Next fire time strictly after `max(last_run, now)`.
///
/// Disabled definitions and unparsable expressions yield `None`.
pub fn compute_next_run(
    expression: &str,
    enabled: bool,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !enabled {
        return None;
    }
    let Some(schedule) = parse_schedule(expression) else {
        tracing::warn!(schedule = expression, "Unparsable cron expression, schedule will not fire");
        return None;
    };
    let base = last_run.map_or(now, |last| last.max(now));
    schedule.after(&base).next()
}

/// Persistence for cron definitions, keyed by task type.
pub trait ScheduleStore: Send + Sync + Clone {
    fn list(&self) -> impl Future<Output = Result<Vec<CronDefinition>, AppError>> + Send;

    fn get(
        &self,
        task_type: TaskType,
    ) -> impl Future<Output = Result<Option<CronDefinition>, AppError>> + Send;

    /// Insert or replace the definition for its task type.
    fn save(
        &self,
        definition: &CronDefinition,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub registered: Vec<String>,
    pub removed: Vec<String>,
}

/// Keeps recurring registrations in line with the stored definitions and
/// fires due definitions on demand.
#[derive(Clone)]
pub struct ScheduleSynchronizer<C, S, Q>
where
    C: ScheduleStore,
    S: TaskStore,
    Q: WorkQueue,
{
    schedules: C,
    dispatcher: TaskDispatcher<S, Q>,
}

impl<C, S, Q> ScheduleSynchronizer<C, S, Q>
where
    C: ScheduleStore,
    S: TaskStore,
    Q: WorkQueue,
{
    pub fn new(schedules: C, dispatcher: TaskDispatcher<S, Q>) -> Self {
        Self {
            schedules,
            dispatcher,
        }
    }

    pub fn schedules(&self) -> &C {
        &self.schedules
    }

    /// Creates or updates the definition for `task_type`.
    ///
    /// An unparsable expression is stored as given and never fires.
    pub async fn set(
        &self,
        task_type: TaskType,
        expression: &str,
        enabled: bool,
    ) -> Result<CronDefinition, AppError> {
        if !is_valid_schedule(expression) {
            tracing::warn!(%task_type, schedule = expression, "Saving unparsable cron expression");
        }

        let mut definition = match self.schedules.get(task_type).await? {
            Some(existing) => existing,
            None => CronDefinition::new(task_type, expression, enabled),
        };
        definition.schedule = expression.trim().to_string();
        definition.enabled = enabled;
        definition.refresh(Utc::now());

        self.schedules.save(&definition).await?;
        tracing::info!(%task_type, schedule = %definition.schedule, enabled, "Schedule saved");
        Ok(definition)
    }

    /// Registers every enabled definition as `parser_<type>` and drops
    /// registrations of ours whose type is disabled or gone.
    pub async fn sync_all(
        &self,
        definitions: &[CronDefinition],
        now: DateTime<Utc>,
    ) -> Result<SyncReport, AppError> {
        let queue = self.dispatcher.queue();
        let existing: HashMap<String, RecurringJob> = queue
            .list_recurring()
            .await?
            .into_iter()
            .map(|job| (job.name.clone(), job))
            .collect();

        let mut report = SyncReport::default();
        let mut enabled = HashSet::new();

        for definition in definitions.iter().filter(|d| d.enabled) {
            let name = recurring_name(definition.task_type);
            enabled.insert(definition.task_type);

            // A pending firing survives re-registration with an unchanged expression.
            let next_fire_at = match existing.get(&name) {
                Some(job) if job.cron == definition.schedule && job.next_fire_at.is_some() => {
                    job.next_fire_at
                }
                _ => compute_next_run(&definition.schedule, true, None, now),
            };

            queue
                .register_recurring(&RecurringJob {
                    name: name.clone(),
                    cron: definition.schedule.clone(),
                    task_type: definition.task_type,
                    args: UnitArgs::default(),
                    next_fire_at,
                })
                .await?;
            report.registered.push(name);
        }

        for name in existing.keys().filter(|n| n.starts_with(RECURRING_PREFIX)) {
            let keep = recurring_task_type(name).is_some_and(|t| enabled.contains(&t));
            if !keep && queue.remove_recurring(name).await? {
                tracing::info!(%name, "Stale recurring registration removed");
                report.removed.push(name.clone());
            }
        }

        tracing::debug!(
            registered = report.registered.len(),
            removed = report.removed.len(),
            "Schedules synchronized"
        );
        Ok(report)
    }

    /// Enqueues one unit per due definition and persists the advanced run times.
    pub async fn run_due(
        &self,
        definitions: &[CronDefinition],
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, AppError> {
        let mut enqueued = Vec::new();
        for definition in definitions.iter().filter(|d| d.is_due(now)) {
            let record = self
                .dispatcher
                .enqueue(definition.task_type, UnitArgs::default())
                .await?;

            let mut updated = definition.clone();
            updated.mark_as_run(now);
            self.schedules.save(&updated).await?;

            tracing::info!(
                task_type = %definition.task_type,
                task_id = record.id,
                next_run_at = ?updated.next_run_at,
                "Scheduled unit enqueued"
            );
            enqueued.push(record);
        }
        Ok(enqueued)
    }

    pub async fn sync_schedules(&self) -> Result<SyncReport, AppError> {
        let definitions = self.schedules.list().await?;
        self.sync_all(&definitions, Utc::now()).await
    }

    pub async fn run_due_schedules(&self) -> Result<Vec<TaskRecord>, AppError> {
        let definitions = self.schedules.list().await?;
        self.run_due(&definitions, Utc::now()).await
    }
}
