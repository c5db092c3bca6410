use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::AppError;
use crate::fields::{first_present, first_str, lookup};
use crate::task::TaskType;

/// Outer job class every envelope is dispatched as.
pub const ENVELOPE_CLASS: &str = "UnitJobWrapper";
/// Queue name acquisition units run on.
pub const UNIT_QUEUE: &str = "parser";

/// Arguments of one acquisition unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitArgs {
    /// Legacy payloads carry the id as a string.
    #[serde(
        default,
        deserialize_with = "task_id_from_any",
        skip_serializing_if = "Option::is_none"
    )]
    pub task_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Narrows product sync to one category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// Narrows product-image sync to one product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

impl UnitArgs {
    pub fn with_limit(limit: Option<u32>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }
}

/// Dispatch envelope stored as a queue entry's payload.
///
/// ```json
/// {"class": "UnitJobWrapper", "wrapped": "products", "queue": "parser",
///  "correlation": {"task_id": 7},
///  "args": [{"job_class": "products", "arguments": [{"task_id": 7, "limit": 10}]}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEnvelope {
    pub task_type: TaskType,
    pub args: UnitArgs,
}

impl JobEnvelope {
    pub fn new(task_type: TaskType, args: UnitArgs) -> Self {
        Self { task_type, args }
    }

    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "class": ENVELOPE_CLASS,
            "wrapped": self.task_type.as_str(),
            "queue": UNIT_QUEUE,
            "args": [{
                "job_class": self.task_type.as_str(),
                "arguments": [self.args],
            }],
        });
        if let Some(task_id) = self.args.task_id {
            payload["correlation"] = json!({ "task_id": task_id });
        }
        payload
    }

    /// Decodes the wrapped shape and the flat legacy shape
    /// (`{"wrapped": .., "args": [{"task_id": ..}]}`).
    pub fn from_payload(payload: &Value) -> Result<Self, AppError> {
        let type_paths: &[&[&str]] = &[&["wrapped"], &["args", "0", "job_class"], &["task_type"]];
        let task_type = first_str(payload, type_paths)
            .ok_or_else(|| AppError::InvalidInput("job payload has no task type".into()))?
            .parse::<TaskType>()
            .map_err(AppError::InvalidInput)?;

        let args_paths: &[&[&str]] = &[&["args", "0", "arguments", "0"], &["args", "0"]];
        let args = match first_present(payload, args_paths) {
            Some(raw) => serde_json::from_value::<UnitArgs>(raw.clone())?,
            None => UnitArgs::default(),
        };

        Ok(Self { task_type, args })
    }
}

fn as_task_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn task_id_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => as_task_id(&raw)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid task id: {raw}"))),
    }
}

/// Task ids embedded anywhere a unit's arguments can live in a payload:
/// the correlation stamp, `args[*].task_id`, `args[*].arguments[*].task_id`.
pub fn payload_task_ids(payload: &Value) -> Vec<i64> {
    let mut ids = Vec::new();
    ids.extend(lookup(payload, &["correlation", "task_id"]).and_then(as_task_id));

    let args = payload.get("args").and_then(Value::as_array);
    for arg in args.into_iter().flatten() {
        ids.extend(arg.get("task_id").and_then(as_task_id));
        let nested = arg.get("arguments").and_then(Value::as_array);
        for inner in nested.into_iter().flatten() {
            ids.extend(inner.get("task_id").and_then(as_task_id));
        }
    }

    ids.dedup();
    ids
}

/// State of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Ready to be claimed.
    Pending,
    /// Deferred to `run_at`.
    Scheduled,
    /// Failed attempt waiting for `run_at`.
    Retry,
    Running,
    Done,
    Dead,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::Scheduled => "scheduled",
            EntryState::Retry => "retry",
            EntryState::Running => "running",
            EntryState::Done => "done",
            EntryState::Dead => "dead",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(EntryState::Pending),
            "scheduled" => Ok(EntryState::Scheduled),
            "retry" => Ok(EntryState::Retry),
            "running" => Ok(EntryState::Running),
            "done" => Ok(EntryState::Done),
            "dead" => Ok(EntryState::Dead),
            _ => Err(format!("Unknown queue entry state: {}", s)),
        }
    }
}

/// Collections the canceller inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSet {
    Live,
    Scheduled,
    Retry,
}

impl QueueSet {
    pub const ALL: [QueueSet; 3] = [QueueSet::Live, QueueSet::Scheduled, QueueSet::Retry];

    pub fn state(&self) -> EntryState {
        match self {
            QueueSet::Live => EntryState::Pending,
            QueueSet::Scheduled => EntryState::Scheduled,
            QueueSet::Retry => EntryState::Retry,
        }
    }
}

/// A dispatched job as stored by the work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub queue: String,
    pub payload: Value,
    pub state: EntryState,
    pub run_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn calculate_next_retry(&self, config: &RetryConfig) -> DateTime<Utc> {
        Utc::now() + config.delay_for_attempt(self.attempts + 1)
    }

    /// Whether this entry belongs to `task_id`.
    ///
    /// Exact correlation-id match first; embedded task ids as a fallback.
    pub fn correlates_to(&self, task_id: i64, correlation_id: Option<&str>) -> bool {
        if correlation_id.is_some_and(|cid| cid == self.id.to_string()) {
            return true;
        }
        payload_task_ids(&self.payload).contains(&task_id)
    }
}

/// Native recurring registration held by the work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringJob {
    pub name: String,
    pub cron: String,
    pub task_type: TaskType,
    pub args: UnitArgs,
    pub next_fire_at: Option<DateTime<Utc>>,
}

/// Deterministic registration name for a task type.
pub fn recurring_name(task_type: TaskType) -> String {
    format!("{RECURRING_PREFIX}{}", task_type.as_str())
}

pub const RECURRING_PREFIX: &str = "parser_";

/// Task type encoded in a registration name, if it is one of ours.
pub fn recurring_task_type(name: &str) -> Option<TaskType> {
    name.strip_prefix(RECURRING_PREFIX)?.parse().ok()
}

/// Retry configuration with exponential backoff.
///
/// Delay schedule: 1min, 5min, 30min, 60min (capped).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub max_delay: TimeDelta,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_delay: TimeDelta::minutes(60),
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> TimeDelta {
        let delay = match attempt {
            0 | 1 => TimeDelta::minutes(1),
            2 => TimeDelta::minutes(5),
            3 => TimeDelta::minutes(30),
            _ => TimeDelta::minutes(60),
        };
        std::cmp::min(delay, self.max_delay)
    }
}

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub retry_config: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_secs(5),
            retry_config: RetryConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
