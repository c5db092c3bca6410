pub mod cancellation;
pub mod canceller;
pub mod config;
pub mod dispatch;
pub mod downloader;
pub mod error;
pub mod fetch;
pub mod fields;
pub mod job;
pub mod job_queue;
pub mod models;
pub mod pipeline;
pub mod proxy;
pub mod registry;
pub mod runner;
pub mod schedule;
pub mod service;
pub mod task;
pub mod task_store;
pub mod traits;
pub mod units;
pub mod util;
pub mod worker;

#[cfg(test)]
mod testutil;

pub use cancellation::TaskContext;
pub use canceller::{CancelOutcome, JobCanceller};
pub use config::{HarvestConfig, OriginConfig, TelegramConfig};
pub use dispatch::TaskDispatcher;
pub use downloader::{ContentDownloader, DownloadReport};
pub use error::AppError;
pub use fetch::ProxiedFetcher;
pub use job::{EntryState, JobEnvelope, QueueEntry, QueueSet, RecurringJob, UnitArgs, WorkerConfig};
pub use job_queue::WorkQueue;
pub use pipeline::{ExtractionPipeline, RenderPolicy};
pub use proxy::{EnvProxySource, ProxyEndpoint, ProxyRotator, ProxySource, StaticProxySource};
pub use registry::TaskRegistry;
pub use runner::{RunOutcome, UnitExecutor, UnitRunner};
pub use schedule::{CronDefinition, ScheduleStore, ScheduleSynchronizer, SyncReport};
pub use service::HarvestService;
pub use task::{Counter, NewTask, TaskRecord, TaskStats, TaskStatus, TaskType};
pub use task_store::TaskStore;
pub use traits::{
    CatalogApi, CatalogStore, DisabledRenderer, HtmlExtractor, HttpTransport, Notifier,
    PageRenderer, PassthroughTranslator, TaskEvent, Translator,
};
pub use units::{CatalogUnits, UnitSettings};
pub use worker::{TracingWorkerReporter, WorkerEvent, WorkerReporter, WorkerService};
