use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use shelf_client::{AnyNotifier, OriginApiClient, ReqwestTransport, ScraperExtractor};
use shelf_core::{
    CatalogUnits, ContentDownloader, EnvProxySource, ExtractionPipeline, HarvestConfig,
    HarvestService, PassthroughTranslator, ProxiedFetcher, ProxyRotator, TaskRecord, TaskType,
    TracingWorkerReporter, UnitArgs, UnitRunner, UnitSettings, WorkerConfig, WorkerService,
};
use shelf_db::{Database, DatabaseConfig, QueueRepository, ScheduleRepository, TaskRepository};

type Service = HarvestService<TaskRepository, QueueRepository, ScheduleRepository>;

#[cfg(feature = "browser")]
type Renderer = shelf_client::BrowserRenderer;
#[cfg(not(feature = "browser"))]
type Renderer = shelf_core::DisabledRenderer;

#[derive(Parser)]
#[command(name = "shelf", version, about = "Catalog harvester: worker daemon and task control")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker and the schedule loop until Ctrl-C
    Worker {
        /// Stable worker id (random when omitted)
        #[arg(long, env = "WORKER_ID")]
        worker_id: Option<String>,
    },

    /// Create a task and queue it for a worker
    Enqueue {
        /// categories, products, bestsellers, popular_categories, category_images, product_images
        task_type: TaskType,

        /// Stop after this many processed items
        #[arg(short, long)]
        limit: Option<u32>,

        /// Restrict product sync to one category
        #[arg(long)]
        category: Option<String>,

        /// Restrict product-image sync to one product
        #[arg(long)]
        sku: Option<String>,
    },

    /// Stop a pending or running task
    Cancel { task_id: i64 },

    /// Show one task record
    Status { task_id: i64 },

    /// List recent tasks
    Tasks {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Inspect and edit cron schedules
    Schedules {
        #[command(subcommand)]
        command: ScheduleCommand,
    },
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// Show every stored definition
    List,

    /// Create or replace the definition for a task type
    Set {
        task_type: TaskType,

        /// Cron expression, e.g. "0 3 * * *"
        cron: String,

        /// Store the definition disabled
        #[arg(long, default_value_t = false)]
        disable: bool,
    },

    /// Align recurring registrations with the stored definitions
    Sync,

    /// Enqueue every enabled definition whose time has come
    RunDue,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("shelf=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = HarvestConfig::from_env().context("Invalid harvester configuration")?;
    let db = connect_db().await?;
    let service = HarvestService::new(db.task_repo(), db.queue_repo(), db.schedule_repo());

    match cli.command {
        Commands::Worker { worker_id } => cmd_worker(&config, &db, service, worker_id).await?,
        Commands::Enqueue {
            task_type,
            limit,
            category,
            sku,
        } => {
            let args = UnitArgs {
                limit,
                category_id: category,
                sku,
                ..UnitArgs::default()
            };
            let record = service.enqueue(task_type, args).await?;
            println!(
                "Enqueued task #{} ({}), job {}",
                record.id,
                record.task_type,
                record.queue_correlation_id.as_deref().unwrap_or("-")
            );
        }
        Commands::Cancel { task_id } => {
            let outcome = service.cancel(task_id).await?;
            println!(
                "Task #{} stopped, {} queued job(s) removed",
                outcome.task_id, outcome.removed
            );
        }
        Commands::Status { task_id } => {
            let record = service.status(task_id).await?;
            print_record(&record);
        }
        Commands::Tasks { limit } => {
            let records = service.recent(limit).await?;
            if records.is_empty() {
                println!("No tasks yet");
            }
            for record in &records {
                print_record(record);
            }
        }
        Commands::Schedules { command } => cmd_schedules(&service, command).await?,
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().context("DATABASE_URL not set")?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

#[cfg(feature = "browser")]
async fn build_renderer(config: &HarvestConfig) -> Result<Renderer> {
    shelf_client::BrowserRenderer::launch(
        config.chrome_bin.as_deref(),
        std::time::Duration::from_secs(90),
    )
    .await
    .context("Failed to launch headless browser")
}

#[cfg(not(feature = "browser"))]
async fn build_renderer(_config: &HarvestConfig) -> Result<Renderer> {
    tracing::info!("Built without the browser feature, modal panels come from page HTML only");
    Ok(shelf_core::DisabledRenderer)
}

async fn cmd_worker(
    config: &HarvestConfig,
    db: &Database,
    service: Service,
    worker_id: Option<String>,
) -> Result<()> {
    let origin = &config.origin;

    let transport = ReqwestTransport::new(origin).context("Failed to create HTTP client")?;
    let rotator = ProxyRotator::new(EnvProxySource::new()).with_backoff(config.proxy_backoff);
    let fetcher = ProxiedFetcher::new(transport, rotator);

    let api = OriginApiClient::new(fetcher.clone(), origin.clone());
    let extractor = ScraperExtractor::new(origin.base_url.as_str())?;
    let renderer = build_renderer(config).await?;
    let pipeline = ExtractionPipeline::new(
        api,
        fetcher.clone(),
        renderer,
        extractor,
        origin.base_url.as_str(),
    );

    let downloader = ContentDownloader::new(fetcher, &config.images_root, origin.base_url.as_str())
        .with_concurrency(config.image_concurrency);

    let settings = UnitSettings {
        homepage_url: origin.homepage_url(),
        ..UnitSettings::default()
    };
    let units = CatalogUnits::new(
        pipeline,
        downloader,
        db.catalog_repo(),
        PassthroughTranslator,
        settings,
    );

    let notifier = AnyNotifier::from_config(config.telegram.clone())?;
    let runner = UnitRunner::new(service.dispatcher().clone(), units, notifier);

    let mut worker_config = WorkerConfig::default().with_poll_interval(config.worker_poll_interval);
    if let Some(id) = worker_id {
        worker_config = worker_config.with_worker_id(id);
    }
    let worker = WorkerService::new(runner, worker_config);

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C, stopping"),
        }
        signal_token.cancel();
    });

    let (worker_result, ()) = tokio::join!(
        worker.run(cancel_token.clone(), &TracingWorkerReporter),
        service.run_schedule_loop(
            cancel_token.clone(),
            config.schedule_interval,
            config.schedule_run_due,
        ),
    );
    worker_result?;

    Ok(())
}

async fn cmd_schedules(service: &Service, command: ScheduleCommand) -> Result<()> {
    match command {
        ScheduleCommand::List => {
            let definitions = service.schedules().await?;
            if definitions.is_empty() {
                println!("No schedules defined");
            }
            for def in definitions {
                println!(
                    "  {:<20} {:<16} {:<8} next: {}",
                    def.task_type.as_str(),
                    def.schedule,
                    if def.enabled { "enabled" } else { "disabled" },
                    def.next_run_at
                        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                        .unwrap_or_else(|| "-".into())
                );
            }
        }
        ScheduleCommand::Set {
            task_type,
            cron,
            disable,
        } => {
            let def = service.set_schedule(task_type, &cron, !disable).await?;
            println!(
                "Schedule for {} set to '{}' ({})",
                def.task_type,
                def.schedule,
                if def.enabled { "enabled" } else { "disabled" }
            );
        }
        ScheduleCommand::Sync => {
            let report = service.sync_schedules().await?;
            println!(
                "Registered: {:?}\nRemoved: {:?}",
                report.registered, report.removed
            );
        }
        ScheduleCommand::RunDue => {
            let records = service.run_due_schedules().await?;
            println!("Enqueued {} due task(s)", records.len());
            for record in &records {
                print_record(record);
            }
        }
    }
    Ok(())
}

fn print_record(record: &TaskRecord) {
    println!(
        "  #{:<6} {:<20} {:<10} processed {} / created {} / updated {} / errors {}{}",
        record.id,
        record.task_type.as_str(),
        record.status.as_str(),
        record.processed,
        record.created,
        record.updated,
        record.error_count,
        record
            .error_message
            .as_deref()
            .map(|m| format!(" ({m})"))
            .unwrap_or_default()
    );
}
