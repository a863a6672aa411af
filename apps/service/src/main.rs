use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};

use sentinel_service::{
    config::{Config, DiagnosisProviderKind, StorageBackend},
    diagnosis::{DiagnosisProvider, OllamaProvider},
    monitoring::{HttpChecker, JobExecutor, MonitoringScheduler, WorkerPool},
    registry::{InMemoryRegistry, LibsqlRegistry, Registry},
    service::{MonitorService, MonitorView, RegisterMonitor},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Periodic HTTP health checks with failure diagnosis", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and worker pool until interrupted
    Run,
    /// Register a monitor in the configured store
    Add {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        url: String,
        /// Check interval in seconds
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
    /// List an owner's monitors as JSON
    List {
        #[arg(long)]
        owner: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run => {
            logger::init();
            run(config).await
        }
        Command::Add { owner, url, interval } => {
            logger::try_init_with_level(LevelFilter::WARN)?;
            let service = MonitorService::new(persistent_registry(&config).await?);
            let monitor = service
                .register(&owner, RegisterMonitor { url, interval_seconds: interval })
                .await
                .context("Failed to register monitor")?;
            println!("{}", serde_json::to_string_pretty(&MonitorView::from(&monitor))?);
            Ok(())
        }
        Command::List { owner } => {
            logger::try_init_with_level(LevelFilter::WARN)?;
            let service = MonitorService::new(persistent_registry(&config).await?);
            let views: Vec<MonitorView> =
                service.list(&owner).await.context("Failed to list monitors")?.iter().map(MonitorView::from).collect();
            println!("{}", serde_json::to_string_pretty(&views)?);
            Ok(())
        }
        Command::Config => {
            print!("{config}");
            Ok(())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Starting sentinel v{}", env!("CARGO_PKG_VERSION"));

    let registry = open_registry(&config).await?;
    let diagnosis = diagnosis_provider(&config)?;
    let checker = Arc::new(HttpChecker::new(config.probe_timeout()).context("Failed to build HTTP client")?);

    let executor = Arc::new(JobExecutor::new(
        registry.clone(),
        checker,
        diagnosis,
        config.diagnosis_timeout(),
        config.job_timeout(),
    ));
    let pool = Arc::new(WorkerPool::new(config.workers.pool_size, config.workers.queue_capacity, executor));
    let scheduler = Arc::new(MonitoringScheduler::new(registry, pool.clone(), config.tick_interval()));

    let cancel = CancellationToken::new();
    let workers = pool.start(cancel.clone());
    let scheduler_handle = scheduler.start(cancel.clone());

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested, waiting for in-flight checks");
    cancel.cancel();

    scheduler_handle.await.context("Scheduler task failed")?;
    pool.shutdown(workers).await;

    info!("Sentinel stopped");
    Ok(())
}

async fn open_registry(config: &Config) -> Result<Arc<dyn Registry>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; monitors are lost on exit");
            Ok(Arc::new(InMemoryRegistry::new()))
        }
        StorageBackend::Libsql => {
            let registry = LibsqlRegistry::open(&config.storage.path)
                .await
                .with_context(|| format!("Failed to open database {}", config.storage.path.display()))?;
            info!("Using libsql storage at {}", config.storage.path.display());
            Ok(Arc::new(registry))
        }
    }
}

/// Registry for one-shot commands, which only make sense with durable storage
async fn persistent_registry(config: &Config) -> Result<Arc<dyn Registry>> {
    if config.storage.backend != StorageBackend::Libsql {
        bail!("This command needs durable storage; set storage.backend = \"libsql\" in the configuration");
    }
    open_registry(config).await
}

fn diagnosis_provider(config: &Config) -> Result<Option<Arc<dyn DiagnosisProvider>>> {
    match config.diagnosis.provider {
        DiagnosisProviderKind::None => {
            info!("Failure diagnosis disabled");
            Ok(None)
        }
        DiagnosisProviderKind::Ollama => {
            let provider = OllamaProvider::new(config.diagnosis.url.clone(), config.diagnosis.model.clone())
                .context("Failed to build diagnosis client")?;
            info!("Failure diagnosis via {} ({})", config.diagnosis.url, config.diagnosis.model);
            Ok(Some(Arc::new(provider)))
        }
    }
}
