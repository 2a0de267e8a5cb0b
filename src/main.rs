use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use catalog_import::catalog::{MemoryCatalog, PgProductCatalog, ProductCatalog};
use catalog_import::config::PipelineConfig;
use catalog_import::history::{HistoryStore, MemoryHistoryStore, PgHistoryStore};
use catalog_import::import::RowImporter;
use catalog_import::intake::submit_upload;
use catalog_import::job::ImportOrchestrator;
use catalog_import::models::FileStatus;
use catalog_import::notify::{
    BroadcastPublisher, PgNotifyPublisher, PROCESSING_CHANNEL, UPLOADED_CHANNEL,
};
use catalog_import::queue::{JobQueue, MemoryJobQueue, PgJobQueue};
use catalog_import::storage::{BlobStore, LocalDiskStore};
use catalog_import::tracing::init_tracing;
use catalog_import::util::db::{Db, MIGRATIONS_DIR};
use catalog_import::util::env;
use catalog_import::worker::{Worker, WorkerConfig};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "import-pipeline", version, about = "Product spreadsheet import pipeline")]
struct Cli {
    /// Optional override for the database URL
    #[arg(long, global = true)]
    db_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Apply numbered SQL migrations
    Migrate {
        #[arg(long, default_value = MIGRATIONS_DIR)]
        dir: PathBuf,
    },
    /// Claim and run import jobs until Ctrl-C
    Worker {
        /// Process whatever is queued, then exit
        #[arg(long, default_value_t = false)]
        once: bool,
    },
    /// Upload a local spreadsheet: store it, record `pending`, enqueue the import
    Enqueue {
        path: PathBuf,
        /// Treat PATH as an already-stored reference (e.g. uploads/123_a.csv)
        #[arg(long, default_value_t = false)]
        stored: bool,
    },
    /// Show recent import history
    History {
        #[arg(long)]
        status: Option<FileStatus>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print lifecycle notifications as they arrive
    Listen,
    /// Import a file end to end in memory, without a database
    RunLocal { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("info,sqlx=warn")?;
    let cli = Cli::parse();
    let cfg = PipelineConfig::from_env();

    match cli.command {
        Commands::Migrate { dir } => {
            let db = connect(cli.db_url.as_deref(), 2).await?;
            let applied = db.run_migrations(&dir).await?;
            info!(applied = ?applied, "migrate finished");
        }
        Commands::Worker { once } => {
            env::preflight_check(
                "worker",
                &[],
                &[
                    "DATABASE_URL",
                    "IMPORT_STORAGE_ROOT",
                    "IMPORT_BATCH_SIZE",
                    "IMPORT_JOB_TRIES",
                    "WORKER_ID",
                    "WORKER_CONCURRENCY",
                ],
            )?;
            let max_conns = ((cfg.worker.concurrency as u32) * 4).max(5);
            let db = connect(cli.db_url.as_deref(), max_conns).await?;
            let worker = pg_worker(&db, &cfg);
            if once {
                let n = worker.drain().await?;
                info!(processed = n, "queue drained");
            } else {
                let (tx, rx) = watch::channel(false);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("ctrl-c received; finishing in-flight jobs");
                        let _ = tx.send(true);
                    }
                });
                worker.run(rx).await?;
            }
        }
        Commands::Enqueue { path, stored } => {
            let db = connect(cli.db_url.as_deref(), 2).await?;
            let queue = PgJobQueue::new(db.pool.clone());
            let history = PgHistoryStore::new(db.pool.clone());
            if stored {
                let job = catalog_import::job::ImportJob::new(path.to_string_lossy());
                history
                    .create_or_update(&job.file_name(), FileStatus::Pending)
                    .await?;
                let id = queue.enqueue(&job).await?;
                println!("queued job {id} for {}", job.file_ref);
            } else {
                let storage = LocalDiskStore::new(&cfg.storage_root);
                let (name, bytes) = read_upload(&path).await?;
                let sub = submit_upload(&storage, &history, &queue, &name, &bytes).await?;
                println!(
                    "queued job {} for {} (history id {})",
                    sub.job_id, sub.file_ref, sub.history_id
                );
            }
        }
        Commands::History { status, limit } => {
            let db = connect(cli.db_url.as_deref(), 2).await?;
            let store = PgHistoryStore::new(db.pool.clone());
            let rows = match status {
                Some(s) => store.list_by_status(s).await?,
                None => store.list_recent().await?,
            };
            for h in rows.into_iter().take(limit) {
                println!(
                    "{:>6}  {:<10}  {}  {}",
                    h.id,
                    h.status.as_str(),
                    h.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    h.file_name
                );
            }
        }
        Commands::Listen => {
            let url = resolve_db_url(cli.db_url.as_deref())?;
            let mut listener = PgListener::connect(&url)
                .await
                .context("connect listener")?;
            listener
                .listen_all([PROCESSING_CHANNEL, UPLOADED_CHANNEL])
                .await?;
            info!(channels = ?[PROCESSING_CHANNEL, UPLOADED_CHANNEL], "listening");
            loop {
                let n = listener.recv().await?;
                println!("[{}] {}", n.channel(), n.payload());
            }
        }
        Commands::RunLocal { path } => run_local(&cfg, &path).await?,
    }
    Ok(())
}

fn resolve_db_url(explicit: Option<&str>) -> Result<String> {
    match explicit {
        Some(url) => Ok(url.to_string()),
        None => env::db_url(),
    }
}

async fn connect(explicit: Option<&str>, max_connections: u32) -> Result<Db> {
    let url = resolve_db_url(explicit)?;
    Db::connect(&url, max_connections).await
}

async fn read_upload(path: &std::path::Path) -> Result<(String, Vec<u8>)> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no file name", path.display()))?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    Ok((name, bytes))
}

fn pg_worker(db: &Db, cfg: &PipelineConfig) -> Worker {
    let catalog: Arc<dyn ProductCatalog> = Arc::new(PgProductCatalog::new(db.pool.clone()));
    let orchestrator = ImportOrchestrator::new(
        Arc::new(PgHistoryStore::new(db.pool.clone())),
        Arc::new(LocalDiskStore::new(&cfg.storage_root)),
        RowImporter::new(catalog, cfg.import.clone()),
        Arc::new(PgNotifyPublisher::new(db.pool.clone())),
    )
    .with_notify_timeout(cfg.notify_timeout);
    let worker_cfg = WorkerConfig {
        stale_after: cfg.effective_stale_after(),
        ..cfg.worker.clone()
    };
    Worker::new(
        Arc::new(PgJobQueue::new(db.pool.clone())),
        Arc::new(orchestrator),
        cfg.retry.clone(),
        worker_cfg,
    )
}

async fn run_local(cfg: &PipelineConfig, path: &std::path::Path) -> Result<()> {
    let (name, bytes) = read_upload(path).await?;
    let scratch = tempfile::tempdir().context("create scratch storage")?;
    let storage = Arc::new(LocalDiskStore::new(scratch.path()));
    let history = Arc::new(MemoryHistoryStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let publisher = Arc::new(BroadcastPublisher::new(64));

    let mut events = publisher.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            println!("[{}] {} {}", ev.channel, ev.event, ev.payload);
        }
    });

    let sub = submit_upload(
        &*storage,
        &*history,
        &*queue,
        &name,
        &bytes,
    )
    .await?;

    let orchestrator = ImportOrchestrator::new(
        history.clone(),
        storage.clone() as Arc<dyn BlobStore>,
        RowImporter::new(catalog.clone(), cfg.import.clone()),
        publisher.clone(),
    )
    .with_notify_timeout(cfg.notify_timeout);
    let worker = Worker::new(
        queue.clone(),
        Arc::new(orchestrator),
        cfg.retry.clone(),
        WorkerConfig {
            stale_after: None,
            ..cfg.worker.clone()
        },
    );
    worker.drain().await?;

    // closes the broadcast channel so the printer exits
    drop(worker);
    drop(publisher);
    if let Err(e) = printer.await {
        warn!(error = %e, "event printer task failed");
    }

    match history.find_by_file_name(&sub.file_name).await? {
        Some(h) if h.status == FileStatus::Completed => {
            println!(
                "{}: {} ({} products in catalog)",
                h.file_name,
                h.status,
                catalog.count().await?
            );
            Ok(())
        }
        Some(h) if h.status.is_terminal() => {
            error!(file_name = %h.file_name, status = %h.status, "import did not complete");
            anyhow::bail!("import of {} ended as {}", h.file_name, h.status)
        }
        Some(h) => anyhow::bail!(
            "queue drained but {} is still {}",
            h.file_name,
            h.status
        ),
        None => anyhow::bail!("no history record for {}", sub.file_name),
    }
}
