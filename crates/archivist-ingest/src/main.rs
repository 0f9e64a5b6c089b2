//! Archivist Ingest - attachment archiving worker

use anyhow::{Context, Result};
use archivist_common::logging::{init_logging, LogConfig, LogLevel};
use archivist_common::types::{ChangeRecord, CredentialRecord};
use archivist_ingest::cache::{AdvisoryLock, KeyedCache};
use archivist_ingest::credentials::{
    CredentialStore, OAuthRefresher, PgCredentialRepository, RefreshCoordinator,
};
use archivist_ingest::orchestrator::FileIngestor;
use archivist_ingest::persistence::{PgChannelIndex, PgMessageRepository};
use archivist_ingest::router::RecordRouter;
use archivist_ingest::storage::S3ObjectStore;
use archivist_ingest::transfer::Transferer;
use archivist_ingest::IngestConfig;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "archivist-ingest")]
#[command(author, version, about = "Archive chat attachments into object storage")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a JSON array of change-log records
    Process {
        /// Input file (reads stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Apply database migrations
    Migrate,
}

/// Everything one batch needs, built once at startup.
struct Pipeline {
    router: RecordRouter,
    credential_cache: Arc<KeyedCache<CredentialRecord>>,
    lock_cache: Arc<KeyedCache<bool>>,
}

async fn build_pipeline(config: &IngestConfig, pool: PgPool) -> Result<Pipeline> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("archivist-ingest/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let credential_cache = Arc::new(KeyedCache::new(config.credential_cache_ttl()));
    let lock_cache = Arc::new(KeyedCache::new(config.lock_ttl()));

    let store = Arc::new(CredentialStore::new(
        Arc::new(PgCredentialRepository::new(
            pool.clone(),
            config.credentials.namespace.clone(),
        )),
        credential_cache.clone(),
        config.credentials.namespace.clone(),
        config.credentials.refresh_buffer_secs,
    ));
    let refresher = Arc::new(OAuthRefresher::new(
        http.clone(),
        config.oauth.token_url.clone(),
        config.oauth.client_id.clone(),
        config.oauth.client_secret.clone(),
    ));
    let coordinator = Arc::new(RefreshCoordinator::new(
        store,
        refresher,
        AdvisoryLock::new(lock_cache.clone(), config.lock_ttl()),
        config.lock_wait(),
    ));

    let object_store = Arc::new(S3ObjectStore::new(config.storage.clone()).await);
    let transferer = Arc::new(Transferer::new(http, object_store, config.transfer_timeout()));

    let ingestor = Arc::new(FileIngestor::new(
        coordinator,
        transferer,
        config.retry_policy(),
        config.transfer.namespace.clone(),
    ));

    let router = RecordRouter::new(
        ingestor,
        Arc::new(PgMessageRepository::new(pool.clone())),
        Arc::new(PgChannelIndex::new(pool)),
    );

    Ok(Pipeline {
        router,
        credential_cache,
        lock_cache,
    })
}

async fn read_input(input: Option<&PathBuf>) -> Result<String> {
    match input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("Failed to read stdin")?;
            Ok(raw)
        },
    }
}

async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("Failed to connect to database")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags.
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("archivist-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Migrate => {
            dotenvy::dotenv().ok();
            let url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
            let pool = connect(&url, 1).await?;

            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            info!("Migrations applied");
        },
        Command::Process { input } => {
            let config = IngestConfig::load().context("Failed to load configuration")?;
            let pool = connect(&config.database.url, config.database.max_connections).await?;
            let pipeline = build_pipeline(&config, pool).await?;

            let raw = read_input(input.as_ref()).await?;
            let records = ChangeRecord::parse_batch(&raw).context("Invalid change-log batch")?;
            info!(records = records.len(), "Processing batch");

            let report = pipeline.router.process_batch(&records).await;

            let purged =
                pipeline.credential_cache.purge_expired() + pipeline.lock_cache.purge_expired();
            debug!(purged, "expired cache entries removed");

            info!(
                processed = report.processed,
                ingested = report.ingested,
                skipped = report.skipped,
                failed = report.failed,
                "Batch complete"
            );
        },
    }

    Ok(())
}
