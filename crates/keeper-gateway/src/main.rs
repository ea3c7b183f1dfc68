use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use keeper_core::config::{MetricsConfig, MetricsSinkKind};
use keeper_core::KeeperConfig;
use keeper_scheduler::{
    Dispatcher, HandlerRegistry, JobCatalog, JobStats, LogSink, MetricsSink, NullSink,
    OutcomeEmitter, RunRegistry, WebhookSink,
};
use keeper_sync::{
    ChainClient, ChainSynchronizer, CheckpointStore, JsonRpcClient, LogChangeDetector,
    RpcChainClient, RpcEntitySource, SqliteCheckpointStore, SqliteEntityUpdater, SyncJob,
    SyncSettings,
};
use tracing::{info, warn};

mod app;
mod http;

const DEFAULT_LOG_FILTER: &str =
    "keeper_gateway=info,keeper_scheduler=info,keeper_sync=info,tower_http=debug";

#[derive(Debug, Parser)]
#[command(name = "keeper-gateway", version, about = "Job scheduler and incremental chain sync")]
struct Cli {
    /// Path to keeper.toml. Falls back to $KEEPER_CONFIG, then ~/.keeper/keeper.toml.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > KEEPER_CONFIG env > ~/.keeper/keeper.toml
    let config_path = cli.config.or_else(|| std::env::var("KEEPER_CONFIG").ok());
    let config = KeeperConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        KeeperConfig::default()
    });

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    // checkpoint store owns the first connection; schema init is idempotent
    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(SqliteCheckpointStore::new(open_db(&db_path)?)?);
    info!("database migrations complete");

    let jobs = config.scheduled_jobs();
    let handlers = build_handlers(&config, &checkpoints)?;
    handlers.validate(&jobs)?;
    info!(handlers = ?handlers.names(), jobs = jobs.len(), "job handlers validated");

    let emitter = OutcomeEmitter::new(
        build_sink(&config.metrics),
        JobStats::new(),
        &config.metrics.prefix,
    );
    let dispatcher = Dispatcher::new(handlers, RunRegistry::new(), emitter);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut loops = dispatcher.spawn_all(jobs.clone(), shutdown_rx);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(
        config,
        dispatcher,
        JobCatalog::new(jobs),
        checkpoints,
    ));
    let router = app::build_router(state);

    info!("keeper gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop the job loops; a tick already in progress finishes first
    let _ = shutdown_tx.send(true);
    while loops.join_next().await.is_some() {}
    info!("all job loops stopped");
    Ok(())
}

/// One `SyncJob` per configured job name, with a pipeline for every chain it runs on.
fn build_handlers(
    config: &KeeperConfig,
    checkpoints: &Arc<dyn CheckpointStore>,
) -> anyhow::Result<HandlerRegistry> {
    let mut sync_jobs: HashMap<String, SyncJob> = HashMap::new();

    for chain in &config.chains {
        if chain.sync.is_empty() {
            continue;
        }
        let rpc = Arc::new(JsonRpcClient::new(&chain.rpc_url)?);
        let client: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(rpc.clone()));

        for sync in &chain.sync {
            let detector = Arc::new(LogChangeDetector::new(
                rpc.clone(),
                sync.addresses.clone(),
                sync.topics.clone(),
            ));
            // each updater gets its own connection
            let updater = Arc::new(SqliteEntityUpdater::new(
                RpcEntitySource::new(rpc.clone(), &sync.call_data),
                open_db(&config.database.path)?,
            )?);
            let pipeline = Arc::new(ChainSynchronizer::new(
                sync.category,
                chain.id.clone(),
                SyncSettings::new(sync.max_window_blocks, sync.batch_size)?,
                client.clone(),
                detector,
                updater,
                checkpoints.clone(),
            ));

            let job = sync_jobs
                .remove(&sync.job)
                .unwrap_or_else(|| SyncJob::new(sync.category));
            sync_jobs.insert(sync.job.clone(), job.with_chain(pipeline)?);
            info!(
                job = %sync.job,
                chain = %chain.id,
                category = %sync.category,
                rpc = %rpc.url(),
                "sync pipeline ready"
            );
        }
    }

    let mut handlers = HandlerRegistry::new();
    for (name, job) in sync_jobs {
        handlers.register(&name, Arc::new(job));
    }
    Ok(handlers)
}

/// Pick the metrics sink from config. A webhook sink without a usable URL
/// degrades to logging.
fn build_sink(cfg: &MetricsConfig) -> Arc<dyn MetricsSink> {
    match cfg.sink {
        MetricsSinkKind::Log => Arc::new(LogSink),
        MetricsSinkKind::None => Arc::new(NullSink),
        MetricsSinkKind::Webhook => match cfg.webhook_url.as_deref().map(WebhookSink::new) {
            Some(Ok(sink)) => {
                info!(url = ?cfg.webhook_url, "metrics: webhook sink");
                Arc::new(sink)
            }
            Some(Err(e)) => {
                warn!("Webhook metrics sink unavailable ({e}), logging metrics instead");
                Arc::new(LogSink)
            }
            None => {
                warn!("metrics.sink = \"webhook\" without metrics.webhook_url, logging metrics instead");
                Arc::new(LogSink)
            }
        },
    }
}

fn open_db(path: &str) -> anyhow::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
