//! Panel Sentinel
//!
//! Ingests solar panel telemetry, classifies cleanliness, persists enriched
//! records and serves the latest state per unit.
//!
//! # Usage
//!
//! ```bash
//! # HTTP ingest only (POST /api/v1/ingest/:unit_id)
//! panel-sentinel
//!
//! # Envelope lines from stdin
//! bridge | panel-sentinel --stdin
//!
//! # Envelope lines from a TCP bridge
//! panel-sentinel --tcp 127.0.0.1:1884
//!
//! # Replay a captured file, 100 ms between messages
//! panel-sentinel --replay capture.jsonl --replay-delay-ms 100
//!
//! # Drop records older than 90 days
//! panel-sentinel prune --days 90
//! ```
//!
//! # Environment Variables
//!
//! - `SENTINEL_CONFIG`: path to the TOML config (default: `./sentinel.toml`)
//! - `SENTINEL_LOG_FORMAT`: `plain` (default) or `json`
//! - `SENTINEL_CORS_ORIGINS`: comma-separated allowed origins
//! - `RUST_LOG`: log filter (default: info)

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use panel_sentinel::acquisition::TcpBridgeClient;
use panel_sentinel::api::{create_app, ApiState};
use panel_sentinel::background::{
    DeadLetterBacklogCheck, DiskHealthCheck, HealthCheck, HealthMonitor, StoreHealthCheck, TransportSilenceCheck,
};
use panel_sentinel::config::{self, defaults, ArchiverKind, ServiceConfig};
use panel_sentinel::pipeline::{
    ChannelSource, IngestPipeline, MessageSource, PipelineStats, ProcessingLoop, ReplaySource, StdinSource, TcpSource,
};
use panel_sentinel::storage::{self, dead_letter, DeadLetterQueue, ProcessLock, Stores};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "panel-sentinel")]
#[command(about = "Solar panel telemetry ingestion and cleanliness classification")]
#[command(version)]
struct CliArgs {
    /// Read envelope lines (`{"topic": ..., "payload": ...}`) from stdin
    #[arg(long, conflicts_with_all = ["tcp", "replay"])]
    stdin: bool,

    /// Read envelope lines from a TCP bridge
    #[arg(long, value_name = "HOST:PORT", conflicts_with = "replay")]
    tcp: Option<String>,

    /// Replay envelope lines from a file
    #[arg(long, value_name = "PATH")]
    replay: Option<PathBuf>,

    /// Delay between replayed messages
    #[arg(long, default_value = "0")]
    replay_delay_ms: u64,

    /// Config file (overrides the search order)
    #[arg(long, env = "SENTINEL_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the server address
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the data directory
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, env = "SENTINEL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// Remove records captured more than N days ago
    Prune {
        #[arg(long)]
        days: u32,
    },
    /// Print the effective configuration as TOML
    ShowConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Plain,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match format {
        LogFormat::Plain => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(args: &CliArgs) -> Result<ServiceConfig> {
    let mut config = match &args.config {
        Some(path) => ServiceConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServiceConfig::load(),
    };
    if let Some(addr) = &args.addr {
        config.server.addr.clone_from(addr);
    }
    if let Some(dir) = &args.data_dir {
        config.store.data_dir.clone_from(dir);
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    HealthMonitor,
    DeadLetterRetry,
    HttpIngest,
    SourceProcessor,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpServer => write!(f, "HttpServer"),
            Self::HealthMonitor => write!(f, "HealthMonitor"),
            Self::DeadLetterRetry => write!(f, "DeadLetterRetry"),
            Self::HttpIngest => write!(f, "HttpIngest"),
            Self::SourceProcessor => write!(f, "SourceProcessor"),
        }
    }
}

/// Run until cancelled or a task fails. A failed or panicked task cancels
/// the rest.
async fn run_supervisor(task_set: &mut JoinSet<Result<TaskName>>, cancel_token: CancellationToken) -> Result<()> {
    info!(tasks = task_set.len(), "Supervisor monitoring tasks");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => match result {
                Some(Ok(Ok(task))) => info!(%task, "Task completed"),
                Some(Ok(Err(e))) => {
                    error!(error = %e, "Task failed, shutting down");
                    cancel_token.cancel();
                    return Err(e);
                }
                Some(Err(e)) => {
                    error!(error = %e, "Task panicked, shutting down");
                    cancel_token.cancel();
                    return Err(anyhow::anyhow!("Task panicked: {e}"));
                }
                None => {
                    info!("Supervisor: all tasks completed");
                    break;
                }
            }
        }
    }

    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task)) => info!(%task, "Task stopped"),
            Ok(Err(e)) => warn!(error = %e, "Task failed during shutdown"),
            Err(e) => warn!(error = %e, "Task panicked during shutdown"),
        }
    }
    Ok(())
}

fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel_token.cancelled().await })
            .await
            .context("HTTP server error")?;
        info!("HTTP server stopped");
        Ok(TaskName::HttpServer)
    });
}

fn spawn_processor<S: MessageSource>(
    task_set: &mut JoinSet<Result<TaskName>>,
    processing_loop: ProcessingLoop,
    mut source: S,
    name: TaskName,
) {
    task_set.spawn(async move {
        processing_loop.run(&mut source).await;
        Ok(name)
    });
}

// ============================================================================
// Service
// ============================================================================

enum InputMode {
    HttpOnly,
    Stdin,
    Tcp(String),
    Replay(PathBuf, u64),
}

impl InputMode {
    fn from_args(args: &CliArgs) -> Self {
        if args.stdin {
            Self::Stdin
        } else if let Some(addr) = &args.tcp {
            Self::Tcp(addr.clone())
        } else if let Some(path) = &args.replay {
            Self::Replay(path.clone(), args.replay_delay_ms)
        } else {
            Self::HttpOnly
        }
    }
}

async fn run_service(config: &ServiceConfig, input: InputMode, cancel_token: CancellationToken) -> Result<()> {
    let data_dir = &config.store.data_dir;
    let _process_lock = ProcessLock::acquire(data_dir)?;

    let stores = Stores::open(&config.store)?;
    let stats = Arc::new(PipelineStats::new());
    let pipeline = Arc::new(IngestPipeline::from_config(
        config,
        Arc::clone(&stores.events),
        Arc::clone(&stats),
    )?);
    let dead_letters = Arc::new(
        DeadLetterQueue::open(storage::dead_letter_dir(data_dir), config.pipeline.dead_letter_max_entries)
            .context("Failed to open dead-letter queue")?,
    );

    let checks: Vec<Box<dyn HealthCheck>> = vec![
        Box::new(TransportSilenceCheck::new(
            Arc::clone(&stats),
            Duration::from_secs(config.transport.silence_warning_secs),
        )),
        Box::new(StoreHealthCheck::new(Arc::clone(&stores.events))),
        Box::new(DiskHealthCheck::new(data_dir.clone(), config.health.min_free_disk_mb)),
        Box::new(DeadLetterBacklogCheck::new(
            Arc::clone(&dead_letters),
            config.health.dead_letter_backlog_warning,
        )),
    ];
    let monitor = HealthMonitor::new(checks, Duration::from_secs(config.health.interval_secs));

    let (ingest_tx, ingest_source) =
        ChannelSource::new(config.pipeline.ingest_queue_capacity, config.transport.topic_prefix.clone());

    let mut api_state = ApiState::new(stores.clone(), Arc::clone(&stats), config.store.scan_limit)
        .with_health(monitor.health_handle())
        .with_ingest(ingest_tx)
        .with_dead_letters(Arc::clone(&dead_letters));
    if config.archiver.kind == ArchiverKind::Local {
        api_state = api_state.with_artifacts_dir(config.archiver.local_dir(data_dir));
    }
    if let Some(archiver) = pipeline.archiver() {
        api_state = api_state.with_archiver(Arc::clone(archiver), pipeline.archive_timeout());
    }
    let app = create_app(api_state);

    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.addr))?;
    info!(addr = %config.server.addr, "HTTP server listening");

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());

    let health_cancel = cancel_token.clone();
    task_set.spawn(async move {
        monitor.run(health_cancel).await;
        Ok(TaskName::HealthMonitor)
    });

    let (retry_queue, retry_store, retry_cancel) =
        (Arc::clone(&dead_letters), Arc::clone(&stores.events), cancel_token.clone());
    let retry_interval = Duration::from_secs(config.pipeline.retry_interval_secs);
    task_set.spawn(async move {
        dead_letter::run_retry(retry_queue, retry_store, retry_interval, retry_cancel).await;
        Ok(TaskName::DeadLetterRetry)
    });

    let new_loop = || {
        ProcessingLoop::new(Arc::clone(&pipeline), config.pipeline.workers, cancel_token.clone())
            .with_dead_letters(Arc::clone(&dead_letters))
    };
    spawn_processor(&mut task_set, new_loop(), ingest_source, TaskName::HttpIngest);

    match input {
        InputMode::HttpOnly => info!("Input: HTTP ingest only"),
        InputMode::Stdin => {
            info!("Input: stdin envelope lines");
            spawn_processor(&mut task_set, new_loop(), StdinSource::new(), TaskName::SourceProcessor);
        }
        InputMode::Tcp(addr) => {
            info!(addr = %addr, "Input: TCP bridge");
            let client = TcpBridgeClient::new(addr)
                .with_reconnect(config.transport.reconnect_max_attempts, defaults::RECONNECT_INITIAL_DELAY_SECS)
                .with_read_timeout(config.transport.silence_warning_secs);
            let source = TcpSource::connect(client).await?;
            spawn_processor(&mut task_set, new_loop(), source, TaskName::SourceProcessor);
        }
        InputMode::Replay(path, delay_ms) => {
            info!(path = %path.display(), delay_ms, "Input: replay file");
            let source = ReplaySource::from_file(&path, delay_ms)?;
            spawn_processor(&mut task_set, new_loop(), source, TaskName::SourceProcessor);
        }
    }

    let outcome = run_supervisor(&mut task_set, cancel_token).await;
    info!("{}", stats.snapshot());
    outcome
}

/// Operator retention: delete records older than `days`.
fn run_prune(config: &ServiceConfig, days: u32) -> Result<()> {
    let _process_lock = ProcessLock::acquire(&config.store.data_dir)?;
    let stores = Stores::open(&config.store)?;
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
    let removed = stores
        .events
        .prune_before(cutoff)
        .context("Prune failed")?;
    info!(removed, cutoff = %cutoff, "Prune complete");
    println!("Removed {removed} records captured before {}", cutoff.to_rfc3339());
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_format);

    config::init(load_config(&args)?);
    let config = config::get();

    match &args.command {
        Some(SubCommand::Prune { days }) => return run_prune(config, *days),
        Some(SubCommand::ShowConfig) => {
            print!("{}", config.to_toml()?);
            return Ok(());
        }
        None => {}
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.store.data_dir.display(),
        "Panel Sentinel starting"
    );

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    run_service(config, InputMode::from_args(&args), cancel_token).await?;
    info!("Panel Sentinel shutdown complete");
    Ok(())
}
