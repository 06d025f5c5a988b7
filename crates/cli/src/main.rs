mod args;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use gleaner_core::audit::AuditStore;
use gleaner_core::batch::{BatchCoordinator, BatchOptions};
use gleaner_core::cleanup::cleanup_orphans;
use gleaner_core::job::{JobStatus, JobStore};
use gleaner_core::pipeline::PipelineDeps;
use gleaner_core::progress::DEFAULT_PROGRESS_CAPACITY;
use gleaner_core::{
    create_audit_system, load_config, metrics, parse_note, parse_reference, validate_config,
    Admission, AnthropicSummarizer, AuditEvent, AuditHandle, Config, JobQueue, ProcessOutcome,
    ProgressNotifier, SqliteAuditStore, SqliteJobStore, SubmitStatus, Worker,
    WhisperCliTranscriber, YtDlpSource,
};

use args::{Cli, Command};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Queue depth for `watch`.
const WATCH_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,gleaner_core=debug".into());
    let json = std::env::var("GLEANER_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

struct App {
    config: Config,
    worker: Arc<Worker>,
    store: Arc<SqliteJobStore>,
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging();

    let config_path = std::env::var("GLEANER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;
    info!("Database path: {:?}", config.database.path);

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));

    if let Some(parent) = config.database.path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create database directory {:?}", parent))?;
    }
    let store = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );

    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), config.audit.buffer_size);
    let writer_handle = tokio::spawn(audit_writer.run());
    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash[..16].to_string(),
        })
        .await;

    let registry = Registry::new();
    metrics::register(&registry).context("Failed to register metrics")?;

    let progress = ProgressNotifier::new(DEFAULT_PROGRESS_CAPACITY);
    let progress_task = tokio::spawn(log_progress(progress.clone()));

    let app = build_app(config, store, audit_handle.clone(), progress);

    match app.worker.recover_interrupted() {
        Ok(0) => {}
        Ok(n) => warn!("Reset {} interrupted job(s) to pending", n),
        Err(e) => warn!("Could not recover interrupted jobs: {}", e),
    }

    if app.config.cleanup.cleanup_temp {
        let retention = Duration::from_secs(app.config.cleanup.orphan_retention_hours * 3600);
        if let Err(e) = cleanup_orphans(&app.config.pipeline.temp_dir, retention).await {
            warn!("Temp cleanup failed: {}", e);
        }
    }

    let result = execute(&app, &cli).await;

    if cli.metrics {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        print!("{}", String::from_utf8_lossy(&buffer));
    }

    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: if result.is_ok() { "finished" } else { "failed" }.to_string(),
        })
        .await;

    // Every AuditHandle clone must be gone before the writer can drain and stop.
    drop(app);
    drop(audit_handle);
    let _ = writer_handle.await;
    progress_task.abort();

    result
}

fn build_app(
    config: Config,
    store: Arc<SqliteJobStore>,
    audit: AuditHandle,
    progress: ProgressNotifier,
) -> App {
    let transcriber = Arc::new(WhisperCliTranscriber::new(config.transcriber.clone()));
    let external = Arc::new(YtDlpSource::new(config.external.clone()));

    let mut deps = PipelineDeps::new(store.clone(), transcriber, config.pipeline.clone())
        .with_external(external)
        .with_progress(progress)
        .with_audit(audit);

    if let Some(summarizer) = &config.summarizer {
        info!("Summaries enabled ({})", summarizer.model);
        deps = deps.with_summarizer(
            Arc::new(AnthropicSummarizer::new(summarizer)),
            &summarizer.language,
        );
    }

    App {
        worker: Arc::new(Worker::new(deps)),
        store,
        config,
    }
}

async fn log_progress(progress: ProgressNotifier) {
    let mut events = progress.subscribe().dedup();
    drop(progress);
    while let Some(event) = events.recv().await {
        match &event.extra {
            Some(extra) => info!(job_id = %event.job_id, status = %event.status, "{}", extra),
            None => info!(job_id = %event.job_id, status = %event.status, "Progress"),
        }
    }
}

async fn execute(app: &App, cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Command::Run { url } => run_one(app, url, cli.from_start).await,
        Command::Batch { note } => run_batch(app, note, cli.from_start).await,
        Command::Retry { job_id } => retry(app, job_id, cli.from_start).await,
        Command::Status { job_id } => status(app, job_id),
        Command::Watch => watch(app, cli.from_start).await,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn run_one(app: &App, url: &str, from_start: bool) -> Result<ExitCode> {
    let reference = parse_reference(url).with_context(|| format!("Invalid reference {:?}", url))?;
    let admission = app
        .worker
        .admit(&reference, from_start)
        .await
        .context("Failed to register job")?;

    let job = match admission {
        Admission::AlreadyDone(job) => {
            let dir = reference.output_dir(job.kind, &app.config.pipeline.output_dir);
            info!(job_id = %job.id, "Already processed");
            print_json(&serde_json::json!({
                "outcome": "completed",
                "job_id": job.id,
                "output_dir": dir,
                "cached": true,
            }))?;
            return Ok(ExitCode::SUCCESS);
        }
        Admission::InProgress(job) => {
            bail!("job {} is already in progress ({})", job.id, job.status)
        }
        Admission::Ready(job) => job,
    };

    let outcome = app.worker.process(&job.id, &reference, from_start).await;
    print_json(&outcome)?;
    Ok(match outcome {
        ProcessOutcome::Completed(_) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

async fn run_batch(app: &App, note: &PathBuf, from_start: bool) -> Result<ExitCode> {
    let text = tokio::fs::read_to_string(note)
        .await
        .with_context(|| format!("Failed to read note {:?}", note))?;
    let note = parse_note(&text);
    for problem in &note.errors {
        warn!("{}", problem);
    }
    if note.entries.is_empty() {
        bail!("note contains no links");
    }

    let coordinator = BatchCoordinator::new(app.worker.clone());
    let result = coordinator
        .run(note.into(), BatchOptions { from_start })
        .await
        .context("Batch aborted")?;
    print_json(&result)?;

    Ok(if result.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn retry(app: &App, job_id: &str, from_start: bool) -> Result<ExitCode> {
    let queue = JobQueue::start(app.worker.clone(), 1);
    let outcome = queue.retry(job_id, from_start).await;
    queue.shutdown().await;
    let outcome = outcome.context("Retry rejected")?;
    info!(job_id = %outcome.job_id, "{}", outcome.message);
    status(app, job_id)
}

fn status(app: &App, job_id: &str) -> Result<ExitCode> {
    let job = app
        .store
        .get(job_id)
        .context("Failed to read job")?
        .with_context(|| format!("No job with id {}", job_id))?;
    let exports = app.store.list_exports(job_id).context("Failed to read exports")?;
    let errors = app.store.list_errors(job_id).context("Failed to read errors")?;

    print_json(&serde_json::json!({
        "job": job,
        "exports": exports,
        "errors": errors,
    }))?;
    Ok(if job.status == JobStatus::Error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Submit every URL read from stdin until EOF or Ctrl+C.
async fn watch(app: &App, from_start: bool) -> Result<ExitCode> {
    let queue = JobQueue::start(app.worker.clone(), WATCH_QUEUE_CAPACITY);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Reading links from stdin");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = shutdown_signal() => {
                info!("Interrupted, finishing queued jobs");
                break;
            }
        };
        let Some(line) = line else { break };
        let url = line.trim();
        if url.is_empty() || url.starts_with('#') {
            continue;
        }

        match queue.submit(url, from_start).await {
            Ok(outcome) => match outcome.status {
                SubmitStatus::Queued => info!(job_id = %outcome.job_id, "Queued {}", url),
                SubmitStatus::AlreadyDone => info!(job_id = %outcome.job_id, "Already done: {}", url),
                SubmitStatus::Conflict => warn!(job_id = %outcome.job_id, "{}: {}", url, outcome.message),
            },
            Err(e) => warn!("Skipping {:?}: {}", url, e),
        }
    }

    queue.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
