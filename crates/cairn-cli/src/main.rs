//! cairn - command-line composition root
//!
//! 設定の優先順位（後勝ち）:
//! 1. 組み込みデフォルト
//! 2. 設定ファイル（`--config` / `CAIRN_CONFIG`、既定は `cairn.toml`）
//! 3. `CAIRN_*` 環境変数
//! 4. CLI フラグ

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cairn_core::app::{
    CairnConfig, IngestScheduler, RetrievalGateway, SchedulerDeps, SchedulerError,
};
use cairn_core::domain::{JobId, JobRecord, RetrievalOptions, content_digest};
use cairn_core::impls::{
    FileLedgerStore, FilePayloadStore, FileStatusArtifactStore, ProcessWorkerGateway,
};
use cairn_core::ports::{Clock, IdGenerator, LedgerStore, SystemClock, UlidGenerator};

/// Stage editor summaries into a knowledge graph and query it back.
#[derive(Parser, Debug)]
#[command(name = "cairn", version, about, long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true, env = "CAIRN_VERBOSE")]
    verbose: bool,

    /// Path to the configuration file
    #[arg(long, global = true, env = "CAIRN_CONFIG", default_value = "cairn.toml")]
    config: PathBuf,

    /// Workspace directory holding the ledger, payloads and status files
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Worker program to spawn
    #[arg(long, global = true)]
    worker: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a summary and wait until it settles
    Submit {
        /// Dataset (workspace graph) to write into
        #[arg(long)]
        dataset: String,

        /// Read the summary from a file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,

        /// Use this content digest instead of hashing the summary
        #[arg(long)]
        digest: Option<String>,
    },

    /// Show the job ledger
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Retry a failed or unknown job and wait until it settles
    Retry { job_id: String },

    /// Query the knowledge graph
    Search {
        query: String,

        #[arg(long)]
        max_results: Option<usize>,

        #[arg(long)]
        max_tokens: Option<usize>,

        #[arg(long)]
        dataset: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove jobs past their retention window
    Purge,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = CairnConfig::load(&cli.config)?;
    config.apply_env()?;
    if let Some(dir) = cli.workspace {
        config.storage.workspace_dir = dir;
    }
    if let Some(program) = cli.worker {
        config.worker.program = program;
    }

    match cli.command {
        Command::Status { json } => status(&config, json).await,
        Command::Search {
            query,
            max_results,
            max_tokens,
            dataset,
            json,
        } => {
            let mut options = RetrievalOptions::default();
            options.max_results = max_results;
            options.max_tokens = max_tokens;
            options.dataset_key = dataset;
            search(&config, &query, options, json).await
        }
        Command::Submit {
            dataset,
            file,
            digest,
        } => {
            let text = match file {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => read_stdin().await?,
            };
            let digest = digest.unwrap_or_else(|| content_digest(&text));
            let payload = serde_json::json!({ "summary": text });
            with_scheduler(&config, |scheduler| async move {
                let receipt = scheduler.submit(&digest, &dataset, payload).await?;
                eprintln!(
                    "{} admitted ({}{})",
                    receipt.job_id,
                    receipt.status,
                    receipt
                        .queue_position
                        .map(|p| format!(", position {p}"))
                        .unwrap_or_default()
                );
                Ok(Some(receipt.job_id))
            })
            .await
        }
        Command::Retry { job_id } => {
            let job_id: JobId = job_id.parse()?;
            with_scheduler(&config, |scheduler| async move {
                let receipt = scheduler.retry(job_id).await?;
                eprintln!("{} re-admitted ({})", receipt.job_id, receipt.status);
                Ok(Some(receipt.job_id))
            })
            .await
        }
        Command::Purge => {
            with_scheduler(&config, |scheduler| async move {
                let removed = scheduler.purge_expired().await?;
                println!("purged {removed} job(s)");
                Ok(None)
            })
            .await
        }
    }
}

async fn read_stdin() -> anyhow::Result<String> {
    use tokio::io::AsyncReadExt;
    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .context("failed to read summary from stdin")?;
    Ok(text)
}

fn spawn_gateway(config: &CairnConfig) -> anyhow::Result<Arc<ProcessWorkerGateway>> {
    match config.worker.command() {
        Some(command) => Ok(Arc::new(
            ProcessWorkerGateway::spawn(&command).context("failed to start the memory worker")?,
        )),
        None => {
            tracing::warn!("no worker program configured; the memory worker is disabled");
            Ok(Arc::new(ProcessWorkerGateway::disabled()))
        }
    }
}

/// Start a scheduler, run `op`, wait for the job it returns, then shut down.
async fn with_scheduler<F, Fut>(config: &CairnConfig, op: F) -> anyhow::Result<ExitCode>
where
    F: FnOnce(Arc<IngestScheduler>) -> Fut,
    Fut: std::future::Future<Output = Result<Option<JobId>, SchedulerError>>,
{
    let storage = &config.storage;
    let gateway = spawn_gateway(config)?;
    let deps = SchedulerDeps::builder()
        .ledger(Arc::new(FileLedgerStore::new(storage.ledger_dir())))
        .payloads(Arc::new(FilePayloadStore::new(storage.payload_dir())))
        .artifacts(Arc::new(FileStatusArtifactStore::new(storage.status_dir())))
        .gateway(gateway.clone())
        .build()?;
    let scheduler = Arc::new(
        IngestScheduler::start(
            deps,
            config.scheduler.clone(),
            config.notifications.clone(),
        )
        .await?,
    );

    let outcome = op(Arc::clone(&scheduler)).await;
    let mut code = ExitCode::SUCCESS;

    match outcome {
        Ok(Some(job_id)) => {
            let budget = config.scheduler.ingest_timeout()
                + config.scheduler.status_poll_timeout()
                + Duration::from_secs(5);
            tokio::select! {
                settled = scheduler.wait_settled(job_id, budget) => match settled {
                    Some(job) => {
                        print_job(&job);
                        if job.status != cairn_core::domain::JobStatus::Completed {
                            code = ExitCode::FAILURE;
                        }
                    }
                    None => {
                        eprintln!("{job_id} did not settle in time");
                        code = ExitCode::FAILURE;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("interrupted, shutting down");
                    code = ExitCode::FAILURE;
                }
            }
        }
        Ok(None) => {}
        Err(e) => {
            match e.code() {
                Some(c) => eprintln!("rejected ({c}): {e}"),
                None => eprintln!("error: {e}"),
            }
            code = ExitCode::FAILURE;
        }
    }

    scheduler.shutdown().await?;
    gateway.shutdown().await;
    Ok(code)
}

async fn status(config: &CairnConfig, json: bool) -> anyhow::Result<ExitCode> {
    let ledger = FileLedgerStore::new(config.storage.ledger_dir());
    let jobs = ledger.load().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(ExitCode::SUCCESS);
    }
    if jobs.is_empty() {
        println!("no jobs");
    }
    for job in &jobs {
        print_job(job);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_job(job: &JobRecord) {
    let mut line = format!("{}  {:<10}  {}", job.id, job.status.as_str(), job.dataset_key);
    if let Some(p) = job.queue_position {
        line.push_str(&format!("  position={p}"));
    }
    if let Some(n) = job.result_entity_count {
        line.push_str(&format!("  entities={n}"));
    }
    if let Some(code) = &job.error_code {
        line.push_str(&format!("  error={code}"));
    }
    if let Some(msg) = &job.error_message {
        line.push_str(&format!("  ({msg})"));
    }
    if job.retry_count > 0 {
        line.push_str(&format!("  retries={}", job.retry_count));
    }
    println!("{line}");
}

async fn search(
    config: &CairnConfig,
    query: &str,
    options: RetrievalOptions,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let gateway = spawn_gateway(config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
    let retrieval = RetrievalGateway::new(gateway.clone(), clock, ids, config.retrieval.clone());

    let result = retrieval.search(query, options).await;
    gateway.shutdown().await;

    match result {
        Ok(response) if json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(ExitCode::SUCCESS)
        }
        Ok(response) => {
            for entry in &response.entries {
                println!("[{:.3}] {}", entry.score, entry.text);
            }
            eprintln!(
                "{} result(s) in {}ms",
                response.entries.len(),
                response.elapsed_ms
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("search failed ({}): {e}", e.code());
            Ok(ExitCode::FAILURE)
        }
    }
}
