//! arxivist - arXiv harvesting and bulk archive unpacking

use anyhow::{Context, Result};
use arxivist_common::logging::{init_logging, LogConfig, LogLevel};
use arxivist_ingest::checkpoint::{CheckpointStore, Cursor, SqlCheckpointStore};
use arxivist_ingest::fetch::ArtifactFetcher;
use arxivist_ingest::harvest::{HarvestOptions, Harvester, OaiClient};
use arxivist_ingest::storage::{ObjectStore, S3ObjectStore};
use arxivist_ingest::unpack::{ConsumeMode, SqsQueue, UnpackDispatcher, UnpackWorker, WorkQueue};
use arxivist_ingest::Config;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default directives that keep SDK internals quiet at info level
const QUIET_DEPENDENCIES: &str = "aws_config=warn,aws_smithy_runtime=warn,hyper_util=warn,sqlx=warn";

#[derive(Parser, Debug)]
#[command(name = "arxivist")]
#[command(author, version, about = "arXiv harvesting and bulk archive unpacking")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest records and PDFs since the stored checkpoint
    Harvest {
        /// Start date (YYYY-MM-DD), overriding the stored checkpoint
        #[arg(long)]
        from: Option<String>,

        /// OAI set to restrict the harvest to, e.g. "cs"
        #[arg(long)]
        set: Option<String>,
    },

    /// Enqueue every archive under a prefix that has not been unpacked
    Dispatch {
        #[arg(long, default_value = "pdf/")]
        prefix: String,
    },

    /// Consume the untar queue
    Unpack {
        /// Concurrent consumers (defaults to UNPACK_WORKERS)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Stop once the queue returns no messages
        #[arg(long)]
        until_empty: bool,
    },

    /// Unpack a single archive without going through the queue
    UnpackOne {
        #[arg(long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("arxivist")
        .filter_directives(QUIET_DEPENDENCIES)
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = Config::from_env().context("Invalid configuration")?;
    let cancel = CancellationToken::new();
    listen_for_shutdown(cancel.clone());

    match cli.command {
        Command::Harvest { from, set } => {
            if set.is_some() {
                config.harvest.set = set;
            }
            harvest(&config, from, &cancel).await?;
        },
        Command::Dispatch { prefix } => dispatch(&config, &prefix).await?,
        Command::Unpack {
            workers,
            until_empty,
        } => {
            let workers = workers.unwrap_or(config.unpack.workers);
            let mode = if until_empty {
                ConsumeMode::UntilIdle
            } else {
                ConsumeMode::Forever
            };
            unpack(&config, workers, mode, cancel).await?;
        },
        Command::UnpackOne { key } => unpack_one(&config, &key, &cancel).await?,
    }

    Ok(())
}

fn listen_for_shutdown(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown requested, finishing current unit of work");
            cancel.cancel();
        }
    });
}

fn print_summary<T: Serialize>(summary: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

async fn object_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    let store = S3ObjectStore::new(&config.storage, config.retry.policy())
        .await
        .context("Failed to initialize object store")?;
    Ok(Arc::new(store))
}

async fn work_queue(config: &Config) -> Result<Arc<dyn WorkQueue>> {
    let queue = SqsQueue::new(&config.storage, &config.queue, config.retry.policy())
        .await
        .context("Failed to initialize untar queue")?;
    Ok(Arc::new(queue))
}

async fn harvest(config: &Config, from: Option<String>, cancel: &CancellationToken) -> Result<()> {
    let retry = config.retry.policy();

    let checkpoint = SqlCheckpointStore::connect(&config.checkpoint, retry)
        .await
        .context("Failed to open checkpoint store")?;

    let start = match from {
        Some(date) => {
            NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .with_context(|| format!("--from must be YYYY-MM-DD, got {}", date))?;
            Some(Cursor::new(date))
        },
        None => checkpoint.load().await?,
    };

    let harvester = Harvester::new(
        Arc::new(OaiClient::new(&config.harvest, &config.fetch.user_agent, retry)?),
        object_store(config).await?,
        Arc::new(ArtifactFetcher::new(&config.fetch, retry)?),
        Arc::new(checkpoint),
        HarvestOptions {
            epoch: config.harvest.epoch.clone(),
            partition_keys: config.harvest.partition_keys,
        },
    );

    let outcome = harvester.run(start, cancel).await.context("Harvest failed")?;
    if outcome.interrupted {
        info!(cursor = ?outcome.cursor, "Harvest stopped early; rerun to resume");
    }
    print_summary(&outcome.stats)
}

async fn dispatch(config: &Config, prefix: &str) -> Result<()> {
    let dispatcher = UnpackDispatcher::new(
        object_store(config).await?,
        work_queue(config).await?,
        config.unpack.status_prefix.clone(),
    );
    let stats = dispatcher.scan(prefix).await.context("Dispatch failed")?;
    print_summary(&stats)
}

async fn unpack(config: &Config, workers: usize, mode: ConsumeMode, cancel: CancellationToken) -> Result<()> {
    let worker = Arc::new(UnpackWorker::new(
        object_store(config).await?,
        config.unpack.extract_prefix.clone(),
        config.unpack.status_prefix.clone(),
    ));

    info!(workers, "Starting unpack workers");
    let stats = worker
        .run_pool(
            work_queue(config).await?,
            workers,
            config.queue.batch_size as usize,
            mode,
            cancel,
        )
        .await
        .context("Unpack workers failed")?;
    print_summary(&stats)
}

async fn unpack_one(config: &Config, key: &str, cancel: &CancellationToken) -> Result<()> {
    let worker = UnpackWorker::new(
        object_store(config).await?,
        config.unpack.extract_prefix.clone(),
        config.unpack.status_prefix.clone(),
    );
    let outcome = worker
        .process(key, cancel)
        .await
        .with_context(|| format!("Failed to unpack {}", key))?;
    info!(key = %key, outcome = ?outcome, "Done");
    Ok(())
}
