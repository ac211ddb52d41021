use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use enrichment_pipeline::client::ApiKey;
use enrichment_pipeline::config::{Config, ConfigLoader};
use enrichment_pipeline::history::{HistoryLog, HistoryStatus};
use enrichment_pipeline::jobs::{JobId, LogLine};
use enrichment_pipeline::scheduler::JobOutcome;
use enrichment_pipeline::server::ApiServer;
use enrichment_pipeline::service::EnrichmentService;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Enrich contact spreadsheets with email addresses
#[derive(Parser)]
#[command(name = "enrich", version)]
#[command(about = "Batch contact enrichment against a people-match API", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich a CSV file and write the result next to the job history
    Run {
        /// Input CSV with First Name, Last Name, LinkedIn URL, Company Name and Company Website columns
        input: PathBuf,

        /// API key (falls back to ENRICH_API_KEY or the config file)
        #[arg(short = 'k', long)]
        api_key: Option<String>,
    },
    /// Show previously processed jobs, newest first
    History {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Serve the JSON API
    Serve {
        /// Address to listen on (default: 127.0.0.1:5000)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn,enrichment_pipeline=info",
        1 => "debug",
        2 => "trace",
        _ => "trace,hyper=debug,reqwest=debug",
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .init();

    debug!("enrich started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match ConfigLoader::new(cli.config).load().await {
        Ok(config) => match cli.command {
            Commands::Run { input, api_key } => run_job(config, input, api_key).await,
            Commands::History { json } => show_history(config, json).await,
            Commands::Serve { bind } => serve(config, bind).await,
        },
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run_job(config: Config, input: PathBuf, api_key: Option<String>) -> anyhow::Result<()> {
    let api_key = api_key
        .or_else(|| config.api.api_key.clone())
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow!("No API key provided. Use --api-key or set ENRICH_API_KEY"))?;

    if !input.is_file() {
        bail!("Input file not found: {}", input.display());
    }
    let original_name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let service = EnrichmentService::from_config(&config).context("Failed to create API client")?;
    let id = service
        .submit(&input, original_name, ApiKey::new(api_key))
        .await?;
    println!("Started job {}", id);

    follow(&service, id).await;

    match service.wait(id).await {
        Some(JobOutcome::Completed {
            output,
            rows_processed,
        }) => {
            println!(
                "Enriched {} rows. Output saved to {}",
                rows_processed,
                output.display()
            );
            Ok(())
        }
        Some(JobOutcome::Failed { error }) => bail!("Job failed: {}", error),
        None => bail!("Job {} ended in an unknown state", id),
    }
}

/// Print job log lines as they arrive until the job is terminal. Ctrl-C
/// cancels the job and keeps following until it stops.
async fn follow(service: &EnrichmentService, id: JobId) {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut interrupted = false;
    let mut last: Option<LogLine> = None;

    loop {
        tokio::select! {
            signal = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    continue;
                }
                eprintln!("Interrupted, cancelling job {}...", id);
                service.cancel(id).await;
            }
            _ = ticker.tick() => {}
        }

        let done = service.poll(id).await.is_terminal();
        if let Some(logs) = service.logs(id).await {
            let start = last
                .as_ref()
                .and_then(|seen| logs.iter().rposition(|line| line == seen))
                .map_or(0, |pos| pos + 1);
            for line in &logs[start..] {
                println!("{}", line);
            }
            if let Some(line) = logs.last() {
                last = Some(line.clone());
            }
        }

        if done {
            break;
        }
    }
}

async fn show_history(config: Config, json: bool) -> anyhow::Result<()> {
    let history = HistoryLog::new(config.storage.history_file());
    let entries = history.list_all().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No jobs processed yet.");
        return Ok(());
    }

    println!(
        "{:<20} {:<10} {:>6}  {:<30} OUTPUT",
        "DATE", "STATUS", "ROWS", "FILE"
    );
    for entry in entries {
        let status = match entry.status {
            HistoryStatus::Completed => "completed",
            HistoryStatus::Failed => "failed",
        };
        let output = if entry.output_filename.is_empty() {
            "-"
        } else {
            entry.output_filename.as_str()
        };
        println!(
            "{:<20} {:<10} {:>6}  {:<30} {}",
            entry
                .timestamp
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            status,
            entry.rows_processed,
            entry.original_filename,
            output
        );
    }
    Ok(())
}

async fn serve(config: Config, bind: Option<String>) -> anyhow::Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let service = EnrichmentService::from_config(&config).context("Failed to create API client")?;
    ApiServer::new(Arc::new(service), bind).start().await
}
