//! worklog - CI worker log telemetry extraction
//!
//! ## Commands
//!
//! - `extract`: Print the extraction result of the newest worker log as JSON
//! - `records`: Print the outbound telemetry records as NDJSON
//! - `publish`: Send the telemetry batch to a collector endpoint

mod discover;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use worklog_core::{build_batch, extract_file, ExtractionResult};
use worklog_sink::{HttpSink, SinkConfig, StdoutSink, TelemetrySink};

#[derive(Parser)]
#[command(name = "worklog")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract execution telemetry from CI runner worker logs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the worker log comes from.
#[derive(Args, Debug)]
struct SourceArgs {
    /// Runner diagnostics directory searched for the newest `Worker_*` log
    #[arg(long, env = "RUNNER_WORKSPACE_DIAG", default_value = "/home/runner/_diag")]
    diag_dir: PathBuf,

    /// Read this log file instead of searching (takes precedence over --diag-dir)
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the extraction result as JSON
    Extract {
        #[command(flatten)]
        source: SourceArgs,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Print the telemetry records as newline-delimited JSON
    Records {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Send the telemetry batch to a collector
    Publish {
        #[command(flatten)]
        source: SourceArgs,

        /// Collector endpoint URL
        #[arg(long, env = "TELEMETRY_ENDPOINT")]
        endpoint: Option<String>,

        /// Key sent in the X-Telemetry-Key header
        #[arg(long, env = "TELEMETRY_KEY", hide_env_values = true)]
        telemetry_key: Option<String>,

        /// Delivery attempts before giving up
        #[arg(long, default_value = "3")]
        max_attempts: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    worklog_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Extract { source, pretty } => cmd_extract(&source, pretty),
        Commands::Records { source } => cmd_records(&source).await,
        Commands::Publish {
            source,
            endpoint,
            telemetry_key,
            max_attempts,
        } => cmd_publish(&source, endpoint, telemetry_key, max_attempts).await,
    }
}

/// Pick the log to read. `None` means nothing to do.
fn resolve_source(source: &SourceArgs) -> Result<Option<PathBuf>> {
    if let Some(file) = &source.file {
        return Ok(Some(file.clone()));
    }

    let found = discover::newest_worker_log(&source.diag_dir).with_context(|| {
        format!(
            "Failed to search {} for worker logs",
            source.diag_dir.display()
        )
    })?;
    if found.is_none() {
        warn!(
            diag_dir = %source.diag_dir.display(),
            "No {}* log found; nothing to extract",
            discover::WORKER_LOG_PREFIX
        );
    }
    Ok(found)
}

fn load(source: &SourceArgs) -> Result<Option<ExtractionResult>> {
    let Some(path) = resolve_source(source)? else {
        return Ok(None);
    };
    let result = extract_file(&path)
        .with_context(|| format!("Failed to extract telemetry from {}", path.display()))?;
    if result.is_empty() {
        warn!(path = %path.display(), "No job or step markers found in log");
    }
    Ok(Some(result))
}

fn cmd_extract(source: &SourceArgs, pretty: bool) -> Result<()> {
    let Some(result) = load(source)? else {
        return Ok(());
    };

    let json = if pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{json}");
    Ok(())
}

async fn cmd_records(source: &SourceArgs) -> Result<()> {
    let Some(result) = load(source)? else {
        return Ok(());
    };

    let batch = build_batch(&result);
    StdoutSink::stdout()
        .send(&batch)
        .await
        .context("Failed to write telemetry records")?;
    Ok(())
}

async fn cmd_publish(
    source: &SourceArgs,
    endpoint: Option<String>,
    telemetry_key: Option<String>,
    max_attempts: u32,
) -> Result<()> {
    let Some(result) = load(source)? else {
        return Ok(());
    };

    let mut config = SinkConfig::from_env().with_max_attempts(max_attempts);
    if endpoint.is_some() {
        config.endpoint = endpoint;
    }
    if telemetry_key.is_some() {
        config.key = telemetry_key;
    }
    if config.key.is_none() {
        warn!("No telemetry key configured; sending without X-Telemetry-Key");
    }

    let sink = HttpSink::new(config).context("Failed to set up HTTP telemetry sink")?;
    let batch = build_batch(&result);
    sink.send(&batch)
        .await
        .with_context(|| format!("Failed to publish telemetry to {}", sink.endpoint()))?;

    info!(
        job_id = batch.summary.job_id.as_deref().unwrap_or("-"),
        records = batch.record_count(),
        "Telemetry published"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_file_takes_precedence_over_diag_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("custom.log");
        std::fs::write(&file, "").unwrap();

        let source = SourceArgs {
            diag_dir: dir.path().join("missing"),
            file: Some(file.clone()),
        };
        assert_eq!(resolve_source(&source).unwrap(), Some(file));
    }

    #[test]
    fn test_empty_diag_dir_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = SourceArgs {
            diag_dir: dir.path().to_path_buf(),
            file: None,
        };
        assert!(load(&source).unwrap().is_none());
    }

    #[test]
    fn test_unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = SourceArgs {
            diag_dir: dir.path().to_path_buf(),
            file: Some(dir.path().join("Worker_gone.log")),
        };
        assert!(load(&source).is_err());
    }

    #[test]
    fn test_parse_publish_flags() {
        let cli = Cli::try_parse_from([
            "worklog",
            "--json",
            "publish",
            "--file",
            "Worker_1.log",
            "--endpoint",
            "http://collector/ingest",
            "--telemetry-key",
            "k",
            "--max-attempts",
            "5",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Publish {
                source,
                endpoint,
                telemetry_key,
                max_attempts,
            } => {
                assert_eq!(source.file, Some(PathBuf::from("Worker_1.log")));
                assert_eq!(endpoint.as_deref(), Some("http://collector/ingest"));
                assert_eq!(telemetry_key.as_deref(), Some("k"));
                assert_eq!(max_attempts, 5);
            }
            _ => panic!("expected publish"),
        }
    }
}
