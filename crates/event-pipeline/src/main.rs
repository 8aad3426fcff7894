//! event-relay binary entry point.
//!
//! Usage: event-relay [--db <path>] [--endpoint <url>] < events.jsonl
//!
//! Reads one JSON-encoded event per line from stdin and feeds it through the
//! pipeline. On EOF or Ctrl-C the remaining records are flushed and the
//! store is closed.

use anyhow::Context;
use clap::Parser;
use event_model::UserEvent;
use event_pipeline::logging::{self, LogConfig};
use event_pipeline::{EventProcessor, PipelineConfig};
use event_store::{MemoryRecordStore, RecordStore, SqliteRecordStore};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Relay SDK events from stdin to an event collector.
#[derive(Parser, Debug)]
#[command(name = "event-relay")]
#[command(about = "Buffered, deduplicated delivery of SDK events to a collector")]
struct Args {
    /// Path of the SQLite event store.
    #[arg(long, env = "EVENT_RELAY_DB")]
    db: Option<PathBuf>,

    /// Keep records in memory only.
    #[arg(long, conflicts_with = "db")]
    memory: bool,

    /// Collector base URL.
    #[arg(long, env = "EVENT_PIPELINE_URL")]
    endpoint: Option<String>,

    /// API key sent as X-Api-Key.
    #[arg(long, env = "EVENT_PIPELINE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("event-relay")
        .join("events.db")
}

fn open_store(args: &Args) -> anyhow::Result<Box<dyn RecordStore>> {
    if args.memory {
        return Ok(Box::new(MemoryRecordStore::new()));
    }

    let path = args.db.clone().unwrap_or_else(default_db_path);
    let store = SqliteRecordStore::open(&path)
        .with_context(|| format!("failed to open event store at {}", path.display()))?;
    Ok(Box::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init_with_config(LogConfig {
        service_name: "event-relay".into(),
        default_level: args.log_level.clone(),
        json: args.json_logs,
    });

    let mut config = PipelineConfig::from_env().context("invalid pipeline configuration")?;
    if let Some(endpoint) = &args.endpoint {
        config.event_url = endpoint.clone();
    }
    if args.api_key.is_some() {
        config.api_key = args.api_key.clone();
    }
    config.validate()?;

    info!(
        endpoint = %config.events_endpoint(),
        storage_max_size = config.storage_max_size,
        flush_interval_ms = config.flush_interval.as_millis() as u64,
        "Configuration loaded"
    );

    let store = open_store(&args)?;
    let processor = EventProcessor::with_http(config, store)?;
    processor.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = 0u64;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        };

        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<UserEvent>(line) {
            Ok(event) => {
                processor.process(event);
                accepted += 1;
            }
            Err(e) => warn!(error = %e, "Skipping malformed event line"),
        }
    }

    info!(accepted, "Input finished, closing");
    processor.close().await;
    Ok(())
}
