use clap::{Parser, Subcommand};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info};

mod alerting;
mod config;
mod constants;
mod domain;
mod error;
mod error_handler;
mod logging;
mod pipeline;
mod server;
mod storage;
mod tasks;

use crate::alerting::InMemoryTransport;
use crate::config::Config;
use crate::error_handler::{ErrorHandler, InMemoryErrorLog};
use crate::pipeline::uploader::ContinuousUploader;
use crate::storage::{InMemoryBlobStore, InMemoryTableStore};
use crate::tasks::{IngestParams, PipelineContext};

#[derive(Parser)]
#[command(name = "energy-pipeline")]
#[command(about = "Renewable-energy telemetry pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one synthetic batch and upload it to the blob store
    Generate,
    /// Run the continuous uploader until stopped or the upload cap is hit
    Upload {
        /// Minutes between uploads (overrides config)
        #[arg(long)]
        interval_minutes: Option<u64>,
        /// Stop after this many uploads (overrides config)
        #[arg(long)]
        max_uploads: Option<u32>,
    },
    /// Ingest one uploaded object by key
    Ingest {
        /// Blob-store key of the batch to process
        #[arg(long)]
        key: String,
    },
    /// Start the query API server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the full pipeline once (generate, ingest, digest), then serve
    Run {
        /// Skip starting the API server afterwards
        #[arg(long)]
        no_serve: bool,
    },
}

// No metrics recorder is installed here: the `metrics` macros in the ingest
// path are no-ops until an exporter (e.g. a Prometheus recorder) is wired in.
fn build_context() -> PipelineContext {
    let blob = Arc::new(InMemoryBlobStore::new());
    let table = Arc::new(InMemoryTableStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let errors = Arc::new(ErrorHandler::new(
        Arc::new(InMemoryErrorLog::new()),
        transport.clone(),
    ));
    PipelineContext {
        blob,
        table,
        transport,
        errors,
    }
}

async fn upload_once(ctx: &PipelineContext, config: &Config) -> Option<String> {
    let mut uploader = ContinuousUploader::new(ctx.blob.clone(), ctx.errors.clone(), config);
    match uploader.upload_once().await {
        Ok(key) => {
            println!("✅ Uploaded batch: {key}");
            Some(key)
        }
        Err(e) => {
            error!("Upload failed: {e}");
            println!("❌ Upload failed: {e}");
            None
        }
    }
}

async fn ingest(ctx: &PipelineContext, key: String) {
    match tasks::ingest_object(ctx, IngestParams { key }).await {
        Ok(result) => {
            println!("\n📊 Ingest results for {}:", result.source_key);
            println!("   Processed: {}", result.processed_count);
            println!("   Anomalies: {}", result.anomaly_count);
            println!("   Failed:    {}", result.error_count);
        }
        Err(e) => {
            println!("❌ Ingest failed: {e}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    logging::init_logging();

    let cli = Cli::parse();
    let mut config = Config::load_or_default();
    let ctx = build_context();

    match cli.command {
        Commands::Generate => {
            println!("🔄 Generating synthetic batch...");
            upload_once(&ctx, &config).await;
        }
        Commands::Upload {
            interval_minutes,
            max_uploads,
        } => {
            if let Some(minutes) = interval_minutes {
                config.uploader.interval_minutes = minutes;
            }
            if max_uploads.is_some() {
                config.uploader.max_uploads = max_uploads;
            }

            println!("🔄 Starting continuous uploader (Ctrl+C to stop)...");
            let mut uploader =
                ContinuousUploader::new(ctx.blob.clone(), ctx.errors.clone(), &config);

            let flag = uploader.shutdown_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested, stopping after the current cycle");
                    flag.store(false, Ordering::Relaxed);
                }
            });

            let count = uploader.run().await;
            println!("✅ Uploader stopped after {count} uploads");
        }
        Commands::Ingest { key } => {
            println!("🔄 Ingesting {key}...");
            ingest(&ctx, key).await;
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.api.port);
            server::start_server(Arc::new(ctx), port).await?;
        }
        Commands::Run { no_serve } => {
            println!("🚀 Running full pipeline (generate + ingest + digest)...");

            if let Some(key) = upload_once(&ctx, &config).await {
                ingest(&ctx, key).await;
            }

            let stats = tasks::site_summaries(&ctx.table).await?;
            let notifier = ctx.notifier();
            if notifier.notify_summary(&stats).await.is_some() {
                println!(
                    "📊 Digest sent: {} records, {} anomalies ({:.2}%)",
                    stats.total_records,
                    stats.total_anomalies,
                    stats.anomaly_rate()
                );
            }

            if !no_serve {
                server::start_server(Arc::new(ctx), config.api.port).await?;
            }
        }
    }
    Ok(())
}
