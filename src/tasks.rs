//! Pipeline task entry points shared by the CLI and the admin HTTP surface.

use crate::alerting::{AnomalyNotifier, NotificationTransport};
use crate::domain::{RawRecord, SiteSummary, SummaryStats};
use crate::error_handler::{ErrorHandler, ErrorKind, ErrorSeverity};
use crate::error::Result;
use crate::pipeline::batch::BatchProcessor;
use crate::storage::{BlobStore, QueryOptions, TableStore};
use chrono::Utc;
use metrics::{counter, histogram};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Collaborators wired once at startup and shared across tasks and the
/// query API.
#[derive(Clone)]
pub struct PipelineContext {
    pub blob: Arc<dyn BlobStore>,
    pub table: Arc<dyn TableStore>,
    pub transport: Arc<dyn NotificationTransport>,
    pub errors: Arc<ErrorHandler>,
}

impl PipelineContext {
    pub fn notifier(&self) -> Arc<AnomalyNotifier> {
        Arc::new(AnomalyNotifier::new(self.transport.clone()))
    }

    pub fn processor(&self) -> BatchProcessor {
        BatchProcessor::new(self.table.clone(), self.notifier(), self.errors.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestParams {
    /// Blob-store key of a JSON array of raw records.
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct IngestResult {
    pub source_key: String,
    pub processed_count: usize,
    pub anomaly_count: usize,
    pub error_count: usize,
}

/// Ingest one uploaded batch: fetch, parse, validate/normalize, persist,
/// alert. Always finishes with either a structured result or an error that
/// has already been logged at CRITICAL with a best-effort diagnostic alert.
pub async fn ingest_object(ctx: &PipelineContext, params: IngestParams) -> Result<IngestResult> {
    match run_ingest(ctx, &params.key).await {
        Ok(result) => {
            info!(
                key = %result.source_key,
                processed = result.processed_count,
                anomalies = result.anomaly_count,
                errors = result.error_count,
                "Ingest completed"
            );
            Ok(result)
        }
        Err(e) => {
            ctx.errors
                .log_error(
                    &e,
                    ErrorSeverity::Critical,
                    ErrorKind::Processing,
                    json!({"key": params.key}),
                    "ingest",
                )
                .await;
            send_system_error_alert(ctx, &params.key, &e.to_string()).await;
            error!(key = %params.key, "Ingest failed: {e}");
            Err(e)
        }
    }
}

async fn run_ingest(ctx: &PipelineContext, key: &str) -> Result<IngestResult> {
    let started = std::time::Instant::now();
    info!(key, "Processing uploaded batch");

    // Download under the retry policy for managed-service calls
    let bytes = {
        let blob = ctx.blob.clone();
        let download_key = key.to_string();
        ctx.errors
            .retry(
                move || {
                    let blob = blob.clone();
                    let key = download_key.clone();
                    async move { blob.get(&key).await }
                },
                ErrorKind::AwsService,
                json!({"key": key}),
                "blob_download",
            )
            .await?
    };

    let records: Vec<RawRecord> = match serde_json::from_slice(&bytes) {
        Ok(records) => records,
        Err(e) => {
            let err = crate::error::PipelineError::Json(e);
            ctx.errors
                .log_error(
                    &err,
                    ErrorSeverity::High,
                    ErrorKind::DataValidation,
                    json!({"key": key, "file_size": bytes.len()}),
                    "json_parsing",
                )
                .await;
            return Err(err);
        }
    };
    info!(key, count = records.len(), "Parsed batch");

    let outcome = ctx.processor().process_batch(&records).await?;

    counter!("energy_records_processed_total").increment(outcome.success_count as u64);
    counter!("energy_records_failed_total").increment(outcome.failure_count as u64);
    counter!("energy_anomalies_total").increment(outcome.anomaly_count() as u64);
    histogram!("energy_ingest_duration_seconds").record(started.elapsed().as_secs_f64());

    Ok(IngestResult {
        source_key: key.to_string(),
        processed_count: outcome.success_count,
        anomaly_count: outcome.anomaly_count(),
        error_count: outcome.failure_count,
    })
}

async fn send_system_error_alert(ctx: &PipelineContext, key: &str, detail: &str) {
    let body = format!(
        "SYSTEM ERROR ALERT\n\
         \n\
         Error processing file: {key}\n\
         Error: {detail}\n\
         Time: {}\n\
         \n\
         Please check the error log stream for details.\n",
        Utc::now().to_rfc3339()
    );
    // Best-effort only; a dead transport must not mask the original failure
    let _ = ctx.transport.publish("Energy System Error", &body).await;
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Aggregate recent records (up to 100 per site) into per-site and overall
/// statistics for the summary endpoint and the daily digest.
pub async fn site_summaries(table: &Arc<dyn TableStore>) -> Result<SummaryStats> {
    let mut stats = SummaryStats::default();

    for site_id in table.site_ids().await? {
        let records = table
            .query_site(&site_id, &QueryOptions::latest(100))
            .await?;
        if records.is_empty() {
            continue;
        }

        let count = records.len();
        let total_generated: f64 = records
            .iter()
            .map(|r| r.energy_generated_kwh.to_f64().unwrap_or(0.0))
            .sum();
        let total_consumed: f64 = records
            .iter()
            .map(|r| r.energy_consumed_kwh.to_f64().unwrap_or(0.0))
            .sum();
        let total_net: f64 = records
            .iter()
            .map(|r| r.net_energy_kwh.to_f64().unwrap_or(0.0))
            .sum();
        let anomaly_count = records.iter().filter(|r| r.anomaly).count();

        stats.total_records += count;
        stats.total_anomalies += anomaly_count;
        stats.site_summaries.insert(
            site_id,
            SiteSummary {
                record_count: count,
                anomaly_count,
                avg_generation_kwh: round2(total_generated / count as f64),
                avg_consumption_kwh: round2(total_consumed / count as f64),
                avg_net_energy_kwh: round2(total_net / count as f64),
                total_generation_kwh: round2(total_generated),
                total_consumption_kwh: round2(total_consumed),
                anomaly_rate_percent: round2(anomaly_count as f64 / count as f64 * 100.0),
            },
        );
    }

    Ok(stats)
}
