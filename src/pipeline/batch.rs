//! Per-record batch processing with partial-failure semantics.

use crate::alerting::AnomalyNotifier;
use crate::domain::{EnergyRecord, RawRecord};
use crate::error_handler::{ErrorHandler, ErrorKind, ErrorSeverity};
use crate::error::Result;
use crate::pipeline::validate::Validator;
use crate::storage::TableStore;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// One record that failed validation or processing. The batch continues past
/// these.
#[derive(Debug, Clone)]
pub struct RecordFailure {
    pub index: usize,
    pub message: String,
}

/// Aggregate result of one batch run.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub success_count: usize,
    pub failure_count: usize,
    pub records: Vec<EnergyRecord>,
    pub failures: Vec<RecordFailure>,
}

impl BatchOutcome {
    pub fn anomaly_count(&self) -> usize {
        self.records.iter().filter(|r| r.anomaly).count()
    }
}

/// Applies the validator to every record of a batch, persists each
/// normalized record, and dispatches anomaly alerts synchronously.
pub struct BatchProcessor {
    validator: Validator,
    table: Arc<dyn TableStore>,
    notifier: Arc<AnomalyNotifier>,
    errors: Arc<ErrorHandler>,
}

impl BatchProcessor {
    pub fn new(
        table: Arc<dyn TableStore>,
        notifier: Arc<AnomalyNotifier>,
        errors: Arc<ErrorHandler>,
    ) -> Self {
        Self {
            validator: Validator::new(),
            table,
            notifier,
            errors,
        }
    }

    /// Process every record of the batch independently.
    ///
    /// Validation failures are recovered locally and counted; the alert for
    /// an anomalous record is dispatched before the next record is touched.
    /// An exhausted-retry storage failure aborts the remaining batch; records
    /// already persisted stay persisted.
    pub async fn process_batch(&self, records: &[RawRecord]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for (index, raw) in records.iter().enumerate() {
            let record = match self.validator.validate_and_normalize(raw) {
                Ok(record) => record,
                Err(e) => {
                    let context = json!({
                        "record_index": index,
                        "site_id": raw.get("site_id").cloned().unwrap_or(json!("unknown")),
                    });
                    self.errors
                        .log_error(
                            &e,
                            ErrorSeverity::Medium,
                            ErrorKind::DataValidation,
                            context,
                            "record_processing",
                        )
                        .await;
                    outcome.failure_count += 1;
                    outcome.failures.push(RecordFailure {
                        index,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            // Persist immediately after normalization, under the STORAGE
            // retry policy. Exhausted retries abort the batch.
            let store_result = {
                let table = self.table.clone();
                let item = record.clone();
                self.errors
                    .retry(
                        move || {
                            let table = table.clone();
                            let item = item.clone();
                            async move { table.put_item(&item).await }
                        },
                        ErrorKind::Storage,
                        json!({"record_index": index, "site_id": record.site_id}),
                        "table_storage",
                    )
                    .await
            };

            if let Err(e) = store_result {
                self.errors
                    .log_error(
                        &e,
                        ErrorSeverity::Critical,
                        ErrorKind::Storage,
                        json!({"record_index": index, "aborted": true}),
                        "batch_processing",
                    )
                    .await;
                warn!("Aborting batch after storage failure at record {index}");
                return Err(e);
            }

            outcome.success_count += 1;

            if record.anomaly {
                // Best-effort, synchronous: dispatch before the next record
                self.notifier.notify_anomaly(&record).await;
            }
            outcome.records.push(record);
        }

        info!(
            successes = outcome.success_count,
            failures = outcome.failure_count,
            anomalies = outcome.anomaly_count(),
            "Batch processed"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::InMemoryTransport;
    use crate::error::PipelineError;
    use crate::error_handler::InMemoryErrorLog;
    use crate::storage::{InMemoryTableStore, QueryOptions};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        table: Arc<InMemoryTableStore>,
        transport: Arc<InMemoryTransport>,
        sink: Arc<InMemoryErrorLog>,
        processor: BatchProcessor,
    }

    fn harness() -> Harness {
        let table = Arc::new(InMemoryTableStore::new());
        let transport = Arc::new(InMemoryTransport::new());
        let sink = Arc::new(InMemoryErrorLog::new());
        let errors = Arc::new(
            ErrorHandler::new(sink.clone(), transport.clone())
                .with_base_delay(Duration::from_millis(1)),
        );
        let notifier = Arc::new(AnomalyNotifier::new(transport.clone()));
        let processor = BatchProcessor::new(table.clone(), notifier, errors);
        Harness {
            table,
            transport,
            sink,
            processor,
        }
    }

    fn raw(site: &str, generated: serde_json::Value, consumed: f64) -> RawRecord {
        json!({
            "site_id": site,
            "timestamp": "2025-06-11T09:00:00Z",
            "energy_generated_kwh": generated,
            "energy_consumed_kwh": consumed,
        })
    }

    #[tokio::test]
    async fn mixed_batch_continues_past_failures() {
        let h = harness();
        let batch = vec![
            raw("SITE_001", json!(120.0), 60.0),
            // missing energy_consumed_kwh
            json!({"site_id": "SITE_002", "timestamp": "2025-06-11T09:00:00Z", "energy_generated_kwh": 10.0}),
            raw("SITE_003", json!(-5.0), 45.2),
            // out of range
            raw("SITE_004", json!(10_001.0), 45.2),
            raw("SITE_005", json!(80.0), 90.0),
        ];

        let outcome = h.processor.process_batch(&batch).await.unwrap();

        assert_eq!(outcome.success_count, 3);
        assert_eq!(outcome.failure_count, 2);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].index, 1);
        assert_eq!(outcome.failures[1].index, 3);
        assert_eq!(outcome.anomaly_count(), 1);

        // exactly one alert, for the anomalous SITE_003 record
        let messages = h.transport.published();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].subject.contains("SITE_003"));

        // both failures logged as DATA_VALIDATION at MEDIUM
        assert_eq!(h.sink.count_by_severity(ErrorSeverity::Medium), 2);
        assert!(h
            .sink
            .records()
            .iter()
            .all(|r| r.error_type == ErrorKind::DataValidation));

        // only the three valid records were persisted
        assert_eq!(h.table.record_count(), 3);
    }

    #[tokio::test]
    async fn failed_record_has_no_side_effects() {
        let h = harness();
        let batch = vec![json!({"timestamp": "2025-06-11T09:00:00Z"})];

        let outcome = h.processor.process_batch(&batch).await.unwrap();

        assert_eq!(outcome.success_count, 0);
        assert_eq!(outcome.failure_count, 1);
        assert_eq!(h.table.record_count(), 0);
        assert!(h.transport.published().is_empty());
    }

    struct UnavailableTableStore;

    #[async_trait]
    impl TableStore for UnavailableTableStore {
        async fn put_item(&self, _record: &EnergyRecord) -> crate::error::Result<()> {
            Err(PipelineError::Storage("table unavailable".to_string()))
        }
        async fn query_site(
            &self,
            _site_id: &str,
            _opts: &QueryOptions,
        ) -> crate::error::Result<Vec<EnergyRecord>> {
            Ok(Vec::new())
        }
        async fn site_ids(&self) -> crate::error::Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn live(&self) -> crate::error::Result<()> {
            Err(PipelineError::Storage("table unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn exhausted_storage_retries_abort_the_batch() {
        let transport = Arc::new(InMemoryTransport::new());
        let sink = Arc::new(InMemoryErrorLog::new());
        let errors = Arc::new(
            ErrorHandler::new(sink.clone(), transport.clone())
                .with_base_delay(Duration::from_millis(1)),
        );
        let notifier = Arc::new(AnomalyNotifier::new(transport.clone()));
        let processor = BatchProcessor::new(Arc::new(UnavailableTableStore), notifier, errors);

        let batch = vec![raw("SITE_001", json!(120.0), 60.0), raw("SITE_002", json!(1.0), 1.0)];
        let err = processor.process_batch(&batch).await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));

        // STORAGE policy: 3 retries -> 3 MEDIUM + 1 HIGH, then the batch-level CRITICAL
        assert_eq!(sink.count_by_severity(ErrorSeverity::Medium), 3);
        assert_eq!(sink.count_by_severity(ErrorSeverity::High), 1);
        assert_eq!(sink.count_by_severity(ErrorSeverity::Critical), 1);
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_the_batch() {
        let table = Arc::new(InMemoryTableStore::new());
        let transport = Arc::new(InMemoryTransport::new());
        let sink = Arc::new(InMemoryErrorLog::new());
        let errors = Arc::new(ErrorHandler::new(sink, transport));
        let notifier = Arc::new(AnomalyNotifier::new(Arc::new(
            crate::alerting::FailingTransport,
        )));
        let processor = BatchProcessor::new(table.clone(), notifier, errors);

        let batch = vec![raw("SITE_001", json!(-5.0), 45.2)];
        let outcome = processor.process_batch(&batch).await.unwrap();

        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.anomaly_count(), 1);
        assert_eq!(table.record_count(), 1);
    }
}
