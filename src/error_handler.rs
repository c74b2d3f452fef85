//! Structured error records, severity counters and the bounded
//! exponential-backoff retry wrapper shared by the pipeline stages.

use crate::alerting::NotificationTransport;
use crate::constants;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    DataValidation,
    AwsService,
    Network,
    Processing,
    Authentication,
    Storage,
    Api,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DataValidation => "DATA_VALIDATION",
            ErrorKind::AwsService => "AWS_SERVICE",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Processing => "PROCESSING",
            ErrorKind::Authentication => "AUTHENTICATION",
            ErrorKind::Storage => "STORAGE",
            ErrorKind::Api => "API",
        }
    }

    /// Per-kind retry policy; kinds without transient-failure semantics get
    /// a single attempt.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            ErrorKind::Network => RetryPolicy::new(3, 2.0),
            ErrorKind::AwsService => RetryPolicy::new(5, 1.5),
            ErrorKind::Storage => RetryPolicy::new(3, 2.0),
            ErrorKind::Api => RetryPolicy::new(2, 1.0),
            _ => RetryPolicy::new(1, 1.0),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: f64) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }
}

/// One diagnostic record appended to the error log sink. Created once per
/// failure, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub severity: ErrorSeverity,
    pub error_type: ErrorKind,
    pub component: String,
    pub error_message: String,
    pub error_class: String,
    pub context: serde_json::Value,
}

/// Structured log sink for error records (CloudWatch-style append).
#[async_trait]
pub trait ErrorLogSink: Send + Sync {
    async fn append(&self, stream_id: &str, record: &ErrorRecord) -> Result<()>;
}

/// In-memory sink implementation for development/testing
pub struct InMemoryErrorLog {
    records: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl InMemoryErrorLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn count_by_severity(&self, severity: ErrorSeverity) -> usize {
        let records = self.records.lock().unwrap();
        records.iter().filter(|r| r.severity == severity).count()
    }
}

impl Default for InMemoryErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ErrorLogSink for InMemoryErrorLog {
    async fn append(&self, _stream_id: &str, record: &ErrorRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        Ok(())
    }
}

/// Central error handler: logs structured records, keeps per-severity
/// counters for the handler's lifetime, alerts on HIGH/CRITICAL, and wraps
/// fallible operations in the per-kind retry policy.
pub struct ErrorHandler {
    sink: Arc<dyn ErrorLogSink>,
    alerts: Arc<dyn NotificationTransport>,
    stream_id: String,
    counts: Mutex<BTreeMap<ErrorSeverity, u64>>,
    /// One backoff "time unit"; tests shrink this to keep wall time down.
    base_delay: Duration,
}

impl ErrorHandler {
    pub fn new(sink: Arc<dyn ErrorLogSink>, alerts: Arc<dyn NotificationTransport>) -> Self {
        Self {
            sink,
            alerts,
            stream_id: constants::ERROR_STREAM.to_string(),
            counts: Mutex::new(BTreeMap::new()),
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Severity counters accumulated over this handler's lifetime.
    pub fn error_counts(&self) -> BTreeMap<ErrorSeverity, u64> {
        self.counts.lock().unwrap().clone()
    }

    /// Log one failure with full context. HIGH and CRITICAL records also
    /// trigger a best-effort alert whose own failure is swallowed.
    pub async fn log_error(
        &self,
        err: &PipelineError,
        severity: ErrorSeverity,
        kind: ErrorKind,
        context: serde_json::Value,
        component: &str,
    ) -> ErrorRecord {
        let record = ErrorRecord {
            timestamp: Utc::now(),
            severity,
            error_type: kind,
            component: component.to_string(),
            error_message: err.to_string(),
            error_class: err.class_name().to_string(),
            context,
        };

        if let Err(sink_err) = self.sink.append(&self.stream_id, &record).await {
            warn!("Failed to append error record to log sink: {sink_err}");
        }

        {
            let mut counts = self.counts.lock().unwrap();
            *counts.entry(severity).or_insert(0) += 1;
        }

        error!(component, %severity, %kind, "{severity} ERROR in {component}: {err}");

        if severity >= ErrorSeverity::High {
            self.send_error_alert(&record).await;
        }

        record
    }

    async fn send_error_alert(&self, record: &ErrorRecord) {
        let subject = format!("{} ERROR - Energy Pipeline", record.severity);
        let body = format!(
            "HIGH SEVERITY ERROR DETECTED\n\
             \n\
             Component: {component}\n\
             Severity: {severity}\n\
             Time: {timestamp}\n\
             \n\
             Error: {message}\n\
             \n\
             Context: {context}\n\
             \n\
             Action Required:\n\
             - Check component status immediately\n\
             - Review the error log stream\n\
             - Verify upstream service health\n",
            component = record.component,
            severity = record.severity,
            timestamp = record.timestamp.to_rfc3339(),
            message = record.error_message,
            context = record.context,
        );

        if let Err(e) = self.alerts.publish(&subject, &body).await {
            warn!("Failed to send error alert: {e}");
        }
    }

    /// Run `operation` under the retry policy for `kind`.
    ///
    /// Each non-final failure is logged at MEDIUM and followed by a delay of
    /// `backoff^attempt` time units (attempt 0-indexed). The final failure is
    /// logged at HIGH and propagated. A success after retries is surfaced
    /// only as an info event with the attempt count.
    pub async fn retry<T, F, Fut>(
        &self,
        mut operation: F,
        kind: ErrorKind,
        context: serde_json::Value,
        component: &str,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = kind.retry_policy();
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(component, "Operation succeeded on attempt {}", attempt + 1);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt == policy.max_retries {
                        let ctx = with_entries(
                            &context,
                            &[
                                ("attempts", serde_json::json!(attempt + 1)),
                                ("max_retries", serde_json::json!(policy.max_retries)),
                            ],
                        );
                        self.log_error(&e, ErrorSeverity::High, kind, ctx, component)
                            .await;
                        return Err(e);
                    }

                    let wait = self.base_delay.mul_f64(policy.backoff.powi(attempt as i32));
                    warn!(
                        component,
                        "Attempt {} failed, retrying in {:.1?}: {e}",
                        attempt + 1,
                        wait
                    );
                    let ctx =
                        with_entries(&context, &[("attempt", serde_json::json!(attempt + 1))]);
                    self.log_error(&e, ErrorSeverity::Medium, kind, ctx, component)
                        .await;

                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn with_entries(context: &serde_json::Value, entries: &[(&str, serde_json::Value)]) -> serde_json::Value {
    let mut ctx = context.clone();
    if let Some(map) = ctx.as_object_mut() {
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::InMemoryTransport;
    use serde_json::json;
    use tokio::time::Instant;

    fn handler_with(
        sink: Arc<InMemoryErrorLog>,
        transport: Arc<InMemoryTransport>,
    ) -> ErrorHandler {
        ErrorHandler::new(sink, transport)
    }

    fn flaky_operation(
        failures_before_success: u32,
    ) -> (
        Arc<Mutex<u32>>,
        impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<&'static str>> + Send>>,
    ) {
        let attempts = Arc::new(Mutex::new(0u32));
        let counter = attempts.clone();
        let op = move || {
            let counter = counter.clone();
            Box::pin(async move {
                let mut n = counter.lock().unwrap();
                *n += 1;
                if *n <= failures_before_success {
                    Err(PipelineError::Storage("simulated outage".to_string()))
                } else {
                    Ok("stored")
                }
            }) as std::pin::Pin<Box<dyn Future<Output = Result<&'static str>> + Send>>
        };
        (attempts, op)
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_transient_failures() {
        let sink = Arc::new(InMemoryErrorLog::new());
        let transport = Arc::new(InMemoryTransport::new());
        let handler = handler_with(sink.clone(), transport.clone());

        let (attempts, op) = flaky_operation(2);
        let started = Instant::now();
        let result = handler
            .retry(op, ErrorKind::Network, json!({"test": "retry"}), "test_retry")
            .await
            .unwrap();

        assert_eq!(result, "stored");
        assert_eq!(*attempts.lock().unwrap(), 3);
        // backoff 2.0: one unit after attempt 0, two units after attempt 1
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(sink.count_by_severity(ErrorSeverity::Medium), 2);
        assert_eq!(sink.count_by_severity(ErrorSeverity::High), 0);
        // MEDIUM failures never alert
        assert!(transport.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_log_high_and_propagate() {
        let sink = Arc::new(InMemoryErrorLog::new());
        let transport = Arc::new(InMemoryTransport::new());
        let handler = handler_with(sink.clone(), transport.clone());

        let (attempts, op) = flaky_operation(u32::MAX);
        let err = handler
            .retry(op, ErrorKind::Api, json!({}), "test_retry")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Storage(_)));
        // max_retries=2 for API: 3 attempts total
        assert_eq!(*attempts.lock().unwrap(), 3);
        assert_eq!(sink.count_by_severity(ErrorSeverity::Medium), 2);
        assert_eq!(sink.count_by_severity(ErrorSeverity::High), 1);
        // the HIGH record carries the attempt bookkeeping
        let high = sink
            .records()
            .into_iter()
            .find(|r| r.severity == ErrorSeverity::High)
            .unwrap();
        assert_eq!(high.context["attempts"], json!(3));
        // HIGH severity triggered a best-effort alert
        assert_eq!(transport.published().len(), 1);
    }

    #[test]
    fn unlisted_kind_gets_single_retry_policy() {
        let policy = ErrorKind::Processing.retry_policy();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.backoff, 1.0);
    }

    #[tokio::test]
    async fn severity_counters_accumulate() {
        let sink = Arc::new(InMemoryErrorLog::new());
        let transport = Arc::new(InMemoryTransport::new());
        let handler = handler_with(sink, transport);

        let err = PipelineError::MissingField("site_id".to_string());
        handler
            .log_error(
                &err,
                ErrorSeverity::Medium,
                ErrorKind::DataValidation,
                json!({}),
                "test",
            )
            .await;
        handler
            .log_error(
                &err,
                ErrorSeverity::Medium,
                ErrorKind::DataValidation,
                json!({}),
                "test",
            )
            .await;

        let counts = handler.error_counts();
        assert_eq!(counts.get(&ErrorSeverity::Medium), Some(&2));
        assert_eq!(counts.get(&ErrorSeverity::High), None);
    }

    #[test]
    fn taxonomy_serializes_to_wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::AwsService).unwrap(),
            "\"AWS_SERVICE\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorSeverity::Critical).unwrap(),
            "\"CRITICAL\""
        );
    }
}
