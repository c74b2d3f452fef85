//! Anomaly and digest alerting over a notification transport.
//!
//! Alerting is best-effort: a dispatch failure is logged and reported as
//! `None`, never propagated, so ingestion continues regardless of the
//! transport's health.

use crate::domain::{AnomalyReason, EnergyRecord, SummaryStats};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

pub type NotificationId = String;

/// Fire-and-forget notification transport (SNS-style publish).
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn publish(&self, subject: &str, body: &str) -> Result<NotificationId>;
}

/// A message captured by the in-memory transport.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub message_id: NotificationId,
    pub subject: String,
    pub body: String,
}

/// In-memory transport implementation for development/testing
pub struct InMemoryTransport {
    messages: Arc<Mutex<Vec<PublishedMessage>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationTransport for InMemoryTransport {
    async fn publish(&self, subject: &str, body: &str) -> Result<NotificationId> {
        let message_id = Uuid::new_v4().to_string();
        let mut messages = self.messages.lock().unwrap();
        messages.push(PublishedMessage {
            message_id: message_id.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(message_id)
    }
}

/// Transport whose publishes always fail; used to exercise the
/// best-effort dispatch paths.
pub struct FailingTransport;

#[async_trait]
impl NotificationTransport for FailingTransport {
    async fn publish(&self, _subject: &str, _body: &str) -> Result<NotificationId> {
        Err(PipelineError::Notification("transport unavailable".to_string()))
    }
}

/// Formats and dispatches human-readable alerts for flagged records and
/// periodic digests.
pub struct AnomalyNotifier {
    transport: Arc<dyn NotificationTransport>,
}

impl AnomalyNotifier {
    pub fn new(transport: Arc<dyn NotificationTransport>) -> Self {
        Self { transport }
    }

    /// Human-readable label for a record's anomaly reasons.
    ///
    /// Generation takes precedence when both reasons are present.
    pub fn anomaly_type_label(reasons: &[AnomalyReason]) -> &'static str {
        if reasons.contains(&AnomalyReason::NegativeGeneration) {
            "Negative Energy Generation"
        } else if reasons.contains(&AnomalyReason::NegativeConsumption) {
            "Negative Energy Consumption"
        } else {
            "Unknown"
        }
    }

    /// System health label for an anomaly rate percentage.
    pub fn health_label(anomaly_rate: f64) -> &'static str {
        if anomaly_rate < 1.0 {
            "Excellent"
        } else if anomaly_rate < 5.0 {
            "Attention Needed"
        } else {
            "Critical"
        }
    }

    fn format_anomaly_message(record: &EnergyRecord) -> String {
        let anomaly_type = Self::anomaly_type_label(&record.anomaly_reasons);
        let reasons = if record.anomaly_reasons.is_empty() {
            "Anomaly detected".to_string()
        } else {
            record
                .anomaly_reasons
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "\u{1F6A8} ENERGY ANOMALY ALERT \u{1F6A8}\n\
             \n\
             Site: {site}\n\
             Time: {time}\n\
             Anomaly Type: {anomaly_type}\n\
             \n\
             Energy Data:\n\
             - Generation: {generated} kWh\n\
             - Consumption: {consumed} kWh\n\
             - Net Energy: {net} kWh\n\
             \n\
             Issue Details:\n\
             {reasons}\n\
             \n\
             Recommended Actions:\n\
             - Check site equipment status\n\
             - Verify sensor readings\n\
             - Investigate potential equipment failure\n\
             - Review maintenance logs\n",
            site = record.site_id,
            time = record.timestamp,
            generated = record.energy_generated_kwh,
            consumed = record.energy_consumed_kwh,
            net = record.net_energy_kwh,
        )
    }

    /// Dispatch a real-time alert for a flagged record.
    ///
    /// Returns the transport message id, or `None` when dispatch failed.
    pub async fn notify_anomaly(&self, record: &EnergyRecord) -> Option<NotificationId> {
        let subject = format!("\u{1F6A8} ENERGY ANOMALY DETECTED - {}", record.site_id);
        let message = Self::format_anomaly_message(record);

        match self.transport.publish(&subject, &message).await {
            Ok(message_id) => {
                info!(
                    site_id = %record.site_id,
                    message_id = %message_id,
                    "Anomaly alert sent"
                );
                Some(message_id)
            }
            Err(e) => {
                warn!(site_id = %record.site_id, "Failed to send anomaly alert: {e}");
                None
            }
        }
    }

    /// Dispatch a periodic digest with aggregate anomaly statistics.
    pub async fn notify_summary(&self, stats: &SummaryStats) -> Option<NotificationId> {
        let today = Utc::now().format("%Y-%m-%d");
        let anomaly_rate = stats.anomaly_rate();
        let subject = format!("\u{1F4CA} Daily Energy System Summary - {today}");

        let mut message = format!(
            "DAILY ENERGY SYSTEM SUMMARY\n\
             \n\
             Date: {today}\n\
             \n\
             System Statistics:\n\
             - Total Records Processed: {records}\n\
             - Total Anomalies Detected: {anomalies}\n\
             - Anomaly Rate: {rate:.2}%\n\
             - System Health: {health}\n\
             \n\
             Site Performance:\n",
            records = stats.total_records,
            anomalies = stats.total_anomalies,
            rate = anomaly_rate,
            health = Self::health_label(anomaly_rate),
        );

        for (site_id, site) in &stats.site_summaries {
            message.push_str(&format!(
                "- {site_id}: {records} records, {anomalies} anomalies ({rate:.1}%)\n  \
                 Avg Generation: {gen:.1} kWh | Avg Net Energy: {net:.1} kWh\n",
                records = site.record_count,
                anomalies = site.anomaly_count,
                rate = site.anomaly_rate_percent,
                gen = site.avg_generation_kwh,
                net = site.avg_net_energy_kwh,
            ));
        }

        match self.transport.publish(&subject, &message).await {
            Ok(message_id) => {
                info!(message_id = %message_id, "Daily summary alert sent");
                Some(message_id)
            }
            Err(e) => {
                warn!("Failed to send daily summary: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SiteSummary;
    use rust_decimal::Decimal;

    fn anomalous_record() -> EnergyRecord {
        EnergyRecord {
            site_id: "SITE_001".to_string(),
            timestamp: "2025-06-11T09:00:00Z".to_string(),
            energy_generated_kwh: Decimal::new(-1550, 2),
            energy_consumed_kwh: Decimal::new(4520, 2),
            net_energy_kwh: Decimal::new(-6070, 2),
            anomaly: true,
            anomaly_reasons: vec![AnomalyReason::NegativeGeneration],
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn anomaly_label_prefers_generation() {
        assert_eq!(
            AnomalyNotifier::anomaly_type_label(&[
                AnomalyReason::NegativeGeneration,
                AnomalyReason::NegativeConsumption
            ]),
            "Negative Energy Generation"
        );
        assert_eq!(
            AnomalyNotifier::anomaly_type_label(&[AnomalyReason::NegativeConsumption]),
            "Negative Energy Consumption"
        );
        assert_eq!(AnomalyNotifier::anomaly_type_label(&[]), "Unknown");
    }

    #[test]
    fn health_label_bands() {
        assert_eq!(AnomalyNotifier::health_label(0.5), "Excellent");
        assert_eq!(AnomalyNotifier::health_label(1.0), "Attention Needed");
        assert_eq!(AnomalyNotifier::health_label(3.0), "Attention Needed");
        assert_eq!(AnomalyNotifier::health_label(5.0), "Critical");
        assert_eq!(AnomalyNotifier::health_label(7.0), "Critical");
    }

    #[tokio::test]
    async fn anomaly_alert_contains_record_fields() {
        let transport = Arc::new(InMemoryTransport::new());
        let notifier = AnomalyNotifier::new(transport.clone());

        let id = notifier.notify_anomaly(&anomalous_record()).await;
        assert!(id.is_some());

        let messages = transport.published();
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert!(message.subject.contains("SITE_001"));
        assert!(message.body.contains("2025-06-11T09:00:00Z"));
        assert!(message.body.contains("Negative Energy Generation"));
        assert!(message.body.contains("-15.50 kWh"));
        assert!(message.body.contains("45.20 kWh"));
        assert!(message.body.contains("-60.70 kWh"));
    }

    #[tokio::test]
    async fn dispatch_failure_is_swallowed() {
        let notifier = AnomalyNotifier::new(Arc::new(FailingTransport));
        assert!(notifier.notify_anomaly(&anomalous_record()).await.is_none());
        assert!(notifier.notify_summary(&SummaryStats::default()).await.is_none());
    }

    #[tokio::test]
    async fn summary_includes_sites_and_health() {
        let transport = Arc::new(InMemoryTransport::new());
        let notifier = AnomalyNotifier::new(transport.clone());

        let mut stats = SummaryStats {
            total_records: 100,
            total_anomalies: 3,
            ..SummaryStats::default()
        };
        stats.site_summaries.insert(
            "SITE_001".to_string(),
            SiteSummary {
                record_count: 100,
                anomaly_count: 3,
                avg_generation_kwh: 120.5,
                avg_net_energy_kwh: 30.2,
                anomaly_rate_percent: 3.0,
                ..SiteSummary::default()
            },
        );

        notifier.notify_summary(&stats).await.unwrap();
        let body = &transport.published()[0].body;
        assert!(body.contains("Anomaly Rate: 3.00%"));
        assert!(body.contains("Attention Needed"));
        assert!(body.contains("SITE_001: 100 records, 3 anomalies (3.0%)"));
    }
}
