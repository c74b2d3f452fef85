//! Domain data shapes shared across pipeline stages and the query API.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw telemetry record as uploaded to the blob store.
///
/// Untrusted input: fields may be missing, non-numeric or out of range.
/// The validator is the only component that looks inside one of these.
pub type RawRecord = serde_json::Value;

/// Reason a record was flagged as anomalous.
///
/// The vocabulary is closed and the order within `anomaly_reasons` is fixed:
/// generation is checked before consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyReason {
    NegativeGeneration,
    NegativeConsumption,
}

impl AnomalyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyReason::NegativeGeneration => "negative_generation",
            AnomalyReason::NegativeConsumption => "negative_consumption",
        }
    }
}

/// Validated, normalized energy record as persisted to the table store.
///
/// Invariants:
/// - `site_id` is non-empty; `timestamp` is copied verbatim from the input.
/// - energy values are 2-dp decimals inside [-1000, 10000] kWh.
/// - `net_energy_kwh == energy_generated_kwh - energy_consumed_kwh`.
/// - `anomaly == !anomaly_reasons.is_empty()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyRecord {
    pub site_id: String,
    pub timestamp: String,
    pub energy_generated_kwh: Decimal,
    pub energy_consumed_kwh: Decimal,
    pub net_energy_kwh: Decimal,
    pub anomaly: bool,
    pub anomaly_reasons: Vec<AnomalyReason>,
    pub processed_at: DateTime<Utc>,
}

/// Per-site aggregate statistics for summaries and digest alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteSummary {
    pub record_count: usize,
    pub anomaly_count: usize,
    pub avg_generation_kwh: f64,
    pub avg_consumption_kwh: f64,
    pub avg_net_energy_kwh: f64,
    pub total_generation_kwh: f64,
    pub total_consumption_kwh: f64,
    pub anomaly_rate_percent: f64,
}

/// Cross-site aggregate fed to the summary digest alert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_records: usize,
    pub total_anomalies: usize,
    pub site_summaries: BTreeMap<String, SiteSummary>,
}

impl SummaryStats {
    /// Anomaly rate as a percentage; 0 when no records were processed.
    pub fn anomaly_rate(&self) -> f64 {
        if self.total_records > 0 {
            self.total_anomalies as f64 / self.total_records as f64 * 100.0
        } else {
            0.0
        }
    }
}
