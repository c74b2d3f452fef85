//! Record validation and normalization.
//!
//! The validator is the single implementation of the checks that guard the
//! ingestion path: required fields, numeric parsing, range limits, net-energy
//! derivation and anomaly classification. Range validation and anomaly
//! detection are independent checks over the same fields: a mildly negative
//! value inside [-1000, 0) is accepted but flagged, while values outside
//! [-1000, 10000] are rejected outright.

use crate::constants::{ENERGY_MAX_KWH, ENERGY_MIN_KWH, REQUIRED_FIELDS};
use crate::domain::{AnomalyReason, EnergyRecord, RawRecord};
use crate::error::{PipelineError, Result};
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Validates raw telemetry records and produces normalized [`EnergyRecord`]s.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    range_check: bool,
}

impl Validator {
    /// Validator with range checking enabled (the ingestion default).
    pub fn new() -> Self {
        Self { range_check: true }
    }

    /// Validator that accepts any finite value; anomaly classification still
    /// applies.
    pub fn permissive() -> Self {
        Self { range_check: false }
    }

    /// Validate one raw record and normalize it, or fail with the first
    /// problem found. Performs no I/O.
    pub fn validate_and_normalize(&self, raw: &RawRecord) -> Result<EnergyRecord> {
        // Fail fast on the first missing field, in declaration order
        for field in REQUIRED_FIELDS {
            if raw.get(field).is_none() {
                return Err(PipelineError::MissingField(field.to_string()));
            }
        }

        let site_id = string_field(raw, "site_id")?;
        if site_id.is_empty() {
            return Err(PipelineError::InvalidField {
                field: "site_id".to_string(),
                value: "<empty>".to_string(),
            });
        }
        let timestamp = string_field(raw, "timestamp")?;

        let generated = numeric_field(raw, "energy_generated_kwh")?;
        let consumed = numeric_field(raw, "energy_consumed_kwh")?;

        if self.range_check {
            check_range("energy_generated_kwh", generated)?;
            check_range("energy_consumed_kwh", consumed)?;
        }

        let net = generated - consumed;

        // Classification order is fixed: generation first, then consumption
        let mut anomaly_reasons = Vec::new();
        if generated < 0.0 {
            anomaly_reasons.push(AnomalyReason::NegativeGeneration);
        }
        if consumed < 0.0 {
            anomaly_reasons.push(AnomalyReason::NegativeConsumption);
        }

        Ok(EnergyRecord {
            site_id,
            timestamp,
            energy_generated_kwh: to_fixed(generated),
            energy_consumed_kwh: to_fixed(consumed),
            net_energy_kwh: to_fixed(net),
            anomaly: !anomaly_reasons.is_empty(),
            anomaly_reasons,
            processed_at: Utc::now(),
        })
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

fn string_field(raw: &RawRecord, field: &str) -> Result<String> {
    match raw.get(field).and_then(|v| v.as_str()) {
        Some(s) => Ok(s.to_string()),
        None => Err(PipelineError::InvalidField {
            field: field.to_string(),
            value: raw.get(field).map(|v| v.to_string()).unwrap_or_default(),
        }),
    }
}

/// Parse a numeric-like field: a JSON number, or a string holding one.
fn numeric_field(raw: &RawRecord, field: &str) -> Result<f64> {
    let value = raw.get(field).cloned().unwrap_or_default();
    let parsed = match &value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(PipelineError::InvalidField {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

fn check_range(field: &str, value: f64) -> Result<()> {
    if !(ENERGY_MIN_KWH..=ENERGY_MAX_KWH).contains(&value) {
        return Err(PipelineError::OutOfRange {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}

/// Fixed-precision conversion: 2 decimal places, free of binary float
/// artifacts.
fn to_fixed(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(2)
}
