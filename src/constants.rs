/// Key prefix for uploaded telemetry batches in the blob store.
pub const BATCH_KEY_PREFIX: &str = "energy_data";

/// Minimum accepted value for either energy field, in kWh.
pub const ENERGY_MIN_KWH: f64 = -1000.0;

/// Maximum accepted value for either energy field, in kWh.
pub const ENERGY_MAX_KWH: f64 = 10_000.0;

/// Required fields of a raw telemetry record, in validation order.
pub const REQUIRED_FIELDS: [&str; 4] = [
    "site_id",
    "timestamp",
    "energy_generated_kwh",
    "energy_consumed_kwh",
];

/// Default stream id for structured error records.
pub const ERROR_STREAM: &str = "energy-pipeline-errors";

/// Default sites used by the synthetic generator.
pub fn default_sites() -> Vec<String> {
    (1..=5).map(|i| format!("SITE_{i:03}")).collect()
}
