//! Synthetic telemetry generation for development and load testing.
//!
//! Records follow a plausible daily shape: generation tracks daylight with a
//! peak near noon, consumption is higher during active hours. A small share
//! of records gets a negative value injected so the anomaly path downstream
//! stays exercised.

use crate::domain::RawRecord;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Timelike, Utc};
use rand::Rng;
use serde_json::json;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Generate one raw record for `site_id` stamped at `at`.
pub fn generate_record(site_id: &str, at: DateTime<Utc>, anomaly_rate: f64) -> RawRecord {
    let mut rng = rand::thread_rng();
    let hour = at.hour();

    let mut generation = if (6..=18).contains(&hour) {
        let base: f64 = rng.gen_range(80.0..200.0);
        // peak around noon, tapering toward dawn and dusk
        let time_factor = 1.0 + 0.5 * (12.0 - hour as f64).abs() / 6.0;
        base / time_factor
    } else {
        rng.gen_range(5.0..20.0)
    };

    let mut consumption = if (6..=22).contains(&hour) {
        rng.gen_range(60.0..140.0)
    } else {
        rng.gen_range(30.0..70.0)
    };

    generation *= rng.gen_range(0.8..1.2);
    consumption *= rng.gen_range(0.9..1.1);

    if rng.gen::<f64>() < anomaly_rate {
        if rng.gen::<f64>() < 0.5 {
            generation = -rng.gen_range(1.0..10.0);
        } else {
            consumption = -rng.gen_range(1.0..10.0);
        }
    }

    json!({
        "site_id": site_id,
        "timestamp": at.to_rfc3339_opts(SecondsFormat::Secs, true),
        "energy_generated_kwh": round2(generation),
        "energy_consumed_kwh": round2(consumption),
    })
}

/// Generate a batch for all sites, spreading 3-5 records per site across
/// the upload interval starting at `batch_time`.
pub fn generate_batch(
    sites: &[String],
    batch_time: DateTime<Utc>,
    interval_seconds: i64,
    anomaly_rate: f64,
) -> Vec<RawRecord> {
    let mut rng = rand::thread_rng();
    let mut records = Vec::new();

    for site_id in sites {
        let per_site = rng.gen_range(3..=5usize);
        // distinct per-site offsets keep the (site_id, timestamp) key pairs unique
        let span = (interval_seconds.max(1) as usize).max(per_site);
        let offsets = rand::seq::index::sample(&mut rng, span, per_site);
        for offset in offsets.iter() {
            let record_time = batch_time + ChronoDuration::seconds(offset as i64);
            records.push(generate_record(site_id, record_time, anomaly_rate));
        }
    }

    records
}
