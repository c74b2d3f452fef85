use crate::domain::EnergyRecord;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Options for querying records of one site.
///
/// Date bounds are `YYYY-MM-DD` strings compared lexicographically against
/// the record timestamps (the end bound is extended to the end of its day),
/// matching the keyed table store's sort-key semantics.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub anomalies_only: bool,
    pub limit: Option<usize>,
    pub newest_first: bool,
}

impl QueryOptions {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            newest_first: true,
            ..Self::default()
        }
    }

    pub fn anomalies(limit: usize) -> Self {
        Self {
            anomalies_only: true,
            limit: Some(limit),
            newest_first: true,
            ..Self::default()
        }
    }
}

/// Blob store holding uploaded telemetry batches as JSON arrays.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    /// Liveness probe used by the health endpoint.
    async fn live(&self) -> Result<()>;
}

/// Keyed table store for normalized records.
///
/// Partition key is `site_id`, sort key is `timestamp`; `put_item` overwrites
/// an existing record with the same key pair.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn put_item(&self, record: &EnergyRecord) -> Result<()>;
    async fn query_site(&self, site_id: &str, opts: &QueryOptions) -> Result<Vec<EnergyRecord>>;
    async fn site_ids(&self) -> Result<Vec<String>>;
    /// Liveness probe used by the health endpoint.
    async fn live(&self) -> Result<()>;
}

/// In-memory blob store implementation for development/testing
pub struct InMemoryBlobStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.lock().unwrap();
        objects.keys().cloned().collect()
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        debug!("Stored object {} ({} bytes)", key, bytes.len());
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(key.to_string()))
    }

    async fn live(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory table store implementation for development/testing
pub struct InMemoryTableStore {
    // site_id -> (timestamp -> record); the BTreeMap keeps sort-key order
    sites: Arc<Mutex<HashMap<String, BTreeMap<String, EnergyRecord>>>>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self {
            sites: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn record_count(&self) -> usize {
        let sites = self.sites.lock().unwrap();
        sites.values().map(|s| s.len()).sum()
    }
}

impl Default for InMemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

fn within_bounds(timestamp: &str, opts: &QueryOptions) -> bool {
    if let Some(start) = &opts.start_date {
        if timestamp < start.as_str() {
            return false;
        }
    }
    if let Some(end) = &opts.end_date {
        let end_of_day = format!("{end}T23:59:59Z");
        if timestamp > end_of_day.as_str() {
            return false;
        }
    }
    true
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn put_item(&self, record: &EnergyRecord) -> Result<()> {
        let mut sites = self.sites.lock().unwrap();
        sites
            .entry(record.site_id.clone())
            .or_default()
            .insert(record.timestamp.clone(), record.clone());
        debug!("Stored record: {} at {}", record.site_id, record.timestamp);
        Ok(())
    }

    async fn query_site(&self, site_id: &str, opts: &QueryOptions) -> Result<Vec<EnergyRecord>> {
        let sites = self.sites.lock().unwrap();
        let Some(records) = sites.get(site_id) else {
            return Ok(Vec::new());
        };

        let filtered = records
            .values()
            .filter(|r| within_bounds(&r.timestamp, opts))
            .filter(|r| !opts.anomalies_only || r.anomaly);

        let mut selected: Vec<EnergyRecord> = if opts.newest_first {
            filtered.rev().cloned().collect()
        } else {
            filtered.cloned().collect()
        };

        if let Some(limit) = opts.limit {
            selected.truncate(limit);
        }
        Ok(selected)
    }

    async fn site_ids(&self) -> Result<Vec<String>> {
        let sites = self.sites.lock().unwrap();
        let mut ids: Vec<String> = sites.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn live(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AnomalyReason;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn record(site: &str, timestamp: &str, anomaly: bool) -> EnergyRecord {
        EnergyRecord {
            site_id: site.to_string(),
            timestamp: timestamp.to_string(),
            energy_generated_kwh: Decimal::new(10000, 2),
            energy_consumed_kwh: Decimal::new(5000, 2),
            net_energy_kwh: Decimal::new(5000, 2),
            anomaly,
            anomaly_reasons: if anomaly {
                vec![AnomalyReason::NegativeGeneration]
            } else {
                Vec::new()
            },
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn query_returns_newest_first_with_limit() {
        let store = InMemoryTableStore::new();
        for day in 1..=5 {
            let ts = format!("2025-06-0{day}T12:00:00Z");
            store.put_item(&record("SITE_001", &ts, false)).await.unwrap();
        }

        let latest = store
            .query_site("SITE_001", &QueryOptions::latest(3))
            .await
            .unwrap();
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].timestamp, "2025-06-05T12:00:00Z");
        assert_eq!(latest[2].timestamp, "2025-06-03T12:00:00Z");
    }

    #[tokio::test]
    async fn query_filters_anomalies_and_date_range() {
        let store = InMemoryTableStore::new();
        store
            .put_item(&record("SITE_001", "2025-06-01T08:00:00Z", true))
            .await
            .unwrap();
        store
            .put_item(&record("SITE_001", "2025-06-02T08:00:00Z", false))
            .await
            .unwrap();
        store
            .put_item(&record("SITE_001", "2025-06-03T08:00:00Z", true))
            .await
            .unwrap();

        let anomalies = store
            .query_site("SITE_001", &QueryOptions::anomalies(50))
            .await
            .unwrap();
        assert_eq!(anomalies.len(), 2);
        assert!(anomalies.iter().all(|r| r.anomaly));

        let ranged = store
            .query_site(
                "SITE_001",
                &QueryOptions {
                    start_date: Some("2025-06-02".to_string()),
                    end_date: Some("2025-06-02".to_string()),
                    ..QueryOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].timestamp, "2025-06-02T08:00:00Z");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let store = InMemoryBlobStore::new();
        let err = store.get("energy_data/missing.json").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn put_item_overwrites_same_key_pair() {
        let store = InMemoryTableStore::new();
        let r = record("SITE_002", "2025-06-01T08:00:00Z", false);
        store.put_item(&r).await.unwrap();
        store.put_item(&r).await.unwrap();
        assert_eq!(store.record_count(), 1);
    }
}
