use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::domain::{Endpoint, EndpointStatus, RetentionPolicy, Sample};
use crate::ports::{PersistenceResult, SampleStore};

/// Samples and snapshot of one endpoint, oldest sample first
#[derive(Debug, Default)]
struct Series {
    samples: VecDeque<Sample>,
    status: Option<EndpointStatus>,
}

impl Series {
    fn insert(&mut self, sample: Sample) {
        // Equal timestamps keep insertion order.
        let idx = self
            .samples
            .partition_point(|s| s.observed_at <= sample.observed_at);
        self.samples.insert(idx, sample);
    }

    fn evict(&mut self, retention: &RetentionPolicy) -> usize {
        let n = retention.evictions_for(self.samples.len());
        self.samples.drain(..n);
        n
    }
}

/// In-memory sample store.
///
/// The outer map lock is only held to find or create a series; each series
/// has its own mutex so different endpoints are written in parallel.
pub struct MemoryStore {
    series: RwLock<BTreeMap<Endpoint, Arc<Mutex<Series>>>>,
    retention: RetentionPolicy,
}

impl MemoryStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            series: RwLock::new(BTreeMap::new()),
            retention,
        }
    }

    #[cfg(test)]
    pub fn with_default_retention() -> Self {
        Self::new(RetentionPolicy::default())
    }

    async fn series(&self, endpoint: &Endpoint) -> Option<Arc<Mutex<Series>>> {
        self.series.read().await.get(endpoint).cloned()
    }

    async fn series_or_insert(&self, endpoint: &Endpoint) -> Arc<Mutex<Series>> {
        if let Some(series) = self.series(endpoint).await {
            return series;
        }

        let mut map = self.series.write().await;
        map.entry(endpoint.clone()).or_default().clone()
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn upsert_endpoint(&self, endpoint: &Endpoint) -> PersistenceResult<()> {
        self.series_or_insert(endpoint).await;
        Ok(())
    }

    async fn append_sample(&self, sample: &Sample, logo: Option<&str>) -> PersistenceResult<()> {
        let series = self.series_or_insert(&sample.endpoint).await;
        let mut series = series.lock().await;

        series.insert(sample.clone());
        series.status = Some(EndpointStatus::from_sample(sample, logo.map(str::to_owned)));

        let evicted = series.evict(&self.retention);
        if evicted > 0 {
            debug!(endpoint = %sample.endpoint, evicted, "evicted oldest samples");
        }

        Ok(())
    }

    async fn evict_if_over_capacity(&self, endpoint: &Endpoint) -> PersistenceResult<usize> {
        match self.series(endpoint).await {
            Some(series) => Ok(series.lock().await.evict(&self.retention)),
            None => Ok(0),
        }
    }

    async fn list_endpoints(&self) -> PersistenceResult<Vec<Endpoint>> {
        Ok(self.series.read().await.keys().cloned().collect())
    }

    async fn latest_sample(&self, endpoint: &Endpoint) -> PersistenceResult<Option<Sample>> {
        match self.series(endpoint).await {
            Some(series) => Ok(series.lock().await.samples.back().cloned()),
            None => Ok(None),
        }
    }

    async fn latest_samples_all(&self) -> PersistenceResult<Vec<Sample>> {
        let all: Vec<_> = self.series.read().await.values().cloned().collect();

        let mut latest = Vec::with_capacity(all.len());
        for series in all {
            if let Some(sample) = series.lock().await.samples.back() {
                latest.push(sample.clone());
            }
        }

        Ok(latest)
    }

    async fn samples(&self, endpoint: &Endpoint, limit: usize) -> PersistenceResult<Vec<Sample>> {
        match self.series(endpoint).await {
            Some(series) => Ok(series
                .lock()
                .await
                .samples
                .iter()
                .rev()
                .take(limit)
                .cloned()
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn current_status(&self, endpoint: &Endpoint) -> PersistenceResult<Option<EndpointStatus>> {
        match self.series(endpoint).await {
            Some(series) => Ok(series.lock().await.status.clone()),
            None => Ok(None),
        }
    }

    async fn sample_count(&self, endpoint: &Endpoint) -> PersistenceResult<usize> {
        match self.series(endpoint).await {
            Some(series) => Ok(series.lock().await.samples.len()),
            None => Ok(0),
        }
    }
}
