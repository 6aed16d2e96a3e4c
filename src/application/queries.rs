use std::sync::Arc;

use crate::domain::{Endpoint, EndpointStatus, Sample};
use crate::ports::{PersistenceResult, SampleStore};

/// Read-only view of the sample store used by the HTTP layer
#[derive(Clone)]
pub struct ServerQueries {
    store: Arc<dyn SampleStore>,
}

impl ServerQueries {
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self { store }
    }

    /// All monitored servers, sorted
    pub async fn list_endpoints(&self) -> PersistenceResult<Vec<Endpoint>> {
        self.store.list_endpoints().await
    }

    /// Newest sample of every server that has one
    pub async fn latest_per_endpoint(&self) -> PersistenceResult<Vec<Sample>> {
        self.store.latest_samples_all().await
    }

    pub async fn latest_sample(&self, endpoint: &Endpoint) -> PersistenceResult<Option<Sample>> {
        self.store.latest_sample(endpoint).await
    }

    /// Up to `limit` samples for `endpoint`, newest first
    pub async fn samples(&self, endpoint: &Endpoint, limit: usize) -> PersistenceResult<Vec<Sample>> {
        self.store.samples(endpoint, limit).await
    }

    pub async fn current_status(&self, endpoint: &Endpoint) -> PersistenceResult<Option<EndpointStatus>> {
        self.store.current_status(endpoint).await
    }
}
