use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Endpoint, EndpointStatus, Sample};

/// Storage fault raised by a [`SampleStore`]
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Port for the per-endpoint sample log and its snapshot projection
#[allow(dead_code)]
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Register an endpoint; no-op if it already exists
    async fn upsert_endpoint(&self, endpoint: &Endpoint) -> PersistenceResult<()>;

    /// Write path used by the poll scheduler.
    ///
    /// Upserts the endpoint, appends `sample`, replaces the endpoint's
    /// snapshot with `(sample.latency_ms, logo)` and applies retention, as
    /// one atomic step for that endpoint.
    async fn append_sample(&self, sample: &Sample, logo: Option<&str>) -> PersistenceResult<()>;

    /// Drop the oldest batch of samples if the endpoint is over capacity.
    /// Returns how many samples were removed.
    async fn evict_if_over_capacity(&self, endpoint: &Endpoint) -> PersistenceResult<usize>;

    /// All known endpoints in ascending order
    async fn list_endpoints(&self) -> PersistenceResult<Vec<Endpoint>>;

    /// Most recent sample of `endpoint`, if any
    async fn latest_sample(&self, endpoint: &Endpoint) -> PersistenceResult<Option<Sample>>;

    /// Most recent sample of every endpoint that has one, ordered by endpoint
    async fn latest_samples_all(&self) -> PersistenceResult<Vec<Sample>>;

    /// Up to `limit` samples of `endpoint`, newest first
    async fn samples(&self, endpoint: &Endpoint, limit: usize) -> PersistenceResult<Vec<Sample>>;

    /// Snapshot projection of `endpoint`
    async fn current_status(&self, endpoint: &Endpoint) -> PersistenceResult<Option<EndpointStatus>>;

    /// Number of retained samples for `endpoint`
    async fn sample_count(&self, endpoint: &Endpoint) -> PersistenceResult<usize>;
}
