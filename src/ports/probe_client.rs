use async_trait::async_trait;

use crate::domain::{Endpoint, ProbeOutcome};

/// Port for querying a single server's status
#[async_trait]
pub trait ProbeClient: Send + Sync {
    /// Probe `endpoint` once.
    ///
    /// Never fails: network and protocol errors yield [`ProbeOutcome::failed`].
    async fn probe(&self, endpoint: &Endpoint) -> ProbeOutcome;
}
