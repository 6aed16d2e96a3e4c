use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Endpoint;

/// Truncate a timestamp to whole seconds, the resolution samples are kept at
pub fn truncate_to_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

/// One observation of one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub endpoint: Endpoint,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub observed_at: DateTime<Utc>,
    pub player_count: Option<u32>,
    pub latency_ms: Option<u32>,
}

impl Sample {
    pub fn new(endpoint: Endpoint, observed_at: DateTime<Utc>) -> Self {
        Self {
            endpoint,
            observed_at: truncate_to_seconds(observed_at),
            player_count: None,
            latency_ms: None,
        }
    }

    pub fn with_metrics(mut self, player_count: Option<u32>, latency_ms: Option<u32>) -> Self {
        self.player_count = player_count;
        self.latency_ms = latency_ms;
        self
    }

    /// True when the probe behind this sample produced no measurements
    pub fn is_empty(&self) -> bool {
        self.player_count.is_none() && self.latency_ms.is_none()
    }
}

/// Latest-wins snapshot kept alongside the sample log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub endpoint: Endpoint,
    pub ping: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
}

impl EndpointStatus {
    /// Snapshot produced by writing `sample` with an optional logo
    pub fn from_sample(sample: &Sample, logo: Option<String>) -> Self {
        Self {
            endpoint: sample.endpoint.clone(),
            ping: sample.latency_ms,
            logo,
            updated_at: sample.observed_at,
        }
    }
}

/// Result of probing a single endpoint once.
///
/// Every field is optional: a failed probe is the all-`None` outcome, which
/// keeps "no data" distinct from "zero players".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub player_count: Option<u32>,
    pub latency_ms: Option<u32>,
    pub logo: Option<String>,
}

impl ProbeOutcome {
    pub fn failed() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn is_failure(&self) -> bool {
        self.player_count.is_none() && self.latency_ms.is_none()
    }

    /// Turn this outcome into a sample and the logo destined for the snapshot
    pub fn into_sample(self, endpoint: Endpoint, observed_at: DateTime<Utc>) -> (Sample, Option<String>) {
        let sample = Sample::new(endpoint, observed_at).with_metrics(self.player_count, self.latency_ms);
        (sample, self.logo)
    }
}
