use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::{Endpoint, ProbeOutcome, Sample};
use crate::ports::{PersistenceResult, ProbeClient, SampleStore};

/// Per-probe bound used when none is configured
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened during one fan-out/collect/commit round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub probed: usize,
    pub failed: usize,
    pub committed: usize,
    pub commit_errors: usize,
    pub elapsed: Duration,
}

/// Decision taken after a cycle finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// Wait this long before the next cycle
    Sleep(Duration),
    /// The cycle ran past its period by this much; start again at once
    Overrun(Duration),
}

impl Pace {
    pub fn after(elapsed: Duration, period: Duration) -> Self {
        match elapsed.checked_sub(period) {
            Some(over) if !over.is_zero() => Pace::Overrun(over),
            _ => Pace::Sleep(period - elapsed),
        }
    }
}

/// Cumulative counters shared with the HTTP layer
#[derive(Debug, Default)]
pub struct SchedulerStats {
    cycles: AtomicU64,
    overruns: AtomicU64,
    last_cycle_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub overruns: u64,
    pub last_cycle_ms: u64,
}

impl SchedulerStats {
    fn record_cycle(&self, elapsed: Duration) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.last_cycle_ms.store(millis, Ordering::Relaxed);
    }

    fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            last_cycle_ms: self.last_cycle_ms.load(Ordering::Relaxed),
        }
    }
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    // A dropped sender counts as a shutdown request.
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Sleep for `wait`; returns false if shutdown was requested first.
/// Updates that leave the flag unset do not cut the sleep short.
async fn pause(wait: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            _ = shutdown.changed() => {
                if shutdown_requested(shutdown) {
                    return false;
                }
            }
        }
    }
}

/// Drives the poll cycle: probe every endpoint concurrently, wait for all
/// of them, write the results, then pace to the configured period.
pub struct PollScheduler {
    endpoints: Vec<Endpoint>,
    probe: Arc<dyn ProbeClient>,
    store: Arc<dyn SampleStore>,
    period: Duration,
    probe_timeout: Duration,
    stats: Arc<SchedulerStats>,
}

impl PollScheduler {
    pub fn new(
        endpoints: Vec<Endpoint>,
        probe: Arc<dyn ProbeClient>,
        store: Arc<dyn SampleStore>,
        period: Duration,
    ) -> Self {
        Self {
            endpoints,
            probe,
            store,
            period,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    /// Make every configured endpoint visible to readers before its first sample
    pub async fn register_endpoints(&self) -> PersistenceResult<()> {
        for endpoint in &self.endpoints {
            self.store.upsert_endpoint(endpoint).await?;
        }
        Ok(())
    }

    /// Run the loop on a background task until `shutdown` flips
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Loop until `shutdown` is set, honoring it only between cycles
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            endpoints = self.endpoints.len(),
            period_secs = self.period.as_secs_f64(),
            probe_timeout_secs = self.probe_timeout.as_secs_f64(),
            "Poll scheduler started"
        );

        while !shutdown_requested(&shutdown) {
            let report = self.run_cycle().await;

            match Pace::after(report.elapsed, self.period) {
                Pace::Overrun(over) => {
                    self.stats.record_overrun();
                    warn!(
                        elapsed_ms = report.elapsed.as_millis() as u64,
                        period_ms = self.period.as_millis() as u64,
                        over_ms = over.as_millis() as u64,
                        "Poll cycle overran its period, starting next cycle immediately"
                    );
                }
                Pace::Sleep(wait) => {
                    if !pause(wait, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("Poll scheduler stopped");
    }

    /// One cycle without pacing
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();

        let results = self.collect().await;
        let failed = results.iter().filter(|(sample, _)| sample.is_empty()).count();
        let probed = results.len();
        let (committed, commit_errors) = self.commit(results).await;

        let elapsed = started.elapsed();
        self.stats.record_cycle(elapsed);

        let report = CycleReport {
            probed,
            failed,
            committed,
            commit_errors,
            elapsed,
        };
        debug!(
            probed,
            failed,
            committed,
            commit_errors,
            elapsed_ms = elapsed.as_millis() as u64,
            "Poll cycle finished"
        );
        report
    }

    /// Fan out one probe per endpoint and wait for every one of them
    async fn collect(&self) -> Vec<(Sample, Option<String>)> {
        let probes = self.endpoints.iter().map(|endpoint| async move {
            let outcome = match tokio::time::timeout(self.probe_timeout, self.probe.probe(endpoint)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(%endpoint, "probe did not return in time");
                    ProbeOutcome::failed()
                }
            };
            outcome.into_sample(endpoint.clone(), Utc::now())
        });

        join_all(probes).await
    }

    /// Write each result independently; returns (committed, failed) counts
    async fn commit(&self, results: Vec<(Sample, Option<String>)>) -> (usize, usize) {
        let mut committed = 0;
        let mut errors = 0;

        for (sample, logo) in results {
            match self.store.append_sample(&sample, logo.as_deref()).await {
                Ok(()) => committed += 1,
                Err(e) => {
                    errors += 1;
                    error!(endpoint = %sample.endpoint, error = %e, "Failed to store sample");
                }
            }
        }

        (committed, errors)
    }
}
