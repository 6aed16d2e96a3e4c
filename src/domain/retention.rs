use serde::{Deserialize, Serialize};

/// Default number of samples removed per eviction
pub const EVICTION_BATCH: usize = 100;

/// Default per-endpoint sample cap
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Per-endpoint retention bound.
///
/// Eviction is batched: once the count exceeds `max_entries`, the oldest
/// `eviction_batch` samples go at once, so the stored count may overshoot
/// `max_entries` by at most `eviction_batch - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_entries: usize,
    pub eviction_batch: usize,
    pub enabled: bool,
}

impl RetentionPolicy {
    pub fn new(max_entries: usize, eviction_batch: usize) -> Self {
        Self {
            max_entries,
            eviction_batch,
            enabled: true,
        }
    }

    /// Policy that never evicts
    #[cfg(test)]
    pub fn unbounded() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Number of oldest samples to drop for an endpoint holding `count`
    pub fn evictions_for(&self, count: usize) -> usize {
        if self.enabled && count > self.max_entries {
            self.eviction_batch.min(count)
        } else {
            0
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, EVICTION_BATCH)
    }
}
