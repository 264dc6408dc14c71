//! Read-side status aggregation.
//!
//! Derives per-target status from stored probe history. Performs no writes
//! and triggers no probes.

use crate::db::{ProbeResult, Store, StoreError, Target};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Derived status of one target. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub target: String,
    pub latest: ProbeResult,
    /// Length of the trailing run of non-success results, bounded by the
    /// rolling window.
    pub consecutive_failures: u32,
    /// Fraction of successes over the rolling window.
    pub success_ratio: f64,
    /// 95th percentile latency over successful samples in the window.
    pub p95_latency_ms: Option<f64>,
    /// Number of results the window actually held.
    pub sample_count: usize,
}

/// Computes target status from the result store.
pub struct StatusService {
    store: Arc<Store>,
    window: usize,
}

impl StatusService {
    /// `window` is the number of most recent results statistics roll over.
    pub fn new(store: Arc<Store>, window: usize) -> Self {
        Self { store, window }
    }

    /// Status for one target, or `None` if it has never been probed.
    ///
    /// "Never probed" and "last probe failed" are distinct states; callers
    /// must not collapse the two.
    pub fn status(&self, target: &str) -> Result<Option<TargetStatus>, StoreError> {
        let history =
            self.store
                .history(target, DateTime::<Utc>::UNIX_EPOCH, self.window)?;

        let Some(latest) = history.first().cloned() else {
            return Ok(None);
        };

        let consecutive_failures = history
            .iter()
            .take_while(|r| !r.outcome.is_success())
            .count() as u32;

        let successes: Vec<&ProbeResult> =
            history.iter().filter(|r| r.outcome.is_success()).collect();
        let success_ratio = successes.len() as f64 / history.len() as f64;

        let latencies: Vec<f64> = successes.iter().filter_map(|r| r.latency_ms).collect();
        let p95_latency_ms = percentile(&latencies, 95.0);

        Ok(Some(TargetStatus {
            target: target.to_string(),
            latest,
            consecutive_failures,
            success_ratio,
            p95_latency_ms,
            sample_count: history.len(),
        }))
    }

    /// Status for every configured target, `None` for never-probed ones.
    pub fn status_all(
        &self,
        targets: &[Target],
    ) -> Result<BTreeMap<String, Option<TargetStatus>>, StoreError> {
        let mut all = BTreeMap::new();
        for target in targets {
            all.insert(target.id.clone(), self.status(&target.id)?);
        }
        Ok(all)
    }
}

/// Linear-interpolation percentile, `None` for an empty sample.
fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let k = (sorted.len() - 1) as f64 * (p / 100.0);
    let f = k.floor() as usize;
    let c = k.ceil() as usize;
    if f == c {
        return Some(sorted[f]);
    }

    let d0 = sorted[f] * (c as f64 - k);
    let d1 = sorted[c] * (k - f as f64);
    Some(d0 + d1)
}
