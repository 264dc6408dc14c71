//! Tick-driven probe scheduler.
//!
//! One owning loop holds every per-target record; probes run as detached
//! tasks and report back over a completion channel. A target with a probe
//! in flight is skipped on subsequent ticks, so no target ever has two
//! concurrent probes and per-target results are written in order.

use crate::db::{ProbeResult, Store, StoreError, Target};
use crate::probe::Prober;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Fixed scheduler wake period.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Per-target scheduling record. Mutated only by the owning loop.
struct TargetRecord {
    target: Target,
    next_due: Instant,
    /// Handle of the running probe task, `None` while idle.
    inflight: Option<JoinHandle<()>>,
}

/// The scheduler that drives all probes.
pub struct Scheduler {
    store: Arc<Store>,
    prober: Arc<dyn Prober>,
    records: HashMap<String, TargetRecord>,
    done_tx: mpsc::Sender<ProbeResult>,
    done_rx: mpsc::Receiver<ProbeResult>,
    shutdown_grace: Duration,
}

impl Scheduler {
    /// Create a scheduler over a fixed target set. Every target is due
    /// immediately.
    pub fn new(
        store: Arc<Store>,
        prober: Arc<dyn Prober>,
        targets: Vec<Target>,
        shutdown_grace: Duration,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::channel(1000);
        let now = Instant::now();

        let records = targets
            .into_iter()
            .map(|target| {
                (
                    target.id.clone(),
                    TargetRecord {
                        target,
                        next_due: now,
                        inflight: None,
                    },
                )
            })
            .collect();

        Self {
            store,
            prober,
            records,
            done_tx,
            done_rx,
            shutdown_grace,
        }
    }

    /// Run until a shutdown signal arrives, then drain in-flight probes up
    /// to the grace period and abort the rest.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("starting scheduler with {} targets", self.records.len());

        let mut tick = interval(TICK_PERIOD);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                Some(result) = self.done_rx.recv() => self.complete(result),
                _ = tick.tick() => self.dispatch_due(),
            }
        }

        self.drain().await;
        tracing::info!("scheduler stopped");
    }

    /// Dispatch a probe task for every idle target whose due time has
    /// passed. Never waits on a probe.
    fn dispatch_due(&mut self) {
        let now = Instant::now();

        for rec in self.records.values_mut() {
            if rec.inflight.is_some() || now < rec.next_due {
                continue;
            }

            // Anchor the next due time to this probe's start, not its
            // completion, so a slow probe cannot stretch the period.
            rec.next_due = now + rec.target.interval;

            let prober = self.prober.clone();
            let target = rec.target.clone();
            let tx = self.done_tx.clone();

            tracing::debug!("dispatching probe for {}", target.id);

            rec.inflight = Some(tokio::spawn(async move {
                let result = prober.probe(&target).await;
                if tx.send(result).await.is_err() {
                    // Scheduler already gone; the probe leaves no record.
                    tracing::debug!("dropping probe result for {}", target.id);
                }
            }));
        }
    }

    /// Record a finished probe and return its target to the idle state.
    fn complete(&mut self, result: ProbeResult) {
        if let Some(rec) = self.records.get_mut(&result.target) {
            rec.inflight = None;
        }

        if result.outcome.is_success() {
            tracing::debug!("probe for {} succeeded", result.target);
        } else {
            tracing::warn!(
                "probe for {} came back {}: {}",
                result.target,
                result.outcome.as_str(),
                result.detail.as_deref().unwrap_or("n/a")
            );
        }

        match self.store.append(&result) {
            Ok(()) => {}
            Err(e @ StoreError::Duplicate { .. }) => {
                // At-most-one-in-flight makes this unreachable; a hit here
                // is a scheduling bug, not a storage condition.
                tracing::error!("scheduling invariant violated: {}", e);
            }
            Err(e) => {
                tracing::warn!(
                    "failed to store result for {}: {} (target retries next cycle)",
                    result.target,
                    e
                );
            }
        }
    }

    /// Let in-flight probes finish within the grace period; abort stragglers.
    async fn drain(&mut self) {
        let deadline = Instant::now() + self.shutdown_grace;

        while self.records.values().any(|r| r.inflight.is_some()) {
            match tokio::time::timeout_at(deadline, self.done_rx.recv()).await {
                Ok(Some(result)) => self.complete(result),
                Ok(None) => break,
                Err(_) => {
                    for rec in self.records.values_mut() {
                        if let Some(handle) = rec.inflight.take() {
                            tracing::warn!("aborting in-flight probe for {}", rec.target.id);
                            handle.abort();
                        }
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Outcome;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    /// Deterministic prober: sleeps a fixed time, returns a fixed outcome,
    /// and stamps results from the paused test clock so timestamps follow
    /// the virtual timeline.
    struct ScriptedProber {
        delay: Duration,
        outcome: Outcome,
        epoch: Instant,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedProber {
        fn new(delay: Duration, outcome: Outcome) -> Self {
            Self {
                delay,
                outcome,
                epoch: Instant::now(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn base() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, target: &Target) -> ProbeResult {
            let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(n, Ordering::SeqCst);

            let started = self.epoch.elapsed();
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let latency = (self.outcome == Outcome::Success
                || self.outcome == Outcome::Failure)
                .then(|| self.delay.as_secs_f64() * 1000.0);

            ProbeResult {
                target: target.id.clone(),
                timestamp: Self::base() + ChronoDuration::from_std(started).unwrap(),
                outcome: self.outcome,
                latency_ms: latency,
                detail: (self.outcome == Outcome::Failure).then(|| "500".to_string()),
            }
        }
    }

    fn target(id: &str, interval_secs: u64, timeout_secs: u64) -> Target {
        Target {
            id: id.to_string(),
            url: format!("http://example.test/{}", id),
            interval: Duration::from_secs(interval_secs),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn run_for(
        scheduler: Scheduler,
        virtual_time: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(rx));
        tokio::time::sleep(virtual_time).await;
        tx.send(()).unwrap();
        handle
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_cadence() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let prober = Arc::new(ScriptedProber::new(
            Duration::from_millis(10),
            Outcome::Success,
        ));

        let scheduler = Scheduler::new(
            store.clone(),
            prober.clone(),
            vec![target("api", 1, 1)],
            Duration::from_secs(1),
        );
        run_for(scheduler, Duration::from_millis(4500)).await.await.unwrap();

        // ~4.5 elapsed intervals of 1s: floor ± 1.
        let history = store.history("api", ScriptedProber::base(), 100).unwrap();
        assert!(
            (4..=6).contains(&history.len()),
            "expected 4..=6 results, got {}",
            history.len()
        );

        // Timestamps strictly increase oldest-first.
        let mut oldest_first = history.clone();
        oldest_first.reverse();
        for pair in oldest_first.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_never_overlaps() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        // Probe takes 2.5 intervals.
        let prober = Arc::new(ScriptedProber::new(
            Duration::from_millis(2500),
            Outcome::Success,
        ));

        let scheduler = Scheduler::new(
            store.clone(),
            prober.clone(),
            vec![target("api", 1, 3)],
            Duration::from_millis(100),
        );
        run_for(scheduler, Duration::from_millis(5800)).await.await.unwrap();

        assert_eq!(prober.max_in_flight.load(Ordering::SeqCst), 1);

        // Starts at 0s and 3s: the missed cycles are skipped, not queued.
        let mut results = store.history("api", ScriptedProber::base(), 100).unwrap();
        results.reverse();
        assert_eq!(results.len(), 2);

        // No overlapping [start, start+latency] windows.
        for pair in results.windows(2) {
            let end = pair[0].timestamp
                + ChronoDuration::milliseconds(pair[0].latency_ms.unwrap() as i64);
            assert!(end <= pair[1].timestamp);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_target_times_out_once_per_cycle() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        // The executor gives up just under the 1s timeout; the endpoint
        // itself would have taken 5s.
        let prober = Arc::new(ScriptedProber::new(
            Duration::from_millis(950),
            Outcome::Timeout,
        ));

        let scheduler = Scheduler::new(
            store.clone(),
            prober.clone(),
            vec![target("api", 1, 1)],
            Duration::from_secs(2),
        );
        run_for(scheduler, Duration::from_millis(2500)).await.await.unwrap();

        // Three cycles, exactly one Timeout each, starts >= one interval apart.
        let mut results = store.history("api", ScriptedProber::base(), 100).unwrap();
        results.reverse();
        assert_eq!(results.len(), 3);
        for r in &results {
            assert_eq!(r.outcome, Outcome::Timeout);
            assert!(r.latency_ms.is_none());
        }
        for pair in results.windows(2) {
            assert!(pair[1].timestamp - pair[0].timestamp >= ChronoDuration::seconds(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_target_accumulates_failures() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let prober = Arc::new(ScriptedProber::new(
            Duration::from_millis(20),
            Outcome::Failure,
        ));

        let scheduler = Scheduler::new(
            store.clone(),
            prober.clone(),
            vec![target("api", 1, 1)],
            Duration::from_secs(1),
        );
        run_for(scheduler, Duration::from_millis(3500)).await.await.unwrap();

        let results = store.history("api", ScriptedProber::base(), 100).unwrap();
        assert!(!results.is_empty());
        for r in &results {
            assert_eq!(r.outcome, Outcome::Failure);
            assert_eq!(r.detail.as_deref(), Some("500"));
        }

        let status = crate::status::StatusService::new(store.clone(), 20)
            .status("api")
            .unwrap()
            .unwrap();
        assert_eq!(status.consecutive_failures as usize, results.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_probe_past_grace() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let prober = Arc::new(ScriptedProber::new(
            Duration::from_secs(10),
            Outcome::Success,
        ));

        let scheduler = Scheduler::new(
            store.clone(),
            prober.clone(),
            vec![target("api", 1, 30)],
            Duration::from_millis(500),
        );
        run_for(scheduler, Duration::from_millis(100)).await.await.unwrap();

        // The probe was cancelled: it leaves no record at all.
        assert!(store.history("api", ScriptedProber::base(), 100).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_keeps_probe_within_grace() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let prober = Arc::new(ScriptedProber::new(
            Duration::from_millis(300),
            Outcome::Success,
        ));

        let scheduler = Scheduler::new(
            store.clone(),
            prober.clone(),
            vec![target("api", 60, 1)],
            Duration::from_secs(1),
        );
        run_for(scheduler, Duration::from_millis(100)).await.await.unwrap();

        // In flight at shutdown, but finished inside the grace period.
        let results = store.history("api", ScriptedProber::base(), 100).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_targets_probe_concurrently() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let prober = Arc::new(ScriptedProber::new(
            Duration::from_millis(400),
            Outcome::Success,
        ));

        let scheduler = Scheduler::new(
            store.clone(),
            prober.clone(),
            vec![target("api", 1, 1), target("web", 1, 1), target("db", 1, 1)],
            Duration::from_secs(1),
        );
        run_for(scheduler, Duration::from_millis(2500)).await.await.unwrap();

        // All three dispatched on the same ticks, in parallel.
        assert!(prober.max_in_flight.load(Ordering::SeqCst) >= 2);
        for id in ["api", "web", "db"] {
            let results = store.history(id, ScriptedProber::base(), 100).unwrap();
            assert!(
                (2..=4).contains(&results.len()),
                "target {} has {} results",
                id,
                results.len()
            );
        }
    }
}
