use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use volley_metrics::{Registry, Snapshot, per_sec};

use crate::catalog::{
    CHECKS, DATA_RECEIVED, DATA_SENT, HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS, ITERATIONS,
};
use crate::schedule::StageSchedule;
use crate::thresholds::Threshold;
use crate::thresholds_eval::evaluate_thresholds;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct LiveMetrics {
    pub requests_total: u64,
    /// Requests/sec over the last progress interval.
    pub requests_per_sec_now: f64,
    pub failed_requests_total: u64,
    pub checks_total: u64,
    pub checks_failed_total: u64,
    pub iterations_total: u64,
    pub iterations_per_sec_now: f64,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,
    /// Whole run so far, milliseconds.
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
}

impl LiveMetrics {
    fn from_snapshot(snap: &Snapshot, prev: Option<&LiveMetrics>, dt_secs: f64) -> Self {
        let failed = snap.rate(HTTP_REQ_FAILED);
        let checks = snap.rate(CHECKS);
        let latency = snap.trend(HTTP_REQ_DURATION);
        let requests_total = snap.counter_total(HTTP_REQS);
        let iterations_total = snap.counter_total(ITERATIONS);

        let (prev_requests, prev_iterations) =
            prev.map_or((0, 0), |p| (p.requests_total, p.iterations_total));

        Self {
            requests_total,
            requests_per_sec_now: per_sec(requests_total.saturating_sub(prev_requests), dt_secs),
            failed_requests_total: failed.hits,
            checks_total: checks.total,
            checks_failed_total: checks.misses(),
            iterations_total,
            iterations_per_sec_now: per_sec(
                iterations_total.saturating_sub(prev_iterations),
                dt_secs,
            ),
            bytes_received_total: snap.counter_total(DATA_RECEIVED),
            bytes_sent_total: snap.counter_total(DATA_SENT),
            latency_p50_ms: latency.as_ref().and_then(|t| t.percentile(50.0)),
            latency_p95_ms: latency.as_ref().and_then(|t| t.percentile(95.0)),
            latency_p99_ms: latency.as_ref().and_then(|t| t.percentile(99.0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProgress {
    /// 1-based.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// 1-based.
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub live_vus: u64,
    pub target_vus: u64,
    pub max_vus: u64,
    pub stage: Option<StageProgress>,
    pub metrics: LiveMetrics,
    /// `metric: expression` of every threshold failing right now.
    pub failing_thresholds: Vec<String>,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

/// Pool figures published by the run loop for the progress task.
#[derive(Debug, Default)]
pub(crate) struct LiveVus {
    live: AtomicU64,
    target: AtomicU64,
}

impl LiveVus {
    pub fn set(&self, live: u64, target: u64) {
        self.live.store(live, Ordering::Relaxed);
        self.target.store(target, Ordering::Relaxed);
    }

    fn get(&self) -> (u64, u64) {
        (
            self.live.load(Ordering::Relaxed),
            self.target.load(Ordering::Relaxed),
        )
    }
}

pub(crate) struct ProgressTask {
    pub progress: ProgressFn,
    pub registry: Arc<Registry>,
    pub schedule: StageSchedule,
    pub thresholds: Vec<Threshold>,
    pub vus: Arc<LiveVus>,
    pub max_vus: u64,
    pub started: Instant,
}

impl ProgressTask {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick is immediate; skip it so the first rate covers a full interval.
            interval.tick().await;

            let mut tick = 0u64;
            let mut last_at = Instant::now();
            let mut prev: Option<LiveMetrics> = None;

            loop {
                interval.tick().await;
                tick = tick.saturating_add(1);

                let now = Instant::now();
                let dt_secs = now.duration_since(last_at).as_secs_f64();
                last_at = now;
                let elapsed = self.started.elapsed();

                let snapshot = self.registry.snapshot();
                let metrics = LiveMetrics::from_snapshot(&snapshot, prev.as_ref(), dt_secs);
                let failing_thresholds = evaluate_thresholds(&snapshot, &self.thresholds, elapsed)
                    .into_iter()
                    .filter(|r| r.failed())
                    .map(|r| format!("{}: {}", r.metric, r.expression))
                    .collect();

                let (live_vus, target_vus) = self.vus.get();
                let stage = self
                    .schedule
                    .stage_snapshot_at(elapsed)
                    .map(|st| StageProgress {
                        stage: st.index + 1,
                        stages: st.count,
                        stage_elapsed: st.stage_elapsed,
                        stage_remaining: st.stage_remaining,
                        start_target: st.start_target,
                        end_target: st.end_target,
                        current_target: st.current_target,
                    });

                (self.progress)(ProgressUpdate {
                    tick,
                    elapsed,
                    total_duration: self.schedule.total_duration(),
                    live_vus,
                    target_vus,
                    max_vus: self.max_vus,
                    stage,
                    metrics: metrics.clone(),
                    failing_thresholds,
                });
                prev = Some(metrics);
            }
        })
    }
}
