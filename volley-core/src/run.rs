use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use volley_metrics::{Registry, Snapshot};

use crate::config::RunConfig;
use crate::iteration_metrics::IterationMetricIds;
use crate::pool::VuPool;
use crate::progress::{LiveVus, ProgressFn, ProgressTask};
use crate::report::{AbortReason, RunOutcome, RunReport};
use crate::scenario::{Scenario, ScenarioRuntime};
use crate::state::{RunState, RunStateCell};
use crate::thresholds::Threshold;
use crate::thresholds_eval::{ThresholdResult, evaluate_thresholds};
use crate::transport::Transport;
use crate::vu::{CancelSignal, IterationCounts};
use crate::{Error, Result};

/// Drives one run: setup, the schedule/pool/threshold loop, teardown and the final report.
pub struct RunController<T> {
    config: Arc<RunConfig>,
    scenario: Arc<Scenario>,
    transport: Arc<T>,
    registry: Arc<Registry>,
    state: Arc<RunStateCell>,
    cancel: Arc<CancelSignal>,
    progress: Option<ProgressFn>,
}

impl<T: Transport> RunController<T> {
    pub fn new(config: RunConfig, scenario: Scenario, transport: Arc<T>) -> Self {
        Self {
            config: Arc::new(config),
            scenario: Arc::new(scenario),
            transport,
            registry: Arc::new(Registry::default()),
            state: Arc::new(RunStateCell::new()),
            cancel: Arc::new(CancelSignal::new()),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Cancelling retires every VU after its current iteration; teardown still runs.
    pub fn cancel_handle(&self) -> Arc<CancelSignal> {
        self.cancel.clone()
    }

    pub fn state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Returns `Err` only for configuration problems and engine faults. Setup failures,
    /// threshold breaches and cancellation are outcomes of the report.
    pub async fn run(self) -> Result<RunReport> {
        let mut runtime = ScenarioRuntime::new(
            self.scenario.clone(),
            &self.config,
            self.registry.clone(),
            self.transport.clone(),
        )?;

        self.state.advance(RunState::SettingUp)?;
        tracing::info!(base_url = %self.config.base_url, "running setup");
        match runtime.run_setup().await {
            Ok(vars) => runtime.set_initial_vars(vars),
            Err(Error::SetupFailure(msg)) => {
                tracing::warn!(error = %msg, "setup failed, no VUs started");
                self.state.advance(RunState::Aborted)?;
                self.registry.reset();
                return Ok(self.report(
                    RunOutcome::SetupFailed,
                    Some(AbortReason::SetupFailed(msg)),
                    Duration::ZERO,
                    self.registry.snapshot(),
                    Vec::new(),
                    IterationCounts::default(),
                    None,
                ));
            }
            Err(err) => return Err(err),
        }
        let runtime = Arc::new(runtime);

        self.registry.reset();
        self.state.advance(RunState::Running)?;
        let started = Instant::now();

        let mut pool = VuPool::new(runtime.clone(), self.config.max_vus);
        let vus = Arc::new(LiveVus::default());
        let progress = self.progress.clone().map(|progress| {
            ProgressTask {
                progress,
                registry: self.registry.clone(),
                schedule: self.config.schedule.clone(),
                thresholds: self.config.thresholds.clone(),
                vus: vus.clone(),
                max_vus: self.config.max_vus,
                started,
            }
            .spawn()
        });

        let ids = *runtime.iteration_ids();
        let looped = self.drive(&mut pool, ids, &vus, started).await;
        let abort = match &looped {
            Ok(Some(reason)) => {
                tracing::warn!(reason = %reason, "aborting run");
                Some(reason.clone())
            }
            Ok(None) => None,
            Err(err) => {
                tracing::error!(error = %err, "run loop failed");
                None
            }
        };
        if abort.is_some() || looped.is_err() {
            self.state.advance(RunState::Aborted)?;
        }

        let drained = pool.drain().await;
        if self.state.get() == RunState::Running {
            let next = if drained.is_ok() {
                RunState::TearingDown
            } else {
                RunState::Aborted
            };
            self.state.advance(next)?;
        }
        vus.set(0, 0);
        let elapsed = started.elapsed();
        if let Some(handle) = progress {
            handle.abort();
            handle.await.ok();
        }

        let snapshot = self.registry.snapshot();
        let thresholds = evaluate_thresholds(&snapshot, &self.config.thresholds, elapsed);
        let iterations = pool.iterations();

        tracing::info!("running teardown");
        let teardown_error = match runtime.run_teardown().await {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(error = %err, "teardown failed");
                Some(err.to_string())
            }
        };

        if self.state.get() == RunState::TearingDown {
            self.state.advance(RunState::Completed)?;
        }
        looped?;
        drained?;

        let outcome = match &abort {
            Some(AbortReason::Cancelled) => RunOutcome::Cancelled,
            Some(_) => RunOutcome::Aborted,
            None if thresholds.iter().any(|t| t.failed()) => RunOutcome::ThresholdsFailed,
            None => RunOutcome::Passed,
        };
        Ok(self.report(
            outcome,
            abort,
            elapsed,
            snapshot,
            thresholds,
            iterations,
            teardown_error,
        ))
    }

    /// Reconciles the pool every tick until the schedule ends, a cancel arrives or an
    /// abort-on-fail threshold fails.
    async fn drive(
        &self,
        pool: &mut VuPool<T>,
        ids: IterationMetricIds,
        vus: &LiveVus,
        started: Instant,
    ) -> Result<Option<AbortReason>> {
        let abort_thresholds: Vec<&Threshold> = self
            .config
            .thresholds
            .iter()
            .filter(|t| t.abort_on_fail)
            .collect();
        let mut abort_metrics: Vec<&str> = abort_thresholds
            .iter()
            .map(|t| t.metric.as_str())
            .collect();
        abort_metrics.sort_unstable();
        abort_metrics.dedup();

        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.cancel.cancelled() => return Ok(Some(AbortReason::Cancelled)),
            }

            let elapsed = started.elapsed();
            let Some(target) = self.config.schedule.target_at(elapsed) else {
                return Ok(None);
            };
            let stats = pool.reconcile(target).await?;
            vus.set(stats.live, target);
            ids.record_vus(&self.registry, stats.live, pool.max_vus())?;

            let due: Vec<&Threshold> = abort_thresholds
                .iter()
                .copied()
                .filter(|t| elapsed >= t.delay_abort_eval)
                .collect();
            if due.is_empty() {
                continue;
            }
            let snapshot = self.registry.snapshot_of(&abort_metrics);
            if let Some(breach) = evaluate_thresholds(&snapshot, due, elapsed)
                .into_iter()
                .find(|r| r.failed())
            {
                return Ok(Some(AbortReason::ThresholdBreached {
                    metric: breach.metric,
                    expression: breach.expression,
                    observed: breach.observed,
                }));
            }
        }
    }

    fn report(
        &self,
        outcome: RunOutcome,
        abort_reason: Option<AbortReason>,
        elapsed: Duration,
        metrics: Snapshot,
        thresholds: Vec<ThresholdResult>,
        iterations: IterationCounts,
        teardown_error: Option<String>,
    ) -> RunReport {
        RunReport {
            outcome,
            final_state: self.state.get(),
            abort_reason,
            elapsed,
            seed: self.config.seed,
            metrics,
            thresholds,
            iterations,
            teardown_error,
        }
    }
}
