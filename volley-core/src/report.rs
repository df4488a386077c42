use std::collections::BTreeMap;
use std::time::Duration;

use volley_metrics::Snapshot;

use crate::catalog::{CHECKS, HTTP_REQ_FAILED, HTTP_REQS};
use crate::state::RunState;
use crate::thresholds_eval::{ThresholdOutcome, ThresholdResult};
use crate::vu::IterationCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RunOutcome {
    Passed,
    /// Ran to completion, but at least one threshold failed.
    ThresholdsFailed,
    /// Stopped early by an abort-on-fail threshold.
    Aborted,
    SetupFailed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    SetupFailed(String),
    ThresholdBreached {
        metric: String,
        expression: String,
        observed: Option<f64>,
    },
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetupFailed(msg) => write!(f, "setup failed: {msg}"),
            Self::ThresholdBreached {
                metric,
                expression,
                observed,
            } => {
                write!(f, "threshold `{metric}: {expression}` breached")?;
                if let Some(v) = observed {
                    write!(f, " (observed {v})")?;
                }
                Ok(())
            }
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub final_state: RunState,
    pub abort_reason: Option<AbortReason>,
    /// Time spent in `Running`, drain included.
    pub elapsed: Duration,
    pub seed: u64,
    pub metrics: Snapshot,
    pub thresholds: Vec<ThresholdResult>,
    pub iterations: IterationCounts,
    /// Teardown problems never change the outcome.
    pub teardown_error: Option<String>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.outcome == RunOutcome::Passed
    }

    pub fn requests_total(&self) -> u64 {
        self.metrics.counter_total(HTTP_REQS)
    }

    pub fn requests_by_status(&self) -> BTreeMap<String, u64> {
        self.metrics.counter_by_tag(HTTP_REQS, "status")
    }

    /// Failed requests (transport error or unexpected status) over all requests.
    pub fn request_failure_rate(&self) -> Option<f64> {
        self.metrics.rate(HTTP_REQ_FAILED).rate()
    }

    /// Failed checks over all checks.
    pub fn check_failure_rate(&self) -> Option<f64> {
        let checks = self.metrics.rate(CHECKS);
        (checks.total > 0).then(|| checks.misses() as f64 / checks.total as f64)
    }

    pub fn breached(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| t.failed())
    }

    pub fn inconclusive(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds
            .iter()
            .filter(|t| t.outcome == ThresholdOutcome::Inconclusive)
    }
}
