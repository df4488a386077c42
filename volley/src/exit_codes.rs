use volley_core::{RunOutcome, RunReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed at the end of the run.
    ThresholdsFailed = 11,

    /// An abort-on-fail threshold stopped the run early.
    AbortedByThreshold = 12,

    /// Setup requests or checks failed; no load was generated.
    SetupFailed = 13,

    /// Invalid CLI/config/scenario input (bad flags, durations, stages, thresholds, steps).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, engine faults, panicked VU tasks).
    RuntimeError = 40,

    /// Interrupted by Ctrl-C.
    Cancelled = 130,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_outcome(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Passed => Self::Success,
            RunOutcome::ThresholdsFailed => Self::ThresholdsFailed,
            RunOutcome::Aborted => Self::AbortedByThreshold,
            RunOutcome::SetupFailed => Self::SetupFailed,
            RunOutcome::Cancelled => Self::Cancelled,
        }
    }

    #[must_use]
    pub fn from_report(report: &RunReport) -> Self {
        Self::from_outcome(report.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_outcome_has_a_distinct_code() {
        let codes: Vec<i32> = [
            RunOutcome::Passed,
            RunOutcome::ThresholdsFailed,
            RunOutcome::Aborted,
            RunOutcome::SetupFailed,
            RunOutcome::Cancelled,
        ]
        .into_iter()
        .map(|o| ExitCode::from_outcome(o).as_i32())
        .collect();
        assert_eq!(codes, vec![0, 11, 12, 13, 130]);
    }
}
