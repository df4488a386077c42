use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("metrics error: {0}")]
    Metrics(#[from] volley_metrics::Error),

    /// Scheduler/pool invariant violation. Always fatal.
    #[error("engine fault: {0}")]
    EngineFault(String),

    #[error("setup failed: {0}")]
    SetupFailure(String),

    #[error("teardown failed: {0}")]
    TeardownFailure(String),

    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("`duration` must be a positive duration")]
    InvalidDuration,

    #[error("`duration` is required when `stages` are not set")]
    MissingDuration,

    #[error("`stages` must be a non-empty list of {{ duration, target }} with a non-zero total")]
    InvalidStages,

    #[error("`stages` cannot be combined with `vus`/`duration`")]
    ConflictingRunShape,

    #[error("`max_vus` ({max_vus}) is below the schedule peak ({peak})")]
    InvalidMaxVus { max_vus: u64, peak: u64 },

    #[error("`tick` must be between 1ms and 10s (got {0:?})")]
    InvalidTick(Duration),

    #[error("invalid threshold for `{metric}`: {error}")]
    InvalidThresholdExpr { metric: String, error: String },

    #[error("threshold references unknown metric `{0}`")]
    UnknownThresholdMetric(String),

    #[error("threshold `{expression}` cannot be applied to {kind} metric `{metric}`")]
    ThresholdAggregateMismatch {
        metric: String,
        kind: volley_metrics::MetricKind,
        expression: String,
    },

    #[error("invalid base url `{url}`: {error}")]
    InvalidBaseUrl { url: String, error: String },

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),
}

impl Error {
    /// Configuration problems detected before anything ran.
    #[must_use]
    pub fn is_config(&self) -> bool {
        !matches!(
            self,
            Self::Join(_)
                | Self::Metrics(_)
                | Self::EngineFault(_)
                | Self::SetupFailure(_)
                | Self::TeardownFailure(_)
        )
    }
}
