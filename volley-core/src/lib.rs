mod catalog;
mod config;
mod error;
mod iteration_metrics;
mod pool;
mod progress;
mod report;
mod request_metrics;
mod run;
mod schedule;
mod state;
mod thresholds;
mod thresholds_eval;
mod transport;
mod vu;

pub mod scenario;

pub use catalog::{
    BUILTIN_METRICS, CHECKS, DATA_RECEIVED, DATA_SENT, DEFAULT_ERROR_METRIC, HTTP_REQ_DURATION,
    HTTP_REQ_FAILED, HTTP_REQS, ITERATION_DURATION, ITERATIONS, MetricCatalog, MetricDecl, VUS,
    VUS_MAX,
};
pub use config::{
    DEFAULT_BASE_URL, DEFAULT_TICK, EnvVars, LoadOptions, LoadShape, RunConfig, RunOptions,
    RunOverrides, Stage,
};
pub use error::{Error, Result};
pub use iteration_metrics::IterationMetricIds;
pub use pool::{ReconcileStats, VuPool};
pub use progress::{LiveMetrics, ProgressFn, ProgressUpdate, StageProgress};
pub use report::{AbortReason, RunOutcome, RunReport};
pub use request_metrics::{RequestMetricIds, RequestSample};
pub use run::RunController;
pub use schedule::{StageSchedule, StageSnapshot};
pub use state::{RunState, RunStateCell};
pub use thresholds::{
    Threshold, ThresholdAgg, ThresholdEntry, ThresholdExpr, ThresholdOp, ThresholdSet,
    parse_threshold_expr, parse_threshold_key,
};
pub use thresholds_eval::{
    ThresholdOutcome, ThresholdResult, evaluate_thresholds, resolve_thresholds,
};
pub use transport::{Exchange, Transport, TransportError};
pub use vu::{CancelSignal, IterationCounts, VuLifecycle, VuState};

pub use volley_http::{HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind};
pub use volley_metrics as metrics;
