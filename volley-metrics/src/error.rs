use crate::kind::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is already registered as {registered}, not {requested}")]
    KindMismatch {
        name: String,
        registered: MetricKind,
        requested: MetricKind,
    },

    #[error("metric `{0}` is not registered")]
    UnknownMetric(String),

    #[error("{sample} sample cannot be recorded into {kind} metric `{name}`")]
    SampleMismatch {
        name: String,
        kind: MetricKind,
        sample: MetricKind,
    },

    #[error("metric name cannot be empty")]
    EmptyName,
}
