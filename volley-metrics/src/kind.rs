#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MetricKind {
    /// Monotonic sum.
    Counter,
    /// Last written value.
    Gauge,
    /// Fraction of true samples.
    Rate,
    /// Value distribution with percentiles.
    Trend,
}

/// One observation, tagged with the kind of metric it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Counter(u64),
    Gauge(i64),
    Rate(bool),
    Trend(f64),
}

impl Sample {
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }
}
