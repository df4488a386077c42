use volley_metrics::{MetricKind, Registry};

use crate::{Error, Result};

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const CHECKS: &str = "checks";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const DATA_RECEIVED: &str = "data_received";
pub const DATA_SENT: &str = "data_sent";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

pub const DEFAULT_ERROR_METRIC: &str = "errors";

pub const BUILTIN_METRICS: &[(&str, MetricKind)] = &[
    (HTTP_REQS, MetricKind::Counter),
    (HTTP_REQ_FAILED, MetricKind::Rate),
    (HTTP_REQ_DURATION, MetricKind::Trend),
    (CHECKS, MetricKind::Rate),
    (ITERATIONS, MetricKind::Counter),
    (ITERATION_DURATION, MetricKind::Trend),
    (DATA_RECEIVED, MetricKind::Counter),
    (DATA_SENT, MetricKind::Counter),
    (VUS, MetricKind::Gauge),
    (VUS_MAX, MetricKind::Gauge),
];

/// A metric declared by the scenario file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDecl {
    pub name: String,
    pub kind: MetricKind,
}

impl MetricDecl {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Every metric a run knows about: built-ins, the scenario error rate and declared metrics.
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    entries: Vec<(String, MetricKind)>,
    error_metric: String,
}

impl MetricCatalog {
    pub fn new(declared: &[MetricDecl], error_metric: &str) -> Result<Self> {
        let mut catalog = Self {
            entries: BUILTIN_METRICS
                .iter()
                .map(|(name, kind)| ((*name).to_string(), *kind))
                .collect(),
            error_metric: error_metric.to_string(),
        };

        catalog.add(error_metric, MetricKind::Rate)?;
        for decl in declared {
            if decl.kind == MetricKind::Gauge {
                return Err(Error::InvalidScenario(format!(
                    "metric `{}`: gauges cannot be declared, use counter, rate or trend",
                    decl.name
                )));
            }
            catalog.add(&decl.name, decl.kind)?;
        }
        Ok(catalog)
    }

    fn add(&mut self, name: &str, kind: MetricKind) -> Result<()> {
        if name.is_empty() || name.contains(['{', '}']) {
            return Err(Error::InvalidScenario(format!(
                "invalid metric name `{name}`"
            )));
        }
        match self.kind_of(name) {
            Some(existing) if existing == kind => Ok(()),
            Some(existing) => Err(Error::InvalidScenario(format!(
                "metric `{name}` is already a {existing}, cannot redeclare it as {kind}"
            ))),
            None => {
                self.entries.push((name.to_string(), kind));
                Ok(())
            }
        }
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, kind)| *kind)
    }

    pub fn error_metric(&self) -> &str {
        &self.error_metric
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, MetricKind)> {
        self.entries.iter().map(|(n, k)| (n.as_str(), *k))
    }

    pub fn register_all(&self, registry: &Registry) -> Result<()> {
        for (name, kind) in self.iter() {
            registry.register(name, kind)?;
        }
        Ok(())
    }
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self {
            entries: BUILTIN_METRICS
                .iter()
                .map(|(name, kind)| ((*name).to_string(), *kind))
                .chain(std::iter::once((
                    DEFAULT_ERROR_METRIC.to_string(),
                    MetricKind::Rate,
                )))
                .collect(),
            error_metric: DEFAULT_ERROR_METRIC.to_string(),
        }
    }
}
