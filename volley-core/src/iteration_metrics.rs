use std::time::Duration;

use volley_metrics::{Batch, MetricId, MetricKind, Registry, Sample};

use crate::Result;
use crate::catalog::{ITERATION_DURATION, ITERATIONS, VUS, VUS_MAX};

#[derive(Debug, Clone, Copy)]
pub struct IterationMetricIds {
    pub iterations: MetricId,
    /// Milliseconds, pacing included.
    pub iteration_duration: MetricId,
    pub vus: MetricId,
    pub vus_max: MetricId,
}

impl IterationMetricIds {
    pub fn register(metrics: &Registry) -> Result<Self> {
        Ok(Self {
            iterations: metrics.register(ITERATIONS, MetricKind::Counter)?,
            iteration_duration: metrics.register(ITERATION_DURATION, MetricKind::Trend)?,
            vus: metrics.register(VUS, MetricKind::Gauge)?,
            vus_max: metrics.register(VUS_MAX, MetricKind::Gauge)?,
        })
    }

    pub fn record_iteration(&self, batch: &mut Batch, duration: Duration) -> Result<()> {
        let tags = batch.registry().tags(&[]);
        batch.push(self.iterations, tags.clone(), Sample::Counter(1))?;
        batch.push(
            self.iteration_duration,
            tags,
            Sample::Trend(duration.as_secs_f64() * 1000.0),
        )?;
        Ok(())
    }

    pub fn record_vus(&self, metrics: &Registry, live: u64, max: u64) -> Result<()> {
        let tags = metrics.tags(&[]);
        let clamp = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        metrics.record_series(self.vus, &tags, Sample::Gauge(clamp(live)))?;
        metrics.record_series(self.vus_max, &tags, Sample::Gauge(clamp(max)))?;
        Ok(())
    }
}
