use std::time::Duration;

use smallvec::SmallVec;
use volley_metrics::{Batch, MetricId, MetricKind, Registry, Sample};

use crate::Result;
use crate::catalog::{
    CHECKS, DATA_RECEIVED, DATA_SENT, HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS,
};

#[derive(Debug, Clone, Copy)]
pub struct RequestMetricIds {
    pub reqs: MetricId,
    pub failed: MetricId,
    /// Milliseconds, send to full body.
    pub duration: MetricId,
    pub data_received: MetricId,
    pub data_sent: MetricId,
    pub checks: MetricId,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestSample<'a> {
    pub method: &'a str,
    pub name: &'a str,
    pub group: &'a str,
    /// `0` when no response was received.
    pub status: u16,
    /// Transport error or unexpected status.
    pub failed: bool,
    /// `None` when the request never produced a response.
    pub duration: Option<Duration>,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

type Tags<'a> = SmallVec<[(&'a str, &'a str); 4]>;

fn with_group<'a>(mut tags: Tags<'a>, group: &'a str) -> Tags<'a> {
    if !group.is_empty() {
        tags.push(("group", group));
    }
    tags
}

impl RequestMetricIds {
    pub fn register(metrics: &Registry) -> Result<Self> {
        Ok(Self {
            reqs: metrics.register(HTTP_REQS, MetricKind::Counter)?,
            failed: metrics.register(HTTP_REQ_FAILED, MetricKind::Rate)?,
            duration: metrics.register(HTTP_REQ_DURATION, MetricKind::Trend)?,
            data_received: metrics.register(DATA_RECEIVED, MetricKind::Counter)?,
            data_sent: metrics.register(DATA_SENT, MetricKind::Counter)?,
            checks: metrics.register(CHECKS, MetricKind::Rate)?,
        })
    }

    pub fn record_request(&self, batch: &mut Batch, sample: RequestSample<'_>) -> Result<()> {
        let registry = batch.registry().clone();
        let status = sample.status.to_string();

        let tags = with_group(
            SmallVec::from_slice(&[
                ("status", status.as_str()),
                ("method", sample.method),
                ("name", sample.name),
            ]),
            sample.group,
        );
        batch.push(self.reqs, registry.tags(&tags), Sample::Counter(1))?;

        let tags = with_group(SmallVec::from_slice(&[("name", sample.name)]), sample.group);
        batch.push(
            self.failed,
            registry.tags(&tags),
            Sample::Rate(sample.failed),
        )?;

        if let Some(duration) = sample.duration {
            let tags = with_group(
                SmallVec::from_slice(&[("name", sample.name), ("status", status.as_str())]),
                sample.group,
            );
            batch.push(
                self.duration,
                registry.tags(&tags),
                Sample::Trend(duration.as_secs_f64() * 1000.0),
            )?;
        }

        let untagged = registry.tags(&[]);
        if sample.bytes_received > 0 {
            batch.push(
                self.data_received,
                untagged.clone(),
                Sample::Counter(sample.bytes_received),
            )?;
        }
        if sample.bytes_sent > 0 {
            batch.push(self.data_sent, untagged, Sample::Counter(sample.bytes_sent))?;
        }
        Ok(())
    }

    pub fn record_check(&self, batch: &mut Batch, group: &str, check: &str, passed: bool) -> Result<()> {
        let tags = with_group(SmallVec::from_slice(&[("check", check)]), group);
        let tags = batch.registry().tags(&tags);
        batch.push(self.checks, tags, Sample::Rate(passed))?;
        Ok(())
    }
}
