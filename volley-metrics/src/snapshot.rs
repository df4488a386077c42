use std::collections::BTreeMap;

use crate::kind::MetricKind;
use crate::trend::TrendValue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateValue {
    pub hits: u64,
    pub total: u64,
}

impl RateValue {
    /// `hits / total`, always within `[0, 1]`; `None` without samples.
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.hits.min(self.total) as f64 / self.total as f64)
    }

    pub fn misses(&self) -> u64 {
        self.total.saturating_sub(self.hits)
    }

    fn add(&mut self, other: RateValue) {
        self.hits = self.hits.saturating_add(other.hits);
        self.total = self.total.saturating_add(other.total);
    }
}

#[derive(Debug, Clone)]
pub enum SeriesValue {
    Counter(u64),
    Gauge(i64),
    Rate(RateValue),
    Trend(TrendValue),
}

#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    /// Sorted by key.
    pub tags: Vec<(String, String)>,
    pub value: SeriesValue,
}

impl SeriesSnapshot {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn matches(&self, selector: &[(String, String)]) -> bool {
        selector.iter().all(|(k, v)| self.tag(k) == Some(v.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub name: String,
    pub kind: MetricKind,
    pub series: Vec<SeriesSnapshot>,
}

/// Result of folding every series of a metric that matches a tag selector.
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub kind: MetricKind,
    /// Number of series folded in.
    pub series: usize,
    pub value: SeriesValue,
}

impl Aggregate {
    /// Number of underlying observations. Zero means the metric has no data yet.
    pub fn samples(&self) -> u64 {
        match &self.value {
            SeriesValue::Counter(_) | SeriesValue::Gauge(_) => self.series as u64,
            SeriesValue::Rate(r) => r.total,
            SeriesValue::Trend(t) => t.count(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    metrics: Vec<MetricSnapshot>,
}

impl Snapshot {
    pub(crate) fn new(mut metrics: Vec<MetricSnapshot>) -> Self {
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        Self { metrics }
    }

    pub fn metrics(&self) -> &[MetricSnapshot] {
        &self.metrics
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics
            .binary_search_by(|m| m.name.as_str().cmp(name))
            .ok()
            .and_then(|idx| self.metrics.get(idx))
    }

    /// Folds all series of `name` whose tags contain every `selector` pair.
    ///
    /// Counters and rates are summed, trends merged and gauges report the largest value.
    pub fn aggregate(&self, name: &str, selector: &[(String, String)]) -> Option<Aggregate> {
        let metric = self.metric(name)?;
        let mut value = match metric.kind {
            MetricKind::Counter => SeriesValue::Counter(0),
            MetricKind::Gauge => SeriesValue::Gauge(0),
            MetricKind::Rate => SeriesValue::Rate(RateValue::default()),
            MetricKind::Trend => SeriesValue::Trend(TrendValue::default()),
        };

        let mut series = 0usize;
        for s in metric.series.iter().filter(|s| s.matches(selector)) {
            match (&mut value, &s.value) {
                (SeriesValue::Counter(acc), SeriesValue::Counter(v)) => {
                    *acc = acc.saturating_add(*v);
                }
                (SeriesValue::Gauge(acc), SeriesValue::Gauge(v)) => {
                    *acc = if series == 0 { *v } else { (*acc).max(*v) };
                }
                (SeriesValue::Rate(acc), SeriesValue::Rate(v)) => acc.add(*v),
                (SeriesValue::Trend(acc), SeriesValue::Trend(v)) => acc.merge(v),
                _ => continue,
            }
            series += 1;
        }

        Some(Aggregate {
            kind: metric.kind,
            series,
            value,
        })
    }

    pub fn counter_total(&self, name: &str) -> u64 {
        match self.aggregate(name, &[]).map(|a| a.value) {
            Some(SeriesValue::Counter(v)) => v,
            _ => 0,
        }
    }

    /// Counter totals keyed by the value of tag `key`. Series without the tag are skipped.
    pub fn counter_by_tag(&self, name: &str, key: &str) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        let Some(metric) = self.metric(name) else {
            return out;
        };
        for s in &metric.series {
            let (Some(tag), SeriesValue::Counter(v)) = (s.tag(key), &s.value) else {
                continue;
            };
            let slot = out.entry(tag.to_string()).or_insert(0u64);
            *slot = slot.saturating_add(*v);
        }
        out
    }

    /// Rate totals keyed by the value of tag `key`.
    pub fn rate_by_tag(&self, name: &str, key: &str) -> BTreeMap<String, RateValue> {
        let mut out: BTreeMap<String, RateValue> = BTreeMap::new();
        let Some(metric) = self.metric(name) else {
            return out;
        };
        for s in &metric.series {
            let (Some(tag), SeriesValue::Rate(v)) = (s.tag(key), &s.value) else {
                continue;
            };
            out.entry(tag.to_string()).or_default().add(*v);
        }
        out
    }

    pub fn rate(&self, name: &str) -> RateValue {
        match self.aggregate(name, &[]).map(|a| a.value) {
            Some(SeriesValue::Rate(v)) => v,
            _ => RateValue::default(),
        }
    }

    pub fn trend(&self, name: &str) -> Option<TrendValue> {
        match self.aggregate(name, &[])?.value {
            SeriesValue::Trend(t) => Some(t),
            _ => None,
        }
    }

    pub fn gauge(&self, name: &str) -> Option<i64> {
        let agg = self.aggregate(name, &[])?;
        match agg.value {
            SeriesValue::Gauge(v) if agg.series > 0 => Some(v),
            _ => None,
        }
    }
}

#[inline]
pub fn per_sec(delta: u64, dt_secs: f64) -> f64 {
    delta as f64 / dt_secs.max(1e-9)
}
