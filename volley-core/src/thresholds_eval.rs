use std::time::Duration;

use volley_metrics::{MetricKind, SeriesValue, Snapshot};

use crate::thresholds::{
    Threshold, ThresholdAgg, ThresholdOp, ThresholdSet, parse_threshold_expr, parse_threshold_key,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ThresholdOutcome {
    Passed,
    Failed,
    /// The metric had no samples. Never counts as a failure.
    Inconclusive,
}

#[derive(Debug, Clone)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub op: ThresholdOp,
    pub bound: f64,
    pub observed: Option<f64>,
    pub outcome: ThresholdOutcome,
    pub abort_on_fail: bool,
}

impl ThresholdResult {
    pub fn failed(&self) -> bool {
        self.outcome == ThresholdOutcome::Failed
    }
}

/// Parses every threshold set and checks it against the known metric catalog.
pub fn resolve_thresholds(
    sets: &[ThresholdSet],
    kind_of: impl Fn(&str) -> Option<MetricKind>,
) -> Result<Vec<Threshold>> {
    let mut out = Vec::new();
    for set in sets {
        let (metric, selector) =
            parse_threshold_key(&set.metric).map_err(|error| Error::InvalidThresholdExpr {
                metric: set.metric.clone(),
                error,
            })?;
        let kind = kind_of(&metric).ok_or_else(|| Error::UnknownThresholdMetric(metric.clone()))?;

        for entry in &set.entries {
            let expr = parse_threshold_expr(&entry.expression).map_err(|error| {
                Error::InvalidThresholdExpr {
                    metric: set.metric.clone(),
                    error,
                }
            })?;
            if !supports(kind, expr.agg) {
                return Err(Error::ThresholdAggregateMismatch {
                    metric: set.metric.clone(),
                    kind,
                    expression: entry.expression.clone(),
                });
            }

            out.push(Threshold {
                key: set.metric.trim().to_string(),
                metric: metric.clone(),
                selector: selector.clone(),
                source: entry.expression.clone(),
                expr,
                abort_on_fail: entry.abort_on_fail,
                delay_abort_eval: entry.delay_abort_eval.unwrap_or(Duration::ZERO),
            });
        }
    }
    Ok(out)
}

fn supports(kind: MetricKind, agg: ThresholdAgg) -> bool {
    match kind {
        MetricKind::Counter => matches!(agg, ThresholdAgg::Count | ThresholdAgg::Rate),
        MetricKind::Gauge => matches!(
            agg,
            ThresholdAgg::Value | ThresholdAgg::Min | ThresholdAgg::Max
        ),
        MetricKind::Rate => matches!(agg, ThresholdAgg::Rate | ThresholdAgg::Count),
        MetricKind::Trend => !matches!(agg, ThresholdAgg::Rate | ThresholdAgg::Value),
    }
}

/// Evaluates `thresholds` against one snapshot. `elapsed` is the running time, used for
/// per-second counter rates.
pub fn evaluate_thresholds<'a>(
    snapshot: &Snapshot,
    thresholds: impl IntoIterator<Item = &'a Threshold>,
    elapsed: Duration,
) -> Vec<ThresholdResult> {
    thresholds
        .into_iter()
        .map(|t| {
            let observed = observed_value(snapshot, t, elapsed);
            let outcome = match observed {
                None => ThresholdOutcome::Inconclusive,
                Some(v) if t.expr.op.compare(v, t.expr.value) => ThresholdOutcome::Passed,
                Some(_) => ThresholdOutcome::Failed,
            };
            ThresholdResult {
                metric: t.key.clone(),
                expression: t.source.clone(),
                op: t.expr.op,
                bound: t.expr.value,
                observed,
                outcome,
                abort_on_fail: t.abort_on_fail,
            }
        })
        .collect()
}

/// `None` when the metric has no samples under the selector.
fn observed_value(snapshot: &Snapshot, t: &Threshold, elapsed: Duration) -> Option<f64> {
    let agg = snapshot.aggregate(&t.metric, &t.selector)?;
    if agg.samples() == 0 {
        return None;
    }

    match (&agg.value, t.expr.agg) {
        (SeriesValue::Counter(v), ThresholdAgg::Count) => Some(*v as f64),
        (SeriesValue::Counter(v), ThresholdAgg::Rate) => {
            Some(volley_metrics::per_sec(*v, elapsed.as_secs_f64()))
        }
        (SeriesValue::Gauge(v), _) => Some(*v as f64),
        (SeriesValue::Rate(r), ThresholdAgg::Rate) => r.rate(),
        (SeriesValue::Rate(r), ThresholdAgg::Count) => Some(r.total as f64),
        (SeriesValue::Trend(tr), agg) => match agg {
            ThresholdAgg::Avg => tr.avg(),
            ThresholdAgg::Min => tr.min(),
            ThresholdAgg::Max => tr.max(),
            ThresholdAgg::Med => tr.med(),
            ThresholdAgg::Count => Some(tr.count() as f64),
            ThresholdAgg::P(p) => tr.percentile(p),
            ThresholdAgg::Rate | ThresholdAgg::Value => None,
        },
        _ => None,
    }
}
