use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use volley_core::metrics::SeriesValue;

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _name: &str, _path: &Path, _config: &volley_core::RunConfig) {}

    fn progress(&self) -> Option<volley_core::ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, report: &volley_core::RunReport) -> anyhow::Result<()> {
        let line = build_summary_line(report);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub total_secs: f64,

    pub vus: u64,
    pub target_vus: u64,
    pub max_vus: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<usize>,

    pub requests_per_sec: f64,
    pub iterations_per_sec: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_iterations: u64,
    pub checks_total: u64,
    pub checks_failed: u64,
    pub total_bytes_received: u64,
    pub total_bytes_sent: u64,

    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,

    pub failing_thresholds: Vec<String>,
}

fn build_progress_line(u: &volley_core::ProgressUpdate) -> JsonProgressLine {
    let m = &u.metrics;
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_secs: u.total_duration.as_secs_f64(),

        vus: u.live_vus,
        target_vus: u.target_vus,
        max_vus: u.max_vus,
        stage: u.stage.as_ref().map(|s| s.stage),

        requests_per_sec: m.requests_per_sec_now,
        iterations_per_sec: m.iterations_per_sec_now,
        total_requests: m.requests_total,
        failed_requests: m.failed_requests_total,
        total_iterations: m.iterations_total,
        checks_total: m.checks_total,
        checks_failed: m.checks_failed_total,
        total_bytes_received: m.bytes_received_total,
        total_bytes_sent: m.bytes_sent_total,

        latency_p50_ms: m.latency_p50_ms,
        latency_p95_ms: m.latency_p95_ms,
        latency_p99_ms: m.latency_p99_ms,

        failing_thresholds: u.failing_thresholds.clone(),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub outcome: String,
    pub final_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub elapsed_secs: f64,
    pub seed: u64,

    pub iterations_started: u64,
    pub iterations_completed: u64,
    pub iterations_interrupted: u64,

    pub requests_total: u64,
    pub requests_by_status: BTreeMap<String, u64>,
    pub request_failure_rate: Option<f64>,
    pub check_failure_rate: Option<f64>,

    pub metrics: BTreeMap<String, JsonMetric>,
    pub thresholds: Vec<JsonThreshold>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum JsonMetric {
    Counter {
        value: u64,
    },
    Gauge {
        value: Option<i64>,
    },
    Rate {
        rate: Option<f64>,
        passes: u64,
        total: u64,
    },
    Trend {
        count: u64,
        avg: Option<f64>,
        min: Option<f64>,
        med: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
        max: Option<f64>,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub bound: f64,
    pub observed: Option<f64>,
    pub outcome: &'static str,
    pub abort_on_fail: bool,
}

fn build_summary_line(report: &volley_core::RunReport) -> JsonSummaryLine {
    let metrics = report
        .metrics
        .metrics()
        .iter()
        .filter_map(|m| {
            let agg = report.metrics.aggregate(&m.name, &[])?;
            let value = match agg.value {
                SeriesValue::Counter(value) => JsonMetric::Counter { value },
                SeriesValue::Gauge(value) => JsonMetric::Gauge {
                    value: (agg.series > 0).then_some(value),
                },
                SeriesValue::Rate(r) => JsonMetric::Rate {
                    rate: r.rate(),
                    passes: r.hits,
                    total: r.total,
                },
                SeriesValue::Trend(t) => JsonMetric::Trend {
                    count: t.count(),
                    avg: t.avg(),
                    min: t.min(),
                    med: t.med(),
                    p90: t.percentile(90.0),
                    p95: t.percentile(95.0),
                    p99: t.percentile(99.0),
                    max: t.max(),
                },
            };
            Some((m.name.clone(), value))
        })
        .collect();

    let thresholds = report
        .thresholds
        .iter()
        .map(|t| JsonThreshold {
            metric: t.metric.clone(),
            expression: t.expression.clone(),
            bound: t.bound,
            observed: t.observed,
            outcome: match t.outcome {
                volley_core::ThresholdOutcome::Passed => "passed",
                volley_core::ThresholdOutcome::Failed => "failed",
                volley_core::ThresholdOutcome::Inconclusive => "inconclusive",
            },
            abort_on_fail: t.abort_on_fail,
        })
        .collect();

    JsonSummaryLine {
        kind: "summary",
        outcome: report.outcome.to_string(),
        final_state: report.final_state.to_string(),
        abort_reason: report.abort_reason.as_ref().map(ToString::to_string),
        elapsed_secs: report.elapsed.as_secs_f64(),
        seed: report.seed,

        iterations_started: report.iterations.started,
        iterations_completed: report.iterations.completed,
        iterations_interrupted: report.iterations.interrupted(),

        requests_total: report.requests_total(),
        requests_by_status: report.requests_by_status(),
        request_failure_rate: report.request_failure_rate(),
        check_failure_rate: report.check_failure_rate(),

        metrics,
        thresholds,
        teardown_error: report.teardown_error.clone(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;

    #[test]
    fn progress_line_has_kind() {
        let update = volley_core::ProgressUpdate {
            tick: 3,
            elapsed: Duration::from_secs(3),
            total_duration: Duration::from_secs(10),
            live_vus: 4,
            target_vus: 5,
            max_vus: 10,
            stage: None,
            metrics: volley_core::LiveMetrics {
                requests_total: 120,
                failed_requests_total: 2,
                ..volley_core::LiveMetrics::default()
            },
            failing_thresholds: vec!["http_req_failed: rate<0.01".to_string()],
        };

        let v: Value = match serde_json::to_value(build_progress_line(&update)) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("progress"));
        assert_eq!(v.get("vus").and_then(Value::as_u64), Some(4));
        assert_eq!(v.get("failed_requests").and_then(Value::as_u64), Some(2));
        assert!(v.get("stage").is_none());
        assert_eq!(
            v.pointer("/failing_thresholds/0").and_then(Value::as_str),
            Some("http_req_failed: rate<0.01")
        );
    }

    #[test]
    fn metric_variants_are_tagged() {
        let v = match serde_json::to_value(JsonMetric::Rate {
            rate: Some(0.5),
            passes: 1,
            total: 2,
        }) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };
        assert_eq!(v.get("type").and_then(Value::as_str), Some("rate"));
        assert_eq!(v.get("total").and_then(Value::as_u64), Some(2));
    }
}
