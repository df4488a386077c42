use std::collections::BTreeMap;
use std::fmt::Write as _;

use volley_core::metrics::{MetricKind, RateValue, SeriesValue, TrendValue};
use volley_core::{
    CHECKS, DATA_RECEIVED, DATA_SENT, RunReport, ThresholdOutcome, ThresholdResult,
};

use super::format::*;

const NAME_WIDTH: usize = 24;

pub(crate) fn render(report: &RunReport) -> String {
    let mut out = String::new();

    render_overview(report, &mut out);
    render_checks(report, &mut out);
    render_metrics(report, &mut out);
    render_thresholds(&report.thresholds, &mut out);

    out
}

fn render_overview(report: &RunReport, out: &mut String) {
    out.push_str("summary\n");

    match &report.abort_reason {
        Some(reason) => writeln!(
            out,
            "  outcome: {} ({}): {reason}",
            report.outcome, report.final_state
        ),
        None => writeln!(out, "  outcome: {} ({})", report.outcome, report.final_state),
    }
    .ok();
    writeln!(
        out,
        "  elapsed: {} seed: {}",
        format_duration(report.elapsed),
        report.seed
    )
    .ok();
    writeln!(
        out,
        "  iterations: {} (interrupted {})",
        report.iterations.completed,
        report.iterations.interrupted()
    )
    .ok();

    let requests = report.requests_total();
    writeln!(out, "  requests: {requests}").ok();
    for (status, count) in report.requests_by_status() {
        let label = if status == "0" { "error" } else { status.as_str() };
        writeln!(out, "    status {label}: {count}").ok();
    }

    let failed = report.metrics.rate(volley_core::HTTP_REQ_FAILED);
    writeln!(
        out,
        "  request failure rate: {} ({}/{})",
        format_pct(report.request_failure_rate()),
        failed.hits,
        failed.total
    )
    .ok();

    let checks = report.metrics.rate(CHECKS);
    writeln!(
        out,
        "  check failure rate: {} ({}/{})",
        format_pct(report.check_failure_rate()),
        checks.misses(),
        checks.total
    )
    .ok();

    if let Some(err) = &report.teardown_error {
        writeln!(out, "  teardown: failed: {err}").ok();
    }
}

fn render_checks(report: &RunReport, out: &mut String) {
    let Some(metric) = report.metrics.metric(CHECKS) else {
        return;
    };

    // group -> check -> counts
    let mut by_group: BTreeMap<&str, BTreeMap<&str, RateValue>> = BTreeMap::new();
    for s in &metric.series {
        let SeriesValue::Rate(v) = &s.value else {
            continue;
        };
        let group = s.tag("group").unwrap_or("-");
        let check = s.tag("check").unwrap_or("?");
        let slot = by_group.entry(group).or_default().entry(check).or_default();
        slot.hits = slot.hits.saturating_add(v.hits);
        slot.total = slot.total.saturating_add(v.total);
    }

    if by_group.is_empty() {
        return;
    }

    out.push_str("\nchecks\n");
    for (group, checks) in by_group {
        writeln!(out, "  group: {group}").ok();
        for (name, v) in checks {
            let status = if v.misses() > 0 { "FAIL" } else { "OK" };
            writeln!(
                out,
                "    {name}: pass={} fail={} [{status}]",
                v.hits,
                v.misses()
            )
            .ok();
        }
    }
}

fn render_metrics(report: &RunReport, out: &mut String) {
    let metrics = report.metrics.metrics();
    if metrics.is_empty() {
        return;
    }

    out.push_str("\nmetrics\n");
    for m in metrics {
        let Some(agg) = report.metrics.aggregate(&m.name, &[]) else {
            continue;
        };
        let value = match (&agg.value, m.kind) {
            (SeriesValue::Counter(v), _) if m.name == DATA_RECEIVED || m.name == DATA_SENT => {
                format_bytes(*v)
            }
            (SeriesValue::Counter(v), _) => {
                let per_sec = *v as f64 / report.elapsed.as_secs_f64().max(1e-9);
                format!("{v} {}/s", format_rate(per_sec))
            }
            (SeriesValue::Gauge(_), _) if agg.series == 0 => "-".to_string(),
            (SeriesValue::Gauge(v), _) => v.to_string(),
            (SeriesValue::Rate(r), _) => {
                format!("{} {}/{}", format_pct(r.rate()), r.hits, r.total)
            }
            (SeriesValue::Trend(t), MetricKind::Trend) => render_trend(&m.name, t),
            _ => continue,
        };
        writeln!(out, "  {:.<width$}: {value}", m.name, width = NAME_WIDTH).ok();
    }
}

fn render_trend(name: &str, t: &TrendValue) -> String {
    if t.is_empty() {
        return "no samples".to_string();
    }

    let fmt: fn(Option<f64>) -> String = if name.ends_with("_duration") {
        format_ms_opt
    } else {
        |v| v.map_or_else(|| "-".to_string(), format_number)
    };

    format!(
        "avg={} min={} med={} p90={} p95={} p99={} max={} (n={})",
        fmt(t.avg()),
        fmt(t.min()),
        fmt(t.med()),
        fmt(t.percentile(90.0)),
        fmt(t.percentile(95.0)),
        fmt(t.percentile(99.0)),
        fmt(t.max()),
        t.count()
    )
}

fn render_thresholds(results: &[ThresholdResult], out: &mut String) {
    if results.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for t in results {
        let mark = match t.outcome {
            ThresholdOutcome::Passed => "✓",
            ThresholdOutcome::Failed => "✗",
            ThresholdOutcome::Inconclusive => "?",
        };
        let observed = match t.observed {
            Some(v) => format!("observed {}", format_number(v)),
            None => "no samples".to_string(),
        };
        let abort = if t.abort_on_fail { " [abort]" } else { "" };
        writeln!(out, "  {mark} {}: {} ({observed}){abort}", t.metric, t.expression).ok();
    }

    let breached: Vec<_> = results.iter().filter(|t| t.failed()).collect();
    if breached.is_empty() {
        return;
    }
    out.push_str("\nbreached thresholds\n");
    for t in breached {
        writeln!(
            out,
            "  {}: {} bound={} observed={}",
            t.metric,
            t.expression,
            format_number(t.bound),
            t.observed.map_or_else(|| "-".to_string(), format_number)
        )
        .ok();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use volley_core::metrics::{Registry, Sample};
    use volley_core::{
        AbortReason, HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS, IterationCounts, RunOutcome,
        RunState, ThresholdOp,
    };

    use super::*;

    fn sample_report() -> RunReport {
        let registry = Arc::new(Registry::default());
        let reqs = registry
            .register(HTTP_REQS, MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        let failed = registry
            .register(HTTP_REQ_FAILED, MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        let duration = registry
            .register(HTTP_REQ_DURATION, MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));
        let checks = registry
            .register(CHECKS, MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));

        let ok = registry.tags(&[("status", "200")]);
        let err = registry.tags(&[("status", "500")]);
        for _ in 0..9 {
            registry
                .record_series(reqs, &ok, Sample::Counter(1))
                .unwrap_or_else(|e| panic!("{e}"));
            registry
                .record_series(failed, &ok, Sample::Rate(false))
                .unwrap_or_else(|e| panic!("{e}"));
            registry
                .record_series(duration, &ok, Sample::Trend(12.0))
                .unwrap_or_else(|e| panic!("{e}"));
        }
        registry
            .record_series(reqs, &err, Sample::Counter(1))
            .unwrap_or_else(|e| panic!("{e}"));
        registry
            .record_series(failed, &err, Sample::Rate(true))
            .unwrap_or_else(|e| panic!("{e}"));

        let check_tags = registry.tags(&[("check", "add: status 201"), ("group", "Add Book")]);
        registry
            .record_series(checks, &check_tags, Sample::Rate(true))
            .unwrap_or_else(|e| panic!("{e}"));
        registry
            .record_series(checks, &check_tags, Sample::Rate(false))
            .unwrap_or_else(|e| panic!("{e}"));

        RunReport {
            outcome: RunOutcome::ThresholdsFailed,
            final_state: RunState::Completed,
            abort_reason: None,
            elapsed: Duration::from_secs(10),
            seed: 42,
            metrics: registry.snapshot(),
            thresholds: vec![
                ThresholdResult {
                    metric: HTTP_REQ_FAILED.to_string(),
                    expression: "rate<0.01".to_string(),
                    op: ThresholdOp::Lt,
                    bound: 0.01,
                    observed: Some(0.1),
                    outcome: ThresholdOutcome::Failed,
                    abort_on_fail: false,
                },
                ThresholdResult {
                    metric: "get_book_duration".to_string(),
                    expression: "p(95)<100".to_string(),
                    op: ThresholdOp::Lt,
                    bound: 100.0,
                    observed: None,
                    outcome: ThresholdOutcome::Inconclusive,
                    abort_on_fail: false,
                },
            ],
            iterations: IterationCounts {
                started: 10,
                completed: 10,
            },
            teardown_error: None,
        }
    }

    #[test]
    fn summary_separates_request_and_check_failure_rates() {
        let out = render(&sample_report());
        assert!(out.contains("request failure rate: 10.00% (1/10)"), "{out}");
        assert!(out.contains("check failure rate: 50.00% (1/2)"), "{out}");
        assert!(out.contains("status 200: 9"), "{out}");
        assert!(out.contains("status 500: 1"), "{out}");
        assert!(out.contains("add: status 201: pass=1 fail=1 [FAIL]"), "{out}");
    }

    #[test]
    fn summary_lists_thresholds_and_breaches() {
        let out = render(&sample_report());
        assert!(out.contains("✗ http_req_failed: rate<0.01 (observed 0.1)"), "{out}");
        assert!(out.contains("? get_book_duration: p(95)<100 (no samples)"), "{out}");
        assert!(
            out.contains("http_req_failed: rate<0.01 bound=0.01 observed=0.1"),
            "{out}"
        );
    }

    #[test]
    fn summary_shows_abort_reason_and_teardown_error() {
        let mut report = sample_report();
        report.outcome = RunOutcome::Aborted;
        report.final_state = RunState::Aborted;
        report.abort_reason = Some(AbortReason::ThresholdBreached {
            metric: "errors".to_string(),
            expression: "rate<0.1".to_string(),
            observed: Some(0.5),
        });
        report.teardown_error = Some("cleanup returned 500".to_string());

        let out = render(&report);
        assert!(
            out.contains("outcome: aborted (aborted): threshold `errors: rate<0.1` breached"),
            "{out}"
        );
        assert!(out.contains("teardown: failed: cleanup returned 500"), "{out}");
    }

    #[test]
    fn trend_rows_use_milliseconds() {
        let out = render(&sample_report());
        assert!(out.contains("avg=12.00ms"), "{out}");
        assert!(out.contains("(n=9)"), "{out}");
    }
}
