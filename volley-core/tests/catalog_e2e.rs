mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use volley_core::metrics::MetricKind;
use volley_core::{
    EnvVars, HttpClient, MetricDecl, RunConfig, RunController, RunOutcome, RunOverrides,
    ThresholdEntry, ThresholdSet,
};
use volley_testserver::TestServer;

fn options(base_url: &str) -> volley_core::RunOptions {
    let mut options = support::fixed(3, Duration::from_millis(800));
    options.base_url = Some(base_url.to_string());
    options.metrics = vec![
        MetricDecl::new("add_book_duration", MetricKind::Trend),
        MetricDecl::new("get_book_duration", MetricKind::Trend),
    ];
    options.thresholds = vec![
        ThresholdSet {
            metric: "http_req_failed".to_string(),
            entries: vec![ThresholdEntry::new("rate<0.01")],
        },
        ThresholdSet {
            metric: "http_req_duration{group=Get Book}".to_string(),
            entries: vec![ThresholdEntry::new("p(95)<1000")],
        },
    ];
    options
}

fn config(options: volley_core::RunOptions) -> RunConfig {
    RunConfig::resolve(options, &RunOverrides::default(), EnvVars::new(BTreeMap::new()))
        .unwrap_or_else(|e| panic!("config: {e}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn catalog_scenario_against_live_server() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let report = RunController::new(
        config(options(server.base_url())),
        support::catalog_scenario(),
        Arc::new(HttpClient::default()),
    )
    .run()
    .await?;

    anyhow::ensure!(report.outcome == RunOutcome::Passed, "{:?}", report.thresholds);
    anyhow::ensure!(report.request_failure_rate() == Some(0.0));
    anyhow::ensure!(report.check_failure_rate() == Some(0.0));
    anyhow::ensure!(report.iterations.interrupted() == 0);

    let created = server.stats().books_created();
    let gets = report
        .metrics
        .trend("get_book_duration")
        .map(|t| t.count())
        .unwrap_or_default();
    anyhow::ensure!(created > 0 && gets == created, "{created} created, {gets} fetched");

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_creates_skip_dependent_fetches() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    server.library().set_fail_creates(true);

    let report = RunController::new(
        config(options(server.base_url())),
        support::catalog_scenario(),
        Arc::new(HttpClient::default()),
    )
    .run()
    .await?;

    anyhow::ensure!(report.outcome == RunOutcome::ThresholdsFailed);
    anyhow::ensure!(report.breached().any(|t| t.metric == "http_req_failed"));
    anyhow::ensure!(
        report
            .metrics
            .trend("get_book_duration")
            .is_some_and(|t| t.count() == 0)
    );
    anyhow::ensure!(report.requests_by_status().contains_key("500"));
    anyhow::ensure!(server.library().is_empty());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_setup_target_fails_setup() -> anyhow::Result<()> {
    // Bind then drop so the port is very likely closed.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let mut reachable = support::get("/api/v1/books");
    reachable.checks = vec![volley_core::scenario::Check::new(
        volley_core::scenario::CheckKind::Status(200),
    )];
    let scenario = volley_core::scenario::Scenario {
        setup: vec![support::step(reachable)],
        ..support::catalog_scenario()
    };

    let report = RunController::new(
        config(options(&format!("http://{addr}"))),
        scenario,
        Arc::new(HttpClient::default()),
    )
    .run()
    .await?;

    anyhow::ensure!(report.outcome == RunOutcome::SetupFailed);
    anyhow::ensure!(report.requests_total() == 0);
    Ok(())
}
