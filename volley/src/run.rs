use std::sync::Arc;

use anyhow::Context as _;

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::run_support::merged_env;
use crate::scenario_yaml::load_scenario;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let loaded = load_scenario(&args.scenario)
        .await
        .map_err(RunError::invalid_input)?;
    let env = merged_env(&args.env).map_err(RunError::invalid_input)?;

    let config = volley_core::RunConfig::resolve(loaded.options, &args.overrides(), env)
        .map_err(|err| RunError::from_core("invalid run configuration", err))?;

    tracing::debug!(
        scenario = %loaded.name,
        max_vus = config.max_vus,
        seed = config.seed,
        "starting run"
    );
    out.print_header(&loaded.name, &args.scenario, &config);

    let transport = Arc::new(volley_core::HttpClient::default());
    let mut controller = volley_core::RunController::new(config, loaded.scenario, transport);
    if let Some(progress) = out.progress() {
        controller = controller.with_progress(progress);
    }

    let cancel = controller.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, draining in-flight iterations");
            cancel.cancel();
        }
    });

    let result = controller.run().await;
    interrupt.abort();

    let report = result.map_err(|err| RunError::from_core("run failed", err))?;

    out.print_summary(&report)
        .context("failed to print summary")
        .map_err(RunError::runtime)?;

    Ok(ExitCode::from_report(&report))
}
