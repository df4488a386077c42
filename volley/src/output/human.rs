use std::path::Path;
use std::sync::Arc;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_ms_opt, format_rate};
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

fn describe_load(config: &volley_core::RunConfig) -> String {
    match &config.shape {
        volley_core::LoadShape::Fixed { vus, duration } => {
            format!("{vus} VUs for {}", format_duration(*duration))
        }
        volley_core::LoadShape::Ramping { start_vus, stages } => format!(
            "{} stages over {} (start {start_vus}, peak {} VUs)",
            stages.len(),
            format_duration(config.schedule.total_duration()),
            config.schedule.peak()
        ),
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, name: &str, path: &Path, config: &volley_core::RunConfig) {
        println!("scenario: {name} ({})", path.display());
        println!("load: {} max_vus={}", describe_load(config), config.max_vus);
        println!("base_url: {}", config.base_url);
        println!("seed: {}", config.seed);
        if !config.thresholds.is_empty() {
            println!("thresholds: {}", config.thresholds.len());
        }
        println!();
    }

    fn progress(&self) -> Option<volley_core::ProgressFn> {
        let progress = self.progress.clone();

        Some(Arc::new(move |u| {
            let m = &u.metrics;
            let mut message = format!(
                "vus={}/{} elapsed={} rps={} iters/s={} failed={}/{} p95={}",
                u.live_vus,
                u.target_vus,
                format_duration(u.elapsed),
                format_rate(m.requests_per_sec_now),
                format_rate(m.iterations_per_sec_now),
                m.failed_requests_total,
                m.requests_total,
                format_ms_opt(m.latency_p95_ms),
            );
            let prefix = match &u.stage {
                Some(stage) => {
                    message.push_str(&format!(
                        " stage_remaining={}",
                        format_duration(stage.stage_remaining)
                    ));
                    format!("stage {}/{}", stage.stage, stage.stages)
                }
                None => "running".to_string(),
            };
            if !u.failing_thresholds.is_empty() {
                message.push_str(&format!(" ✗{}", u.failing_thresholds.len()));
            }

            progress.update(&prefix, u.total_duration, u.elapsed, message);
        }))
    }

    fn print_summary(&self, report: &volley_core::RunReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report));

        if let Some(err) = &report.teardown_error {
            eprintln!("teardown failed: {err}");
        }
        let breached: Vec<_> = report.breached().collect();
        if !breached.is_empty() {
            eprintln!("thresholds failed: {}", breached.len());
        }

        Ok(())
    }
}
