use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{DEFAULT_ERROR_METRIC, MetricCatalog, MetricDecl};
use crate::schedule::StageSchedule;
use crate::thresholds::{Threshold, ThresholdSet};
use crate::thresholds_eval::resolve_thresholds;
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
const MIN_TICK: Duration = Duration::from_millis(1);
const MAX_TICK: Duration = Duration::from_secs(10);

/// Environment visible to templates (`${env.NAME}`).
pub type EnvVars = Arc<BTreeMap<String, String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

/// Load shape as written in the scenario file.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
    /// Concurrency at t=0 for staged runs.
    pub start_vus: Option<u64>,
    pub stages: Vec<Stage>,
    pub max_vus: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub load: LoadOptions,
    pub base_url: Option<String>,
    pub thresholds: Vec<ThresholdSet>,
    pub metrics: Vec<MetricDecl>,
    /// Rate metric fed by failed checks. Defaults to `errors`.
    pub error_metric: Option<String>,
    pub tick: Option<Duration>,
    pub seed: Option<u64>,
    pub request_timeout: Option<Duration>,
}

/// Command-line overrides. `vus`/`duration` switch a staged scenario to fixed mode.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
    pub max_vus: Option<u64>,
    pub base_url: Option<String>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadShape {
    Fixed { vus: u64, duration: Duration },
    Ramping { start_vus: u64, stages: Vec<Stage> },
}

impl LoadShape {
    pub fn schedule(&self) -> StageSchedule {
        match self {
            Self::Fixed { vus, duration } => StageSchedule::constant(*vus, *duration),
            Self::Ramping { start_vus, stages } => StageSchedule::new(*start_vus, stages.clone()),
        }
    }
}

/// Fully resolved, immutable run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub shape: LoadShape,
    pub schedule: StageSchedule,
    pub max_vus: u64,
    pub base_url: String,
    pub env: EnvVars,
    pub catalog: MetricCatalog,
    pub thresholds: Vec<Threshold>,
    pub tick: Duration,
    pub seed: u64,
    pub request_timeout: Option<Duration>,
}

impl RunConfig {
    pub fn resolve(options: RunOptions, overrides: &RunOverrides, env: EnvVars) -> Result<Self> {
        let shape = resolve_shape(&options.load, overrides)?;
        let schedule = shape.schedule();
        let peak = schedule.peak();

        let max_vus = overrides
            .max_vus
            .or(options.load.max_vus)
            .unwrap_or(peak);
        if max_vus == 0 || max_vus < peak {
            return Err(Error::InvalidMaxVus { max_vus, peak });
        }

        let base_url = resolve_base_url(
            overrides.base_url.as_deref(),
            env.get("BASE_URL").map(String::as_str),
            options.base_url.as_deref(),
        )?;

        let tick = options.tick.unwrap_or(DEFAULT_TICK);
        if !(MIN_TICK..=MAX_TICK).contains(&tick) {
            return Err(Error::InvalidTick(tick));
        }

        let error_metric = options
            .error_metric
            .as_deref()
            .unwrap_or(DEFAULT_ERROR_METRIC);
        let catalog = MetricCatalog::new(&options.metrics, error_metric)?;
        let thresholds = resolve_thresholds(&options.thresholds, |name| catalog.kind_of(name))?;

        Ok(Self {
            shape,
            schedule,
            max_vus,
            base_url,
            env,
            catalog,
            thresholds,
            tick,
            seed: overrides
                .seed
                .or(options.seed)
                .unwrap_or_else(rand::random),
            request_timeout: options.request_timeout,
        })
    }
}

fn resolve_shape(load: &LoadOptions, overrides: &RunOverrides) -> Result<LoadShape> {
    let cli_fixed = overrides.vus.is_some() || overrides.duration.is_some();
    if !cli_fixed && !load.stages.is_empty() {
        if load.vus.is_some() || load.duration.is_some() {
            return Err(Error::ConflictingRunShape);
        }
        let total: Duration = load.stages.iter().map(|s| s.duration).sum();
        let start_vus = load.start_vus.unwrap_or(0);
        let peak = load.stages.iter().map(|s| s.target).max().unwrap_or(0);
        if total.is_zero() || peak.max(start_vus) == 0 {
            return Err(Error::InvalidStages);
        }
        return Ok(LoadShape::Ramping {
            start_vus,
            stages: load.stages.clone(),
        });
    }

    let vus = overrides.vus.or(load.vus).unwrap_or(1);
    if vus == 0 {
        return Err(Error::InvalidVus);
    }
    let duration = overrides
        .duration
        .or(load.duration)
        .ok_or(Error::MissingDuration)?;
    if duration.is_zero() {
        return Err(Error::InvalidDuration);
    }
    Ok(LoadShape::Fixed { vus, duration })
}

fn resolve_base_url(cli: Option<&str>, env: Option<&str>, file: Option<&str>) -> Result<String> {
    let raw = [cli, env, file]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(DEFAULT_BASE_URL);

    let parsed = url::Url::parse(raw).map_err(|e| Error::InvalidBaseUrl {
        url: raw.to_string(),
        error: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidBaseUrl {
            url: raw.to_string(),
            error: format!("unsupported scheme `{}`", parsed.scheme()),
        });
    }
    Ok(raw.trim_end_matches('/').to_string())
}
