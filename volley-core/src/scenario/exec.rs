use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use volley_http::HttpRequest;
use volley_metrics::{Batch, MetricId, MetricKind, Registry, Sample};

use super::check::{ResponseView, capture_text};
use super::template::{TemplateCtx, Vars, render, render_json};
use super::{Body, OnCheckFail, Pacing, RequestStep, Scenario, Step, Target};
use crate::config::{EnvVars, RunConfig};
use crate::iteration_metrics::IterationMetricIds;
use crate::request_metrics::{RequestMetricIds, RequestSample};
use crate::transport::Transport;
use crate::{Error, Result};

const GROUP_SEPARATOR: &str = "::";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    /// Request name tag.
    pub step: String,
    pub detail: String,
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.step, self.detail)
    }
}

/// Tally of one pass over a step list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationOutcome {
    pub requests: u32,
    pub failed_requests: u32,
    pub checks: u32,
    pub failed_checks: u32,
    /// Conditional steps whose variable was missing.
    pub skipped: u32,
    /// A failed check ended the iteration before its last step.
    pub ended_early: bool,
    pub first_failure: Option<StepFailure>,
}

impl IterationOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed_requests == 0 && self.failed_checks == 0
    }

    fn fail(&mut self, step: &str, detail: String) {
        if self.first_failure.is_none() {
            self.first_failure = Some(StepFailure {
                step: step.to_string(),
                detail,
            });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    EndIteration,
}

type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<Flow>> + Send + 'a>>;

struct Iteration<'b> {
    vu: u64,
    iter: u64,
    vars: Vars,
    rng: StdRng,
    group: String,
    batch: &'b mut Batch,
    outcome: IterationOutcome,
}

impl Iteration<'_> {
    fn has_var(&self, var: &str) -> bool {
        self.vars.get(var).is_some_and(|v| !v.is_empty())
    }
}

/// Interprets a [`Scenario`] against a [`Transport`], recording into the registry.
///
/// One runtime is shared by every VU; all per-iteration state lives on the stack of
/// [`ScenarioRuntime::run_iteration`].
#[derive(Debug)]
pub struct ScenarioRuntime<T> {
    transport: Arc<T>,
    scenario: Arc<Scenario>,
    registry: Arc<Registry>,
    base_url: String,
    env: EnvVars,
    seed: u64,
    request_timeout: Option<Duration>,
    request_ids: RequestMetricIds,
    iteration_ids: IterationMetricIds,
    error_metric: MetricId,
    custom: AHashMap<String, (MetricId, MetricKind)>,
    initial_vars: Vars,
}

impl<T: Transport> ScenarioRuntime<T> {
    pub fn new(
        scenario: Arc<Scenario>,
        config: &RunConfig,
        registry: Arc<Registry>,
        transport: Arc<T>,
    ) -> Result<Self> {
        scenario.validate(&config.catalog)?;
        config.catalog.register_all(&registry)?;

        let mut custom = AHashMap::new();
        for (name, kind) in config.catalog.iter() {
            let id = registry.register(name, kind)?;
            custom.insert(name.to_string(), (id, kind));
        }
        let error_metric = registry.register(config.catalog.error_metric(), MetricKind::Rate)?;

        Ok(Self {
            request_ids: RequestMetricIds::register(&registry)?,
            iteration_ids: IterationMetricIds::register(&registry)?,
            transport,
            scenario,
            registry,
            base_url: config.base_url.clone(),
            env: config.env.clone(),
            seed: config.seed,
            request_timeout: config.request_timeout,
            error_metric,
            custom,
            initial_vars: Vars::default(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn iteration_ids(&self) -> &IterationMetricIds {
        &self.iteration_ids
    }

    /// Variables every iteration starts from. Usually what setup captured.
    pub fn set_initial_vars(&mut self, vars: Vars) {
        self.initial_vars = vars;
    }

    /// Runs the setup steps as VU 0. Returns the variables they captured.
    pub async fn run_setup(&self) -> Result<Vars> {
        let mut batch = Batch::new(self.registry.clone());
        let (vars, outcome) = self
            .run_once(&self.scenario.setup, &mut batch, self.initial_vars.clone())
            .await?;
        if outcome.is_clean() {
            return Ok(vars);
        }
        Err(Error::SetupFailure(failure_detail(outcome)))
    }

    pub async fn run_teardown(&self) -> Result<()> {
        let mut batch = Batch::new(self.registry.clone());
        let (_, outcome) = self
            .run_once(&self.scenario.teardown, &mut batch, self.initial_vars.clone())
            .await?;
        if outcome.is_clean() {
            return Ok(());
        }
        Err(Error::TeardownFailure(failure_detail(outcome)))
    }

    async fn run_once(
        &self,
        steps: &[Step],
        batch: &mut Batch,
        vars: Vars,
    ) -> Result<(Vars, IterationOutcome)> {
        let mut it = Iteration {
            vu: 0,
            iter: 0,
            vars,
            rng: StdRng::seed_from_u64(iteration_seed(self.seed, 0, 0)),
            group: String::new(),
            batch,
            outcome: IterationOutcome::default(),
        };
        self.run_steps(steps, &mut it).await?;
        it.batch.flush()?;
        Ok((it.vars, it.outcome))
    }

    /// One full pass over the scenario steps. Samples are buffered in `batch`; the caller
    /// flushes it.
    pub async fn run_iteration(
        &self,
        vu: u64,
        iter: u64,
        batch: &mut Batch,
    ) -> Result<IterationOutcome> {
        let started = Instant::now();
        let mut it = Iteration {
            vu,
            iter,
            vars: self.initial_vars.clone(),
            rng: StdRng::seed_from_u64(iteration_seed(self.seed, vu, iter)),
            group: String::new(),
            batch,
            outcome: IterationOutcome::default(),
        };

        if self.run_steps(&self.scenario.steps, &mut it).await? == Flow::EndIteration {
            it.outcome.ended_early = true;
            tracing::trace!(vu, iter, "iteration ended after a failed check");
        }
        self.iteration_ids
            .record_iteration(it.batch, started.elapsed())?;
        Ok(it.outcome)
    }

    fn run_steps<'s>(&'s self, steps: &'s [Step], it: &'s mut Iteration<'_>) -> StepFuture<'s> {
        Box::pin(async move {
            for step in steps {
                if self.run_step(step, it).await? == Flow::EndIteration {
                    return Ok(Flow::EndIteration);
                }
            }
            Ok(Flow::Continue)
        })
    }

    fn run_step<'s>(&'s self, step: &'s Step, it: &'s mut Iteration<'_>) -> StepFuture<'s> {
        Box::pin(async move {
            match step {
                Step::Group(group) => {
                    if let Some(var) = &group.when
                        && !it.has_var(var)
                    {
                        it.outcome.skipped += 1;
                        return Ok(Flow::Continue);
                    }

                    let outer_len = it.group.len();
                    if !it.group.is_empty() {
                        it.group.push_str(GROUP_SEPARATOR);
                    }
                    it.group.push_str(&group.name);
                    let flow = self.run_steps(&group.steps, it).await;
                    it.group.truncate(outer_len);
                    flow
                }
                Step::Request(req) => self.run_request(req, it).await,
                Step::Sleep(pacing) => {
                    let pause = match *pacing {
                        Pacing::Fixed(d) => d,
                        Pacing::Uniform { min, max } if min < max => it.rng.gen_range(min..=max),
                        Pacing::Uniform { min, .. } => min,
                    };
                    if !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                    Ok(Flow::Continue)
                }
                Step::Choose(branches) => {
                    let total: u64 = branches.iter().map(|b| u64::from(b.weight)).sum();
                    if total == 0 {
                        return Ok(Flow::Continue);
                    }
                    let mut pick = it.rng.gen_range(0..total);
                    for branch in branches {
                        let weight = u64::from(branch.weight);
                        if pick < weight {
                            return self.run_steps(&branch.steps, it).await;
                        }
                        pick -= weight;
                    }
                    Ok(Flow::Continue)
                }
                Step::Add(add) => {
                    let Some(&(id, kind)) = self.custom.get(&add.metric) else {
                        return Err(Error::InvalidScenario(format!(
                            "add targets undeclared metric `{}`",
                            add.metric
                        )));
                    };
                    let sample = match kind {
                        MetricKind::Counter => Sample::Counter(add.value as u64),
                        MetricKind::Trend => Sample::Trend(add.value),
                        MetricKind::Rate => Sample::Rate(add.value != 0.0),
                        MetricKind::Gauge => Sample::Gauge(add.value as i64),
                    };
                    let tags = self.group_tags(&it.group, &[]);
                    it.batch.push(id, tags, sample)?;
                    Ok(Flow::Continue)
                }
            }
        })
    }

    fn group_tags(&self, group: &str, extra: &[(&str, &str)]) -> volley_metrics::TagSet {
        let mut pairs: Vec<(&str, &str)> = extra.to_vec();
        if !group.is_empty() {
            pairs.push(("group", group));
        }
        self.registry.tags(&pairs)
    }

    fn build_request(&self, req: &RequestStep, ctx: &TemplateCtx<'_>) -> HttpRequest {
        let url = match &req.target {
            Target::Url(url) => render(url, ctx),
            Target::Path(path) => {
                let path = render(path, ctx);
                if path.starts_with('/') {
                    format!("{}{path}", self.base_url)
                } else {
                    format!("{}/{path}", self.base_url)
                }
            }
        };

        let mut out = HttpRequest::new(req.method.clone(), url)
            .with_timeout(req.timeout.or(self.request_timeout));
        for (name, value) in &req.headers {
            out = out.with_header(name.clone(), render(value, ctx));
        }

        match &req.body {
            Some(Body::Json(doc)) => {
                let body = render_json(doc, ctx).to_string();
                if !req
                    .headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                {
                    out = out.with_header("content-type", "application/json");
                }
                out.with_body(Bytes::from(body))
            }
            Some(Body::Raw(raw)) => out.with_body(Bytes::from(render(raw, ctx))),
            None => out,
        }
    }

    async fn run_request(&self, req: &RequestStep, it: &mut Iteration<'_>) -> Result<Flow> {
        if let Some(var) = &req.when
            && !it.has_var(var)
        {
            it.outcome.skipped += 1;
            return Ok(Flow::Continue);
        }

        let request = {
            let ctx = TemplateCtx {
                vu: it.vu,
                iter: it.iter,
                base_url: &self.base_url,
                env: &self.env,
                vars: &it.vars,
            };
            self.build_request(req, &ctx)
        };
        let bytes_sent = request.body.len() as u64;
        let method = req.method.as_str();
        let name = req.name_tag();

        let exchange = self.transport.send(request).await;

        let (status, body, duration) = match &exchange {
            Ok(resp) => (resp.status, resp.body.as_ref(), Some(resp.elapsed)),
            Err(_) => (0, &[][..], None),
        };
        let failed = exchange.is_err() || !req.is_expected(status);

        self.request_ids.record_request(
            it.batch,
            RequestSample {
                method,
                name,
                group: &it.group,
                status,
                failed,
                duration,
                bytes_received: body.len() as u64,
                bytes_sent,
            },
        )?;
        if let (Some(trend), Some(d)) = (&req.trend, duration)
            && let Some(&(id, _)) = self.custom.get(trend)
        {
            let tags = self.group_tags(&it.group, &[("name", name)]);
            it.batch
                .push(id, tags, Sample::Trend(d.as_secs_f64() * 1000.0))?;
        }

        it.outcome.requests += 1;
        if failed {
            it.outcome.failed_requests += 1;
            let detail = match &exchange {
                Ok(_) => format!("{method} returned status {status}"),
                Err(err) => format!("{method} failed: {err}"),
            };
            it.outcome.fail(name, detail);
        }

        let view = ResponseView::new(status, body, duration);
        for capture in &req.captures {
            let wanted = match capture.when_status {
                Some(code) => status == code,
                None => !failed,
            };
            if wanted && let Some(text) = view.json_at(&capture.path).and_then(capture_text) {
                it.vars.insert(capture.var.clone(), text);
            }
        }

        let mut any_failed = false;
        if req.checks.is_empty() && failed {
            // A failed exchange counts as a failed check even without declared checks.
            let check = format!("{name}: request ok");
            self.request_ids
                .record_check(it.batch, &it.group, &check, false)?;
            it.outcome.checks += 1;
            it.outcome.failed_checks += 1;
            any_failed = true;
        }
        for check in &req.checks {
            let passed = {
                let ctx = TemplateCtx {
                    vu: it.vu,
                    iter: it.iter,
                    base_url: &self.base_url,
                    env: &self.env,
                    vars: &it.vars,
                };
                view.check(&check.kind, &ctx)
            };
            self.request_ids
                .record_check(it.batch, &it.group, &check.name, passed)?;
            it.outcome.checks += 1;
            if !passed {
                any_failed = true;
                it.outcome.failed_checks += 1;
                it.outcome
                    .fail(name, format!("check `{}` failed (status {status})", check.name));
            }
        }

        let tags = self.group_tags(&it.group, &[]);
        it.batch
            .push(self.error_metric, tags, Sample::Rate(any_failed))?;

        if any_failed && req.on_check_fail == OnCheckFail::EndIteration {
            return Ok(Flow::EndIteration);
        }
        Ok(Flow::Continue)
    }
}

fn failure_detail(outcome: IterationOutcome) -> String {
    outcome
        .first_failure
        .map(|f| f.to_string())
        .unwrap_or_else(|| "a request or check failed".to_string())
}

/// Stable per-iteration seed so `choose` and randomized pacing replay for a given run seed.
fn iteration_seed(seed: u64, vu: u64, iter: u64) -> u64 {
    let mut x = seed
        ^ vu.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ iter.wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    x ^= x >> 33;
    x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    x ^= x >> 33;
    x
}
