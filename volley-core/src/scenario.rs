//! Declarative scenario model: an ordered tree of steps interpreted once per iteration.

mod check;
mod exec;
mod template;

use std::time::Duration;

use volley_metrics::MetricKind;

use crate::catalog::MetricCatalog;
use crate::{Error, Result};

pub use check::{Check, CheckKind, json_pointer};
pub use exec::{IterationOutcome, ScenarioRuntime, StepFailure};
pub use template::{TemplateCtx, Vars, render};

#[derive(Debug, Clone, Default)]
pub struct Scenario {
    /// Run once before any VU starts. Any failed request or check aborts the run.
    pub setup: Vec<Step>,
    pub steps: Vec<Step>,
    /// Run once after the last VU exited.
    pub teardown: Vec<Step>,
}

#[derive(Debug, Clone)]
pub enum Step {
    Group(GroupStep),
    Request(Box<RequestStep>),
    Sleep(Pacing),
    Choose(Vec<Branch>),
    Add(AddStep),
}

/// Named block of steps. Every sample recorded inside carries its `group` tag.
#[derive(Debug, Clone)]
pub struct GroupStep {
    pub name: String,
    /// Run only when this iteration variable is set and non-empty.
    pub when: Option<String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub enum Target {
    /// Joined to the base URL.
    Path(String),
    Url(String),
}

impl Target {
    pub fn template(&self) -> &str {
        match self {
            Self::Path(p) | Self::Url(p) => p,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Body {
    /// Every string inside is rendered as a template; sent as `application/json`.
    Json(serde_json::Value),
    Raw(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnCheckFail {
    #[default]
    Continue,
    EndIteration,
}

#[derive(Debug, Clone)]
pub struct RequestStep {
    pub method: http::Method,
    pub target: Target,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
    /// `name` tag. Defaults to the unrendered target so ids do not explode series cardinality.
    pub name: Option<String>,
    /// Statuses that do not count as failed. Empty means any 2xx or 3xx.
    pub expect_status: Vec<u16>,
    pub timeout: Option<Duration>,
    /// Declared trend that also receives this request's duration.
    pub trend: Option<String>,
    pub checks: Vec<Check>,
    pub captures: Vec<Capture>,
    pub on_check_fail: OnCheckFail,
    pub when: Option<String>,
}

impl RequestStep {
    pub fn new(method: http::Method, target: Target) -> Self {
        Self {
            method,
            target,
            headers: Vec::new(),
            body: None,
            name: None,
            expect_status: Vec::new(),
            timeout: None,
            trend: None,
            checks: Vec::new(),
            captures: Vec::new(),
            on_check_fail: OnCheckFail::default(),
            when: None,
        }
    }

    pub fn name_tag(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.target.template())
    }

    pub fn is_expected(&self, status: u16) -> bool {
        if self.expect_status.is_empty() {
            (200..400).contains(&status)
        } else {
            self.expect_status.contains(&status)
        }
    }
}

/// Stores a response field into the iteration variables.
#[derive(Debug, Clone)]
pub struct Capture {
    pub var: String,
    pub path: String,
    /// Only capture on this status. Without it, any non-failed response is used.
    pub when_status: Option<u16>,
}

/// Think time. Never part of request latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    Fixed(Duration),
    Uniform { min: Duration, max: Duration },
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub weight: u32,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub struct AddStep {
    pub metric: String,
    pub value: f64,
}

impl Scenario {
    /// Checks references to declared metrics and the shape of every step.
    pub fn validate(&self, catalog: &MetricCatalog) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::InvalidScenario(
                "scenario has no steps".to_string(),
            ));
        }
        for steps in [&self.setup, &self.steps, &self.teardown] {
            validate_steps(steps, catalog)?;
        }
        Ok(())
    }
}

fn validate_steps(steps: &[Step], catalog: &MetricCatalog) -> Result<()> {
    for step in steps {
        match step {
            Step::Group(g) => {
                if g.name.is_empty() {
                    return Err(Error::InvalidScenario("group without a name".to_string()));
                }
                validate_steps(&g.steps, catalog)?;
            }
            Step::Request(r) => {
                if r.target.template().trim().is_empty() {
                    return Err(Error::InvalidScenario(format!(
                        "{} request without a path or url",
                        r.method
                    )));
                }
                if let Some(trend) = &r.trend
                    && catalog.kind_of(trend) != Some(MetricKind::Trend)
                {
                    return Err(Error::InvalidScenario(format!(
                        "request `{}` feeds `{trend}`, which is not a declared trend",
                        r.name_tag()
                    )));
                }
                if r.timeout.is_some_and(|t| t.is_zero()) {
                    return Err(Error::InvalidScenario(format!(
                        "request `{}` has a zero timeout",
                        r.name_tag()
                    )));
                }
            }
            Step::Sleep(Pacing::Uniform { min, max }) if min > max => {
                return Err(Error::InvalidScenario(format!(
                    "sleep range min ({min:?}) is above max ({max:?})"
                )));
            }
            Step::Sleep(_) => {}
            Step::Choose(branches) => {
                if branches.iter().map(|b| u64::from(b.weight)).sum::<u64>() == 0 {
                    return Err(Error::InvalidScenario(
                        "choose needs at least one branch with a positive weight".to_string(),
                    ));
                }
                for b in branches {
                    validate_steps(&b.steps, catalog)?;
                }
            }
            Step::Add(add) => match catalog.kind_of(&add.metric) {
                Some(MetricKind::Trend) if add.value.is_finite() => {}
                Some(MetricKind::Counter) if add.value >= 0.0 && add.value.fract() == 0.0 => {}
                Some(kind) => {
                    return Err(Error::InvalidScenario(format!(
                        "cannot add {} to {kind} metric `{}`",
                        add.value, add.metric
                    )));
                }
                None => {
                    return Err(Error::InvalidScenario(format!(
                        "add targets undeclared metric `{}`",
                        add.metric
                    )));
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MetricDecl;

    fn get(path: &str) -> Step {
        Step::Request(Box::new(RequestStep::new(
            http::Method::GET,
            Target::Path(path.to_string()),
        )))
    }

    fn catalog() -> MetricCatalog {
        MetricCatalog::new(
            &[
                MetricDecl::new("list_books_duration", MetricKind::Trend),
                MetricDecl::new("total_requests", MetricKind::Counter),
            ],
            "errors",
        )
        .unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn default_expectation_is_2xx_or_3xx() {
        let req = RequestStep::new(http::Method::GET, Target::Path("/".to_string()));
        assert!(req.is_expected(200));
        assert!(req.is_expected(302));
        assert!(!req.is_expected(404));
        assert!(!req.is_expected(0));

        let mut req = req;
        req.expect_status = vec![404];
        assert!(req.is_expected(404));
        assert!(!req.is_expected(200));
    }

    #[test]
    fn name_tag_defaults_to_unrendered_target() {
        let req = RequestStep::new(
            http::Method::GET,
            Target::Path("/api/v1/books/${book_id}".to_string()),
        );
        assert_eq!(req.name_tag(), "/api/v1/books/${book_id}");
    }

    #[test]
    fn validate_rejects_undeclared_trend_and_bad_add() {
        let mut req = RequestStep::new(http::Method::GET, Target::Path("/".to_string()));
        req.trend = Some("nope".to_string());
        let scenario = Scenario {
            steps: vec![Step::Request(Box::new(req))],
            ..Scenario::default()
        };
        assert!(matches!(
            scenario.validate(&catalog()),
            Err(Error::InvalidScenario(_))
        ));

        let scenario = Scenario {
            steps: vec![Step::Add(AddStep {
                metric: "total_requests".to_string(),
                value: 0.5,
            })],
            ..Scenario::default()
        };
        assert!(scenario.validate(&catalog()).is_err());

        let scenario = Scenario {
            steps: vec![
                get("/api/v1/books"),
                Step::Add(AddStep {
                    metric: "total_requests".to_string(),
                    value: 1.0,
                }),
            ],
            ..Scenario::default()
        };
        assert!(scenario.validate(&catalog()).is_ok());
    }

    #[test]
    fn validate_rejects_empty_scenarios_and_weightless_choices() {
        assert!(Scenario::default().validate(&catalog()).is_err());

        let scenario = Scenario {
            steps: vec![Step::Choose(vec![Branch {
                weight: 0,
                steps: vec![get("/")],
            }])],
            ..Scenario::default()
        };
        assert!(scenario.validate(&catalog()).is_err());
    }
}
