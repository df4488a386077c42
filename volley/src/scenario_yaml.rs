use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use volley_core::metrics::MetricKind;
use volley_core::scenario::{
    AddStep, Body, Branch, Capture, Check, CheckKind, GroupStep, OnCheckFail, Pacing,
    RequestStep, Scenario, Step, Target,
};
use volley_core::{LoadOptions, MetricDecl, RunOptions, Stage, ThresholdEntry, ThresholdSet};

/// A scenario file turned into engine inputs.
#[derive(Debug)]
pub(crate) struct LoadedScenario {
    pub name: String,
    pub options: RunOptions,
    pub scenario: Scenario,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioDoc {
    name: Option<String>,
    base_url: Option<String>,

    vus: Option<u64>,
    duration: Option<YamlDuration>,
    start_vus: Option<u64>,
    #[serde(default)]
    stages: Vec<StageYaml>,
    max_vus: Option<u64>,

    tick: Option<YamlDuration>,
    seed: Option<u64>,
    request_timeout: Option<YamlDuration>,

    #[serde(default)]
    thresholds: BTreeMap<String, ThresholdYaml>,
    #[serde(default)]
    metrics: BTreeMap<String, MetricKindYaml>,
    error_metric: Option<String>,

    #[serde(default)]
    setup: Vec<serde_yaml::Value>,
    #[serde(default)]
    steps: Vec<serde_yaml::Value>,
    #[serde(default)]
    teardown: Vec<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageYaml {
    duration: YamlDuration,
    target: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MetricKindYaml {
    Counter,
    Rate,
    Trend,
}

impl From<MetricKindYaml> for MetricKind {
    fn from(value: MetricKindYaml) -> Self {
        match value {
            MetricKindYaml::Counter => MetricKind::Counter,
            MetricKindYaml::Rate => MetricKind::Rate,
            MetricKindYaml::Trend => MetricKind::Trend,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ThresholdYaml {
    One(ThresholdEntryYaml),
    Many(Vec<ThresholdEntryYaml>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ThresholdEntryYaml {
    Expr(String),
    Full {
        threshold: String,
        #[serde(default)]
        abort_on_fail: bool,
        delay_abort_eval: Option<YamlDuration>,
    },
}

impl From<ThresholdEntryYaml> for ThresholdEntry {
    fn from(value: ThresholdEntryYaml) -> Self {
        match value {
            ThresholdEntryYaml::Expr(expr) => ThresholdEntry::new(expr),
            ThresholdEntryYaml::Full {
                threshold,
                abort_on_fail,
                delay_abort_eval,
            } => {
                let entry = ThresholdEntry::new(threshold);
                if abort_on_fail {
                    entry.abort_on_fail(delay_abort_eval.map(YamlDuration::into_inner))
                } else {
                    entry
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0 {
                    return Err(E::custom("duration cannot be negative"));
                }
                Ok(YamlDuration(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupYaml {
    group: String,
    when: Option<String>,
    steps: Vec<serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequestYaml {
    method: Option<String>,
    path: Option<String>,
    url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    json: Option<serde_yaml::Value>,
    body: Option<String>,
    name: Option<String>,
    expect_status: Option<OneOrMany<u16>>,
    timeout: Option<YamlDuration>,
    trend: Option<String>,
    #[serde(default)]
    checks: Vec<CheckYaml>,
    #[serde(default)]
    capture: BTreeMap<String, CaptureYaml>,
    #[serde(default)]
    on_check_fail: OnCheckFailYaml,
    when: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum OnCheckFailYaml {
    #[default]
    Continue,
    EndIteration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckYaml {
    name: Option<String>,
    status: Option<u16>,
    status_in: Option<Vec<u16>>,
    json_has: Option<String>,
    json_eq: Option<JsonEqYaml>,
    body_contains: Option<String>,
    max_duration: Option<YamlDuration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonEqYaml {
    path: String,
    value: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CaptureYaml {
    Path(String),
    Full {
        json: String,
        when_status: Option<u16>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PacingYaml {
    Fixed(YamlDuration),
    Range { min: YamlDuration, max: YamlDuration },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BranchYaml {
    #[serde(default = "default_weight")]
    weight: u32,
    steps: Vec<serde_yaml::Value>,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddYaml {
    metric: String,
    #[serde(default = "default_add_value")]
    value: f64,
}

fn default_add_value() -> f64 {
    1.0
}

pub fn looks_like_yaml_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()).map(|s| s.to_ascii_lowercase()),
        Some(ext) if ext == "yml" || ext == "yaml"
    )
}

pub(crate) async fn load_scenario(path: &Path) -> anyhow::Result<LoadedScenario> {
    if !looks_like_yaml_path(path) {
        anyhow::bail!(
            "unsupported scenario file `{}` (expected .yaml or .yml)",
            path.display()
        );
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read scenario: {}", path.display()))?;

    let default_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("scenario");

    parse_scenario(&bytes, default_name)
        .with_context(|| format!("invalid scenario: {}", path.display()))
}

pub(crate) fn parse_scenario(bytes: &[u8], default_name: &str) -> anyhow::Result<LoadedScenario> {
    let doc: ScenarioDoc = serde_yaml::from_slice(bytes).context("failed to parse YAML")?;

    let ScenarioDoc {
        name,
        base_url,
        vus,
        duration,
        start_vus,
        stages,
        max_vus,
        tick,
        seed,
        request_timeout,
        thresholds,
        metrics,
        error_metric,
        setup,
        steps,
        teardown,
    } = doc;

    let options = RunOptions {
        load: LoadOptions {
            vus,
            duration: duration.map(YamlDuration::into_inner),
            start_vus,
            stages: stages
                .into_iter()
                .map(|s| Stage {
                    duration: s.duration.into_inner(),
                    target: s.target,
                })
                .collect(),
            max_vus,
        },
        base_url,
        thresholds: thresholds
            .into_iter()
            .map(|(metric, t)| ThresholdSet {
                metric,
                entries: match t {
                    ThresholdYaml::One(e) => vec![e.into()],
                    ThresholdYaml::Many(es) => es.into_iter().map(Into::into).collect(),
                },
            })
            .collect(),
        metrics: metrics
            .into_iter()
            .map(|(name, kind)| MetricDecl::new(name, kind.into()))
            .collect(),
        error_metric,
        tick: tick.map(YamlDuration::into_inner),
        seed,
        request_timeout: request_timeout.map(YamlDuration::into_inner),
    };

    let scenario = Scenario {
        setup: steps_from_yaml(setup, "setup")?,
        steps: steps_from_yaml(steps, "steps")?,
        teardown: steps_from_yaml(teardown, "teardown")?,
    };

    Ok(LoadedScenario {
        name: name.unwrap_or_else(|| default_name.to_string()),
        options,
        scenario,
    })
}

fn steps_from_yaml(values: Vec<serde_yaml::Value>, at: &str) -> anyhow::Result<Vec<Step>> {
    values
        .into_iter()
        .enumerate()
        .map(|(idx, v)| step_from_yaml(v, &format!("{at}[{idx}]")))
        .collect()
}

const STEP_KEYS: [&str; 5] = ["group", "request", "sleep", "choose", "add"];

fn step_from_yaml(value: serde_yaml::Value, at: &str) -> anyhow::Result<Step> {
    let serde_yaml::Value::Mapping(map) = value else {
        anyhow::bail!("{at}: a step must be a mapping with one of {STEP_KEYS:?}");
    };

    let present: Vec<&str> = STEP_KEYS
        .iter()
        .copied()
        .filter(|k| map.contains_key(*k))
        .collect();
    let [kind] = present.as_slice() else {
        anyhow::bail!("{at}: expected exactly one of {STEP_KEYS:?}, found {present:?}");
    };

    if *kind == "group" {
        let group: GroupYaml = serde_yaml::from_value(serde_yaml::Value::Mapping(map))
            .with_context(|| format!("{at}: invalid group"))?;
        let steps_at = format!("{at}.{}", group.group);
        return Ok(Step::Group(GroupStep {
            name: group.group,
            when: group.when,
            steps: steps_from_yaml(group.steps, &steps_at)?,
        }));
    }

    if map.len() != 1 {
        anyhow::bail!("{at}: `{kind}` steps take no sibling keys");
    }
    let inner = map
        .into_iter()
        .next()
        .map(|(_, v)| v)
        .unwrap_or(serde_yaml::Value::Null);

    match *kind {
        "request" => {
            let req: RequestYaml =
                serde_yaml::from_value(inner).with_context(|| format!("{at}: invalid request"))?;
            Ok(Step::Request(Box::new(request_from_yaml(req, at)?)))
        }
        "sleep" => {
            let pacing: PacingYaml =
                serde_yaml::from_value(inner).with_context(|| format!("{at}: invalid sleep"))?;
            Ok(Step::Sleep(match pacing {
                PacingYaml::Fixed(d) => Pacing::Fixed(d.into_inner()),
                PacingYaml::Range { min, max } => Pacing::Uniform {
                    min: min.into_inner(),
                    max: max.into_inner(),
                },
            }))
        }
        "choose" => {
            let branches: Vec<BranchYaml> =
                serde_yaml::from_value(inner).with_context(|| format!("{at}: invalid choose"))?;
            let branches = branches
                .into_iter()
                .enumerate()
                .map(|(idx, b)| {
                    Ok(Branch {
                        weight: b.weight,
                        steps: steps_from_yaml(b.steps, &format!("{at}.choose[{idx}]"))?,
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(Step::Choose(branches))
        }
        _ => {
            let add: AddYaml =
                serde_yaml::from_value(inner).with_context(|| format!("{at}: invalid add"))?;
            Ok(Step::Add(AddStep {
                metric: add.metric,
                value: add.value,
            }))
        }
    }
}

fn request_from_yaml(req: RequestYaml, at: &str) -> anyhow::Result<RequestStep> {
    let method = match req.method.as_deref() {
        None => http::Method::GET,
        Some(m) => http::Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
            .with_context(|| format!("{at}: invalid method `{m}`"))?,
    };

    let target = match (req.path, req.url) {
        (Some(path), None) => Target::Path(path),
        (None, Some(url)) => Target::Url(url),
        _ => anyhow::bail!("{at}: a request needs exactly one of `path` or `url`"),
    };

    let body = match (req.json, req.body) {
        (None, None) => None,
        (Some(json), None) => Some(Body::Json(
            serde_json::to_value(&json).with_context(|| format!("{at}: invalid json body"))?,
        )),
        (None, Some(raw)) => Some(Body::Raw(raw)),
        (Some(_), Some(_)) => anyhow::bail!("{at}: use either `json` or `body`, not both"),
    };

    let checks = req
        .checks
        .into_iter()
        .enumerate()
        .map(|(idx, c)| check_from_yaml(c).with_context(|| format!("{at}.checks[{idx}]")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let captures = req
        .capture
        .into_iter()
        .map(|(var, c)| match c {
            CaptureYaml::Path(path) => Capture {
                var,
                path,
                when_status: None,
            },
            CaptureYaml::Full { json, when_status } => Capture {
                var,
                path: json,
                when_status,
            },
        })
        .collect();

    let mut step = RequestStep::new(method, target);
    step.headers = req.headers.into_iter().collect();
    step.body = body;
    step.name = req.name;
    step.expect_status = req.expect_status.map(OneOrMany::into_vec).unwrap_or_default();
    step.timeout = req.timeout.map(YamlDuration::into_inner);
    step.trend = req.trend;
    step.checks = checks;
    step.captures = captures;
    step.on_check_fail = match req.on_check_fail {
        OnCheckFailYaml::Continue => OnCheckFail::Continue,
        OnCheckFailYaml::EndIteration => OnCheckFail::EndIteration,
    };
    step.when = req.when;
    Ok(step)
}

fn check_from_yaml(c: CheckYaml) -> anyhow::Result<Check> {
    let CheckYaml {
        name,
        status,
        status_in,
        json_has,
        json_eq,
        body_contains,
        max_duration,
    } = c;

    let mut kinds = Vec::with_capacity(1);
    kinds.extend(status.map(CheckKind::Status));
    kinds.extend(status_in.map(CheckKind::StatusIn));
    kinds.extend(json_has.map(CheckKind::JsonHas));
    if let Some(eq) = json_eq {
        kinds.push(CheckKind::JsonEq {
            path: eq.path,
            value: serde_json::to_value(&eq.value).context("invalid json_eq value")?,
        });
    }
    kinds.extend(body_contains.map(CheckKind::BodyContains));
    kinds.extend(max_duration.map(|d| CheckKind::MaxDuration(d.into_inner())));

    let mut kinds = kinds.into_iter();
    let (Some(kind), None) = (kinds.next(), kinds.next()) else {
        anyhow::bail!(
            "a check needs exactly one of status, status_in, json_has, json_eq, body_contains, max_duration"
        );
    };

    Ok(match name {
        Some(name) => Check::named(name, kind),
        None => Check::new(kind),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> LoadedScenario {
        parse_scenario(yaml.as_bytes(), "test").unwrap_or_else(|e| panic!("{e:#}"))
    }

    #[test]
    fn parses_fixed_load_with_checks_and_thresholds() {
        let loaded = parse(
            r#"
vus: 2
duration: 10s
thresholds:
  http_req_duration: ["p(95)<500", "p(99)<1000"]
  http_req_failed: rate<0.01
steps:
  - request:
      path: /api/v1/books
      checks:
        - { status: 200, name: "list: status 200" }
        - json_has: Books
  - sleep: 500ms
"#,
        );

        assert_eq!(loaded.name, "test");
        assert_eq!(loaded.options.load.vus, Some(2));
        assert_eq!(loaded.options.load.duration, Some(Duration::from_secs(10)));

        let by_metric: BTreeMap<_, _> = loaded
            .options
            .thresholds
            .iter()
            .map(|t| (t.metric.as_str(), t.entries.len()))
            .collect();
        assert_eq!(by_metric.get("http_req_duration"), Some(&2));
        assert_eq!(by_metric.get("http_req_failed"), Some(&1));

        assert_eq!(loaded.scenario.steps.len(), 2);
        let Step::Request(req) = &loaded.scenario.steps[0] else {
            panic!("expected a request step");
        };
        assert_eq!(req.method, http::Method::GET);
        assert_eq!(req.checks[0].name, "list: status 200");
        assert_eq!(req.checks[1].kind, CheckKind::JsonHas("Books".to_string()));
        assert!(matches!(
            loaded.scenario.steps[1],
            Step::Sleep(Pacing::Fixed(d)) if d == Duration::from_millis(500)
        ));
    }

    #[test]
    fn parses_stages_groups_captures_and_abort_thresholds() {
        let loaded = parse(
            r#"
name: load
stages:
  - { duration: 2m, target: 100 }
  - { duration: 30, target: 0 }
metrics:
  add_book_duration: trend
thresholds:
  errors:
    - threshold: rate<0.1
      abort_on_fail: true
      delay_abort_eval: 10s
steps:
  - group: Add Book
    steps:
      - request:
          method: post
          path: /api/v1/books
          json: { title: "Book ${vu}", author: "A" }
          trend: add_book_duration
          capture:
            book_id: { json: ID, when_status: 201 }
            raw_id: ID
  - group: Get Book
    when: book_id
    steps:
      - request:
          path: /api/v1/books/${book_id}
          name: get book
          expect_status: [200, 404]
          on_check_fail: end_iteration
          checks:
            - json_eq: { path: ID, value: "${book_id}" }
"#,
        );

        assert_eq!(loaded.name, "load");
        let stages = &loaded.options.load.stages;
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].duration, Duration::from_secs(120));
        assert_eq!(stages[1].duration, Duration::from_secs(30));
        assert_eq!(loaded.options.metrics[0].kind, MetricKind::Trend);

        let entry = &loaded.options.thresholds[0].entries[0];
        assert!(entry.abort_on_fail);
        assert_eq!(entry.delay_abort_eval, Some(Duration::from_secs(10)));

        let Step::Group(add) = &loaded.scenario.steps[0] else {
            panic!("expected a group");
        };
        let Step::Request(req) = &add.steps[0] else {
            panic!("expected a request");
        };
        assert_eq!(req.method, http::Method::POST);
        assert!(matches!(req.body, Some(Body::Json(_))));
        assert_eq!(req.captures.len(), 2);
        let book_id = req.captures.iter().find(|c| c.var == "book_id");
        assert_eq!(book_id.and_then(|c| c.when_status), Some(201));

        let Step::Group(get) = &loaded.scenario.steps[1] else {
            panic!("expected a group");
        };
        assert_eq!(get.when.as_deref(), Some("book_id"));
        let Step::Request(req) = &get.steps[0] else {
            panic!("expected a request");
        };
        assert_eq!(req.expect_status, vec![200, 404]);
        assert_eq!(req.on_check_fail, OnCheckFail::EndIteration);
        assert_eq!(req.name_tag(), "get book");
    }

    #[test]
    fn parses_choose_add_and_uniform_sleep() {
        let loaded = parse(
            r#"
vus: 1
duration: 1s
metrics: { total_requests: counter }
steps:
  - choose:
      - weight: 70
        steps:
          - request: { path: /a }
      - weight: 30
        steps:
          - request: { path: /b }
  - add: { metric: total_requests }
  - sleep: { min: 1s, max: 3s }
"#,
        );

        let Step::Choose(branches) = &loaded.scenario.steps[0] else {
            panic!("expected choose");
        };
        assert_eq!(
            branches.iter().map(|b| b.weight).collect::<Vec<_>>(),
            vec![70, 30]
        );
        assert!(matches!(
            &loaded.scenario.steps[1],
            Step::Add(a) if a.metric == "total_requests" && a.value == 1.0
        ));
        assert!(matches!(
            loaded.scenario.steps[2],
            Step::Sleep(Pacing::Uniform { min, max })
                if min == Duration::from_secs(1) && max == Duration::from_secs(3)
        ));
    }

    #[test]
    fn rejects_malformed_steps() {
        let cases = [
            "steps: [ { request: { path: /a, url: 'http://x/a' } } ]",
            "steps: [ { request: { path: /a }, sleep: 1s } ]",
            "steps: [ { request: { path: /a, checks: [ { status: 200, json_has: ID } ] } } ]",
            "steps: [ { request: { path: /a, checks: [ { name: only-a-name } ] } } ]",
            "steps: [ { wait: 1s } ]",
            "steps: [ { request: { path: /a, method: 'NOT A METHOD' } } ]",
            "vus: 1\nunknown_key: true",
            "metrics: { vus_now: gauge }",
        ];
        for yaml in cases {
            assert!(parse_scenario(yaml.as_bytes(), "x").is_err(), "accepted: {yaml}");
        }
    }

    #[test]
    fn yaml_extension_detection() {
        assert!(looks_like_yaml_path(Path::new("a/b.yaml")));
        assert!(looks_like_yaml_path(Path::new("b.YML")));
        assert!(!looks_like_yaml_path(Path::new("b.lua")));
    }

    #[test]
    fn shipped_scenarios_load_and_resolve() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../scenarios");
        for name in ["smoke.yaml", "load.yaml", "stress.yaml", "borrow.yaml"] {
            let path = dir.join(name);
            let bytes = std::fs::read(&path)
                .unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
            let loaded = parse_scenario(&bytes, name)
                .unwrap_or_else(|e| panic!("parse {name}: {e:#}"));
            let env = std::sync::Arc::new(BTreeMap::new());
            volley_core::RunConfig::resolve(
                loaded.options,
                &volley_core::RunOverrides::default(),
                env,
            )
            .unwrap_or_else(|e| panic!("resolve {name}: {e}"));
        }
    }
}
