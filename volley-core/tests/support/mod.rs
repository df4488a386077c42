#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use volley_core::scenario::{
    Capture, Check, CheckKind, GroupStep, OnCheckFail, Pacing, RequestStep, Scenario, Step,
    Target,
};
use volley_core::{
    EnvVars, Exchange, HttpRequest, HttpResponse, HttpTransportErrorKind, LoadOptions, RunConfig,
    RunOptions, RunOverrides, Transport, TransportError,
};

pub enum Reply {
    Status(u16, String),
    NetworkError,
}

type Handler = dyn Fn(&HttpRequest) -> Reply + Send + Sync;

/// In-memory transport: every request takes `latency` of (tokio) time and is answered by
/// `handler`.
pub struct MockTransport {
    latency: Duration,
    handler: Box<Handler>,
    log: Mutex<Vec<(String, String)>>,
}

impl MockTransport {
    pub fn new(
        latency: Duration,
        handler: impl Fn(&HttpRequest) -> Reply + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            latency,
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn always(latency: Duration, status: u16, body: &str) -> Arc<Self> {
        let body = body.to_string();
        Self::new(latency, move |_| Reply::Status(status, body.clone()))
    }

    /// `(method, url)` of every request seen so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn count_path(&self, suffix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|(_, url)| url.ends_with(suffix))
            .count()
    }
}

impl Transport for MockTransport {
    async fn send(&self, req: HttpRequest) -> Exchange {
        self.log
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((req.method.to_string(), req.url.clone()));

        let started = tokio::time::Instant::now();
        tokio::time::sleep(self.latency).await;
        match (self.handler)(&req) {
            Reply::Status(status, body) => Ok(HttpResponse {
                status,
                body: Bytes::from(body),
                headers: Vec::new(),
                elapsed: started.elapsed(),
            }),
            Reply::NetworkError => Err(TransportError {
                kind: HttpTransportErrorKind::Request,
                message: "connection refused".to_string(),
                elapsed: started.elapsed(),
            }),
        }
    }
}

pub fn fixed(vus: u64, duration: Duration) -> RunOptions {
    RunOptions {
        load: LoadOptions {
            vus: Some(vus),
            duration: Some(duration),
            ..LoadOptions::default()
        },
        base_url: Some("http://sut.test".to_string()),
        seed: Some(7),
        ..RunOptions::default()
    }
}

pub fn resolve(options: RunOptions) -> RunConfig {
    RunConfig::resolve(options, &RunOverrides::default(), EnvVars::new(BTreeMap::new()))
        .unwrap_or_else(|e| panic!("config: {e}"))
}

pub fn get(path: &str) -> RequestStep {
    RequestStep::new(http::Method::GET, Target::Path(path.to_string()))
}

pub fn post_json(path: &str, body: serde_json::Value) -> RequestStep {
    let mut req = RequestStep::new(http::Method::POST, Target::Path(path.to_string()));
    req.body = Some(volley_core::scenario::Body::Json(body));
    req
}

pub fn step(req: RequestStep) -> Step {
    Step::Request(Box::new(req))
}

pub fn group(name: &str, when: Option<&str>, steps: Vec<Step>) -> Step {
    Step::Group(GroupStep {
        name: name.to_string(),
        when: when.map(str::to_string),
        steps,
    })
}

pub fn sleep_ms(ms: u64) -> Step {
    Step::Sleep(Pacing::Fixed(Duration::from_millis(ms)))
}

/// List, create (capturing `book_id`), then a conditional get of the created book.
pub fn catalog_scenario() -> Scenario {
    let mut list = get("/api/v1/books");
    list.checks = vec![Check::named("list: status 200", CheckKind::Status(200))];

    let mut add = post_json(
        "/api/v1/books",
        serde_json::json!({"title": "Book ${vu}-${timestamp}", "author": "Author ${vu}"}),
    );
    add.trend = Some("add_book_duration".to_string());
    add.checks = vec![Check::named("add: status 201", CheckKind::Status(201))];
    add.captures = vec![Capture {
        var: "book_id".to_string(),
        path: "ID".to_string(),
        when_status: Some(201),
    }];

    let mut fetch = get("/api/v1/books/${book_id}");
    fetch.trend = Some("get_book_duration".to_string());
    fetch.checks = vec![
        Check::named("get: status 200", CheckKind::Status(200)),
        Check::named(
            "get: correct ID",
            CheckKind::JsonEq {
                path: "ID".to_string(),
                value: serde_json::Value::String("${book_id}".to_string()),
            },
        ),
    ];
    fetch.on_check_fail = OnCheckFail::Continue;

    Scenario {
        steps: vec![
            group("List Books", None, vec![step(list)]),
            group("Add Book", None, vec![step(add)]),
            group("Get Book", Some("book_id"), vec![step(fetch)]),
        ],
        ..Scenario::default()
    }
}
