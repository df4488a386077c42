use std::cell::OnceCell;
use std::fmt::Write as _;
use std::time::Duration;

use serde_json::Value;

use super::template::{TemplateCtx, render, render_json};

#[derive(Debug, Clone)]
pub struct Check {
    pub name: String,
    pub kind: CheckKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckKind {
    Status(u16),
    StatusIn(Vec<u16>),
    /// The JSON body has a non-null value at `path`.
    JsonHas(String),
    /// `value` is rendered as a template before comparing.
    JsonEq { path: String, value: Value },
    BodyContains(String),
    MaxDuration(Duration),
}

impl Check {
    pub fn new(kind: CheckKind) -> Self {
        Self {
            name: kind.default_name(),
            kind,
        }
    }

    pub fn named(name: impl Into<String>, kind: CheckKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl CheckKind {
    fn default_name(&self) -> String {
        match self {
            Self::Status(code) => format!("status is {code}"),
            Self::StatusIn(codes) => {
                let mut out = String::from("status in [");
                for (i, c) in codes.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write!(out, "{c}").ok();
                }
                out.push(']');
                out
            }
            Self::JsonHas(path) => format!("has {path}"),
            Self::JsonEq { path, value } => match value {
                Value::String(s) => format!("{path} is {s}"),
                other => format!("{path} is {other}"),
            },
            Self::BodyContains(text) => format!("body contains {text}"),
            Self::MaxDuration(d) => format!("duration under {}ms", d.as_millis()),
        }
    }
}

/// Converts a dotted path (`Books.0.ID`) to a JSON pointer. Paths starting with `/` are
/// already pointers.
pub fn json_pointer(path: &str) -> String {
    if path.is_empty() || path.starts_with('/') {
        return path.to_string();
    }
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('.') {
        out.push('/');
        out.push_str(&segment.replace('~', "~0").replace('/', "~1"));
    }
    out
}

/// What checks and captures see of one exchange. A transport failure has status `0`,
/// an empty body and no duration.
pub(crate) struct ResponseView<'a> {
    pub status: u16,
    pub body: &'a [u8],
    pub duration: Option<Duration>,
    json: OnceCell<Option<Value>>,
}

impl<'a> ResponseView<'a> {
    pub fn new(status: u16, body: &'a [u8], duration: Option<Duration>) -> Self {
        Self {
            status,
            body,
            duration,
            json: OnceCell::new(),
        }
    }

    fn json(&self) -> Option<&Value> {
        self.json
            .get_or_init(|| serde_json::from_slice(self.body).ok())
            .as_ref()
    }

    pub fn json_at(&self, path: &str) -> Option<&Value> {
        self.json()?
            .pointer(&json_pointer(path))
            .filter(|v| !v.is_null())
    }

    pub fn check(&self, kind: &CheckKind, ctx: &TemplateCtx<'_>) -> bool {
        match kind {
            CheckKind::Status(code) => self.status == *code,
            CheckKind::StatusIn(codes) => codes.contains(&self.status),
            CheckKind::JsonHas(path) => self.json_at(path).is_some(),
            CheckKind::JsonEq { path, value } => self
                .json_at(path)
                .is_some_and(|actual| values_match(actual, &render_json(value, ctx))),
            CheckKind::BodyContains(text) => {
                let needle = render(text, ctx);
                String::from_utf8_lossy(self.body).contains(needle.as_str())
            }
            CheckKind::MaxDuration(max) => self.duration.is_some_and(|d| d <= *max),
        }
    }
}

/// Scalars compare loosely: `"42"` matches `42`.
fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(e)) => a == e,
        (Value::Number(_) | Value::Bool(_), Value::String(e)) => actual.to_string() == *e,
        (Value::Number(a), Value::Number(e)) => a.as_f64() == e.as_f64(),
        (Value::String(a), Value::Number(e)) => {
            a.trim().parse::<f64>().ok() == e.as_f64()
        }
        _ => actual == expected,
    }
}

/// Text stored into an iteration variable. `null` captures nothing.
pub(crate) fn capture_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvVars;
    use crate::scenario::Vars;

    fn eval(view: &ResponseView<'_>, kind: &CheckKind, vars: &Vars) -> bool {
        let env = EnvVars::default();
        let ctx = TemplateCtx {
            vu: 1,
            iter: 0,
            base_url: "",
            env: &env,
            vars,
        };
        view.check(kind, &ctx)
    }

    #[test]
    fn pointers_from_dotted_paths() {
        assert_eq!(json_pointer("ID"), "/ID");
        assert_eq!(json_pointer("Books.0.Title"), "/Books/0/Title");
        assert_eq!(json_pointer("/already/pointer"), "/already/pointer");
        assert_eq!(json_pointer("a/b"), "/a~1b");
    }

    #[test]
    fn default_names() {
        assert_eq!(Check::new(CheckKind::Status(201)).name, "status is 201");
        assert_eq!(
            Check::new(CheckKind::StatusIn(vec![200, 204])).name,
            "status in [200, 204]"
        );
        assert_eq!(Check::new(CheckKind::JsonHas("ID".into())).name, "has ID");
    }

    #[test]
    fn json_checks() {
        let body = br#"{"ID":"b-42","Books":[],"Total":3,"Borrower":null}"#;
        let view = ResponseView::new(200, body, Some(Duration::from_millis(5)));
        let mut vars = Vars::default();
        vars.insert("book_id".into(), "b-42".into());

        assert!(eval(&view, &CheckKind::JsonHas("Books".into()), &vars));
        assert!(!eval(&view, &CheckKind::JsonHas("Borrower".into()), &vars));
        assert!(!eval(&view, &CheckKind::JsonHas("Missing".into()), &vars));
        assert!(eval(
            &view,
            &CheckKind::JsonEq {
                path: "ID".into(),
                value: Value::String("${book_id}".into())
            },
            &vars
        ));
        assert!(eval(
            &view,
            &CheckKind::JsonEq {
                path: "Total".into(),
                value: Value::String("3".into())
            },
            &vars
        ));
        assert!(eval(
            &view,
            &CheckKind::JsonEq {
                path: "Total".into(),
                value: serde_json::json!(3)
            },
            &vars
        ));
    }

    #[test]
    fn transport_failures_fail_every_check() {
        let view = ResponseView::new(0, b"", None);
        let vars = Vars::default();
        for kind in [
            CheckKind::Status(200),
            CheckKind::JsonHas("ID".into()),
            CheckKind::BodyContains("x".into()),
            CheckKind::MaxDuration(Duration::from_secs(10)),
        ] {
            assert!(!eval(&view, &kind, &vars), "{kind:?}");
        }
    }

    #[test]
    fn non_json_body_has_no_fields() {
        let view = ResponseView::new(200, b"<html>ok</html>", Some(Duration::ZERO));
        let vars = Vars::default();
        assert!(!eval(&view, &CheckKind::JsonHas("ID".into()), &vars));
        assert!(eval(&view, &CheckKind::BodyContains("ok".into()), &vars));
    }

    #[test]
    fn capture_text_unquotes_strings() {
        assert_eq!(capture_text(&serde_json::json!("abc")), Some("abc".into()));
        assert_eq!(capture_text(&serde_json::json!(7)), Some("7".into()));
        assert_eq!(capture_text(&Value::Null), None);
    }
}
