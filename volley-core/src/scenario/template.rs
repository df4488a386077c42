use std::time::{SystemTime, UNIX_EPOCH};

use ahash::AHashMap;

use crate::config::EnvVars;

/// Iteration-local variables (captures, plus whatever setup captured).
pub type Vars = AHashMap<String, String>;

#[derive(Debug, Clone, Copy)]
pub struct TemplateCtx<'a> {
    pub vu: u64,
    pub iter: u64,
    pub base_url: &'a str,
    pub env: &'a EnvVars,
    pub vars: &'a Vars,
}

impl TemplateCtx<'_> {
    fn lookup(&self, key: &str, out: &mut String) {
        match key {
            "vu" => out.push_str(&self.vu.to_string()),
            "iter" => out.push_str(&self.iter.to_string()),
            "timestamp" => {
                let ms = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or(0);
                out.push_str(&ms.to_string());
            }
            "base_url" => out.push_str(self.base_url),
            _ => {
                let value = match key.strip_prefix("env.") {
                    Some(name) => self.env.get(name),
                    None => self.vars.get(key),
                };
                if let Some(v) = value {
                    out.push_str(v);
                }
            }
        }
    }
}

/// Expands `${...}` placeholders. Unknown names expand to nothing; an unterminated `${` is kept
/// as written.
pub fn render(template: &str, ctx: &TemplateCtx<'_>) -> String {
    if !template.contains("${") {
        return template.to_string();
    }

    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        ctx.lookup(after[..end].trim(), &mut out);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Renders every string in a JSON document. Keys are left alone.
pub(crate) fn render_json(value: &serde_json::Value, ctx: &TemplateCtx<'_>) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(render(s, ctx)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_json(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_json(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn with_ctx(f: impl FnOnce(&TemplateCtx<'_>)) {
        let mut env = BTreeMap::new();
        env.insert("TOKEN".to_string(), "abc".to_string());
        let env: EnvVars = Arc::new(env);
        let mut vars = Vars::default();
        vars.insert("book_id".to_string(), "42".to_string());
        let ctx = TemplateCtx {
            vu: 3,
            iter: 7,
            base_url: "http://localhost:8080",
            env: &env,
            vars: &vars,
        };
        f(&ctx);
    }

    #[test]
    fn renders_builtins_env_and_vars() {
        with_ctx(|ctx| {
            assert_eq!(
                render("Author ${vu}-${iter} ${env.TOKEN}", ctx),
                "Author 3-7 abc"
            );
            assert_eq!(
                render("${base_url}/api/v1/books/${book_id}", ctx),
                "http://localhost:8080/api/v1/books/42"
            );
            assert_eq!(render("plain", ctx), "plain");
        });
    }

    #[test]
    fn unknown_placeholders_render_empty() {
        with_ctx(|ctx| {
            assert_eq!(render("/books/${missing}/x", ctx), "/books//x");
            assert_eq!(render("${env.NOPE}", ctx), "");
            assert_eq!(render("broken ${vu", ctx), "broken ${vu");
        });
    }

    #[test]
    fn timestamp_is_numeric() {
        with_ctx(|ctx| {
            let ts = render("${timestamp}", ctx);
            assert!(ts.parse::<u128>().is_ok(), "{ts}");
        });
    }

    #[test]
    fn json_strings_are_rendered() {
        with_ctx(|ctx| {
            let body = serde_json::json!({
                "title": "Load Test Book ${vu}",
                "tags": ["${book_id}", 1],
                "nested": {"author": "Author ${vu}"},
            });
            let out = render_json(&body, ctx);
            assert_eq!(out["title"], "Load Test Book 3");
            assert_eq!(out["tags"][0], "42");
            assert_eq!(out["tags"][1], 1);
            assert_eq!(out["nested"]["author"], "Author 3");
        });
    }
}
