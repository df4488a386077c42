use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;

/// Process environment plus `--env KEY=VALUE` overrides (later ones win).
pub(crate) fn merged_env(overrides: &[String]) -> anyhow::Result<volley_core::EnvVars> {
    let mut map: BTreeMap<String, String> = std::env::vars().collect();

    for raw in overrides {
        let (k, v) = parse_env_override(raw)?;
        map.insert(k, v);
    }

    Ok(Arc::new(map))
}

fn parse_env_override(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        anyhow::bail!("invalid --env (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}
