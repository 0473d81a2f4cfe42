// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority. Later files override earlier ones. `RELAY_CONFIG_DIR`, when
/// set, is searched right below the explicit `--config` path, ahead of the
/// platform XDG location — useful for pointing a whole CI job or container
/// at one config directory without a `--config` flag on every invocation.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("/etc/relay/config.yaml"));
    paths.push(PathBuf::from("/etc/relay/config.yml"));

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/relay/config.yaml"));
        paths.push(home.join(".config/relay/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("relay/config.yaml"));
        paths.push(cfg.join("relay/config.yml"));
    }

    paths.push(PathBuf::from(".relay/config.yaml"));
    paths.push(PathBuf::from(".relay/config.yml"));
    paths.push(PathBuf::from(".relay.yaml"));
    paths.push(PathBuf::from(".relay.yml"));
    paths.push(PathBuf::from("relay.yaml"));
    paths.push(PathBuf::from("relay.yml"));

    if let Ok(dir) = std::env::var("RELAY_CONFIG_DIR") {
        paths.push(PathBuf::from(dir).join("config.yaml"));
    }

    paths
}

/// Loads configuration by merging every discovered YAML layer, then applying
/// a handful of `RELAY_*` environment overrides (highest precedence — these
/// win even over an explicit `--config` file, matching the usual
/// env-beats-file convention for containerized deployment). `extra` is an
/// explicit path such as the CLI's `--config` flag.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    apply_env_overrides(&mut merged);

    let mut config: Config =
        if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) { Config::default() } else { serde_yaml::from_value(merged).unwrap_or_default() };

    if let Ok(dir) = std::env::var("RELAY_DATA_DIR") {
        config.data_dir = Some(dir);
    }

    Ok(config)
}

/// Overlays a small set of environment variables onto the merged YAML tree
/// before deserialization, so a malformed override can't mask a working
/// file-based config underneath it — only the overridden scalar changes.
fn apply_env_overrides(merged: &mut serde_yaml::Value) {
    set_scalar_env(merged, "RELAY_MODEL_PROVIDER", &["model", "provider"]);
    set_scalar_env(merged, "RELAY_MODEL_NAME", &["model", "name"]);
    if let Ok(raw) = std::env::var("RELAY_RPC_ENABLED") {
        if let Ok(enabled) = raw.parse::<bool>() {
            set_path(merged, &["rpc", "enabled"], serde_yaml::Value::Bool(enabled));
        }
    }
}

fn set_scalar_env(merged: &mut serde_yaml::Value, var: &str, path: &[&str]) {
    if let Ok(value) = std::env::var(var) {
        set_path(merged, path, serde_yaml::Value::String(value));
    }
}

fn set_path(merged: &mut serde_yaml::Value, path: &[&str], value: serde_yaml::Value) {
    let mut cursor = merged;
    for (i, segment) in path.iter().enumerate() {
        if !matches!(cursor, serde_yaml::Value::Mapping(_)) {
            *cursor = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }
        let serde_yaml::Value::Mapping(map) = cursor else { unreachable!() };
        let key = serde_yaml::Value::String(segment.to_string());
        if i == path.len() - 1 {
            map.insert(key, value.clone());
            return;
        }
        cursor = map.entry(key).or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    }
}

/// Deep-merges `src` into `dst`; `src` wins on scalar conflicts, nested
/// mappings are merged key by key.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d.entry(k).or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
