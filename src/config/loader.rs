//! Configuration loading and environment parsing.

use super::Config;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Load configuration with the following precedence (highest first):
/// 1) `QUIZ_ARENA_CONFIG_JSON` env var containing raw JSON
/// 2) File pointed at by `QUIZ_ARENA_CONFIG_PATH`
/// 3) config.json in the current working directory
/// 4) Defaults compiled into the binary
///
/// Individual fields can additionally be overridden by environment variables
/// with prefix `QUIZ_ARENA` and `__` as the nested separator, e.g.
/// `QUIZ_ARENA__PORT=8080` or `QUIZ_ARENA__LOGGING__LEVEL=debug`.
/// Any errors while reading/parsing are printed to stderr and defaults win.
#[must_use]
pub fn load() -> Config {
    use std::env;
    use std::path::PathBuf;

    let defaults = Config::default();
    let mut merged =
        serde_json::to_value(&defaults).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

    if let Ok(json) = env::var("QUIZ_ARENA_CONFIG_JSON") {
        if let Some(value) = parse_json_document(&json, "QUIZ_ARENA_CONFIG_JSON") {
            merge_values(&mut merged, value);
        }
    }

    if let Ok(path) = env::var("QUIZ_ARENA_CONFIG_PATH") {
        merge_file_source(&mut merged, &PathBuf::from(path));
    }

    merge_file_source(&mut merged, &PathBuf::from("config.json"));

    apply_env_overrides(&mut merged);

    match serde_json::from_value::<Config>(merged) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to deserialize config; using defaults: {e}");
            defaults
        }
    }
}

fn parse_json_document(raw: &str, source: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) => {
            eprintln!("Config from {source} must be a JSON object; ignoring");
            None
        }
        Err(e) => {
            eprintln!("Failed to parse config from {source}: {e}");
            None
        }
    }
}

fn merge_file_source(merged: &mut Value, path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::read_to_string(path) {
        Ok(raw) => {
            if let Some(value) = parse_json_document(&raw, &path.display().to_string()) {
                merge_values(merged, value);
            }
        }
        Err(e) => eprintln!("Failed to read config file {}: {e}", path.display()),
    }
}

/// Recursively merge `overlay` into `base`; scalars and arrays replace.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

/// Apply `QUIZ_ARENA__SECTION__FIELD=value` environment overrides.
fn apply_env_overrides(merged: &mut Value) {
    for (key, raw_value) in std::env::vars() {
        let Some(path) = key.strip_prefix("QUIZ_ARENA__") else {
            continue;
        };
        let segments: Vec<String> = path.split("__").map(|s| s.to_lowercase()).collect();
        if segments.iter().any(String::is_empty) {
            continue;
        }

        let value = coerce_env_value(&raw_value);
        set_path(merged, &segments, value);
    }
}

/// Recursively walk/create the object path described by `segments` and set `value` at its end.
fn set_path(cursor: &mut Value, segments: &[String], value: Value) {
    let Value::Object(map) = cursor else {
        return;
    };
    let Some((segment, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.insert(segment.clone(), value);
    } else {
        let next = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        set_path(next, rest, value);
    }
}

/// Interpret env strings as JSON scalars when they parse as such.
fn coerce_env_value(raw: &str) -> Value {
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        if parsed.is_number() || parsed.is_boolean() || parsed.is_null() {
            return parsed;
        }
    }
    Value::String(raw.to_string())
}
