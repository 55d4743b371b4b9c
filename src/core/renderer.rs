// src/core/renderer.rs

//! Thin adapter over Tera.
//!
//! Configuration values and configuration files share one syntax (`{{ var }}`, `{% if %}`,
//! filters). File templates additionally get a `ctx(path=..., default=...)` function that looks
//! up a dotted path in the materialized context.

use crate::core::config_store::{ConfigError, ConfigResult};
use serde_json::Value as JsonValue;
use std::{collections::HashMap, error::Error as _, sync::Arc};
use tera::{Context, Tera};

/// Renders a configuration value against `context`. `what` names the value in diagnostics.
pub fn render_value(template: &str, context: &JsonValue, what: &str) -> ConfigResult<String> {
    let context = to_context(context, what)?;
    engine(None)
        .render_str(template, &context)
        .map_err(|e| render_error(what, &e))
}

/// Renders a configuration file template. `ctx(...)` resolves against `lookup`.
pub fn render_file(
    name: &str,
    source: &str,
    context: &JsonValue,
    lookup: Arc<JsonValue>,
) -> ConfigResult<String> {
    let what = format!("template '{}'", name);
    let context = to_context(context, &what)?;
    engine(Some(lookup))
        .render_str(source, &context)
        .map_err(|e| render_error(&what, &e))
}

fn engine(lookup: Option<Arc<JsonValue>>) -> Tera {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    if let Some(snapshot) = lookup {
        tera.register_function(
            "ctx",
            move |args: &HashMap<String, JsonValue>| -> tera::Result<JsonValue> {
                ctx_lookup(&snapshot, args)
            },
        );
    }
    tera
}

fn to_context(value: &JsonValue, what: &str) -> ConfigResult<Context> {
    Context::from_value(value.clone()).map_err(|e| render_error(what, &e))
}

fn ctx_lookup(snapshot: &JsonValue, args: &HashMap<String, JsonValue>) -> tera::Result<JsonValue> {
    let path = match args.get("path") {
        Some(JsonValue::String(path)) => path,
        Some(other) => {
            return Err(tera::Error::msg(format!(
                "ctx(): `path` must be a string, got {}",
                other
            )));
        }
        None => return Err(tera::Error::msg("ctx(): missing `path` argument")),
    };
    match json_path(snapshot, path) {
        Some(value) if !value.is_null() => Ok(value.clone()),
        _ => args
            .get("default")
            .cloned()
            .ok_or_else(|| tera::Error::msg(format!("Configuration error: {}", path))),
    }
}

/// Walks a dotted path through JSON objects and arrays.
pub fn json_path<'v>(root: &'v JsonValue, path: &str) -> Option<&'v JsonValue> {
    path.split('.').try_fold(root, |node, segment| match node {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Replaces (or creates) the node at `segments`, creating intermediate objects as needed.
pub fn set_json_path(root: &mut JsonValue, segments: &[&str], value: JsonValue) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for segment in parents {
        node = match node {
            JsonValue::Array(items) => {
                match segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                    Some(item) => item,
                    None => return,
                }
            }
            other => {
                if !other.is_object() {
                    *other = JsonValue::Object(Default::default());
                }
                match other {
                    JsonValue::Object(map) => map
                        .entry(segment.to_string())
                        .or_insert_with(|| JsonValue::Object(Default::default())),
                    _ => return,
                }
            }
        };
    }
    match node {
        JsonValue::Array(items) => {
            if let Some(slot) = last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                *slot = value;
            }
        }
        JsonValue::Object(map) => {
            map.insert(last.to_string(), value);
        }
        other => {
            let mut map = serde_json::Map::new();
            map.insert(last.to_string(), value);
            *other = JsonValue::Object(map);
        }
    }
}

/// Tera reports the useful part of a failure in the source chain, not in the top-level message.
fn render_error(what: &str, err: &tera::Error) -> ConfigError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    ConfigError::Render {
        what: what.to_string(),
        message,
    }
}
