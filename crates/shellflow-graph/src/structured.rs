//! Structured-object front-end.
//!
//! Accepts the same shapes the operation parameters document: a bare
//! command string, an ordered sequence mixing strings and objects, and the
//! object forms `{"parallel": [...]}`, `{"id", "run", "after"}`, and
//! `{"tool", "input"}`. Produces the same `Step` list as the text grammar.

use serde_json::Value;

use shellflow_core::error::{FlowError, Result};

use crate::ast::Step;

pub fn parse(value: &Value) -> Result<Vec<Step>> {
    match value {
        Value::String(s) => Ok(vec![Step::Command(s.clone())]),
        Value::Array(items) => items.iter().map(parse_item).collect(),
        Value::Object(_) => Ok(vec![parse_item(value)?]),
        other => Err(FlowError::parse(
            excerpt(other),
            "expected a command string, a list, or an object",
        )),
    }
}

fn parse_item(value: &Value) -> Result<Step> {
    match value {
        Value::String(s) => Ok(Step::Command(s.clone())),
        Value::Object(map) => {
            if let Some(items) = map.get("parallel") {
                let items = items.as_array().ok_or_else(|| {
                    FlowError::parse(excerpt(value), "'parallel' must hold a list")
                })?;
                let steps = items.iter().map(parse_item).collect::<Result<Vec<_>>>()?;
                Ok(Step::Parallel(steps))
            } else if map.contains_key("run") {
                parse_named(value, map)
            } else if map.contains_key("tool") {
                parse_tool(value, map)
            } else {
                Err(FlowError::parse(
                    excerpt(value),
                    "object must carry 'parallel', 'run', or 'tool'",
                ))
            }
        }
        other => Err(FlowError::parse(
            excerpt(other),
            "expected a command string or an object",
        )),
    }
}

fn parse_named(value: &Value, map: &serde_json::Map<String, Value>) -> Result<Step> {
    let run = string_field(value, map, "run")?;
    let id = match map.get("id") {
        None => None,
        Some(_) => Some(string_field(value, map, "id")?),
    };
    let after = match map.get("after") {
        None => None,
        Some(Value::Array(ids)) => {
            let ids = ids
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        FlowError::parse(excerpt(value), "'after' entries must be node ids")
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Some(ids)
        }
        // A single id is accepted as shorthand for a one-element list.
        Some(Value::String(id)) => Some(vec![id.clone()]),
        Some(_) => {
            return Err(FlowError::parse(
                excerpt(value),
                "'after' must be a node id or a list of node ids",
            ));
        }
    };
    Ok(Step::Named { id, run, after })
}

fn parse_tool(value: &Value, map: &serde_json::Map<String, Value>) -> Result<Step> {
    let tool = string_field(value, map, "tool")?;
    let input = map.get("input").cloned().unwrap_or(Value::Null);
    Ok(Step::Tool { tool, input })
}

fn string_field(value: &Value, map: &serde_json::Map<String, Value>, key: &str) -> Result<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| FlowError::parse(excerpt(value), format!("'{key}' must be a string")))
}

/// A short single-line rendering of the offending value.
fn excerpt(value: &Value) -> String {
    let rendered = value.to_string();
    rendered.chars().take(48).collect()
}
