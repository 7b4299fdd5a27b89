//! Tolerant extraction of plan steps from untrusted oracle text.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

const NAME_KEYS: &[&str] = &["capability", "tool_name", "tool", "action"];
const PARAMETER_KEYS: &[&str] = &["parameters", "input_data", "input", "params"];
const POSITION_KEYS: &[&str] = &["position", "step_number", "step"];
const RATIONALE_KEYS: &[&str] = &["rationale", "reasoning"];

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*\n?(.*?)```").ok())
        .as_ref()
}

/// A step as read from the payload, before registry validation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawStep {
    pub capability: String,
    pub parameters: Map<String, Value>,
    pub description: Option<String>,
    pub rationale: Option<String>,
    pub position: Option<usize>,
}

/// Locate the JSON payload in `text`.
///
/// Candidates are the whole text, then values inside fenced code blocks,
/// then values starting at any `[` or `{` of the raw text. The first
/// candidate holding at least one readable step wins; otherwise the first
/// array or object found is returned.
pub(crate) fn extract_payload(text: &str) -> Option<Value> {
    let whole = serde_json::from_str::<Value>(text.trim()).ok();
    let fenced = fence_regex()
        .into_iter()
        .flat_map(|fence| fence.captures_iter(text))
        .filter_map(|caps| caps.get(1))
        .flat_map(|body| json_values(body.as_str()));

    let mut first_container = None;
    for value in whole.into_iter().chain(fenced).chain(json_values(text)) {
        if !(value.is_array() || value.is_object()) {
            continue;
        }
        if holds_steps(&value) {
            return Some(value);
        }
        first_container.get_or_insert(value);
    }
    first_container
}

/// Every JSON value that parses starting at a `[` or `{` in `text`.
fn json_values(text: &str) -> impl Iterator<Item = Value> + '_ {
    text.char_indices()
        .filter(|(_, c)| *c == '[' || *c == '{')
        .filter_map(move |(idx, _)| {
            serde_json::Deserializer::from_str(&text[idx..])
                .into_iter::<Value>()
                .next()
                .and_then(Result::ok)
        })
}

fn holds_steps(payload: &Value) -> bool {
    step_values(payload.clone())
        .iter()
        .any(|value| parse_step(value).is_ok())
}

/// The list of candidate step values inside a payload.
///
/// Accepts a bare array, an object carrying `steps` or `plan`, or a single
/// step object.
pub(crate) fn step_values(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in ["steps", "plan"] {
                if let Some(inner) = map.remove(key) {
                    return match inner {
                        Value::Array(items) => items,
                        Value::Object(_) => step_values(inner),
                        _ => Vec::new(),
                    };
                }
            }
            if NAME_KEYS.iter().any(|k| map.contains_key(*k)) {
                vec![Value::Object(map)]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

/// Read one step. `Err` carries the reason it was discarded.
pub(crate) fn parse_step(value: &Value) -> Result<RawStep, &'static str> {
    let obj = value.as_object().ok_or("step is not an object")?;

    let capability = first_of(obj, NAME_KEYS)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("step has no capability name")?
        .to_string();

    let parameters = match first_of(obj, PARAMETER_KEYS) {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => return Err("step has no parameters"),
        Some(_) => return Err("step parameters are not an object"),
    };

    let position = first_of(obj, POSITION_KEYS).and_then(|v| match v {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });

    Ok(RawStep {
        capability,
        parameters,
        description: text_field(obj, &["description"]),
        rationale: text_field(obj, RATIONALE_KEYS),
        position,
    })
}

fn first_of<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    first_of(obj, keys)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
