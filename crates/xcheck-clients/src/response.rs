//! Model output parsing.

use std::collections::BTreeMap;

use serde_json::Value;
use xcheck_core::RawAnswer;

use crate::error::{ClientError, Result};

/// Parse a model's text output into field answers.
///
/// Accepts bare JSON, JSON wrapped in a Markdown code fence, or JSON embedded
/// in surrounding prose. The top level must be an object.
pub fn parse_answers(text: &str) -> Result<BTreeMap<String, RawAnswer>> {
    let body = strip_code_fence(text.trim());
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => match embedded_object(body) {
            Some(inner) => serde_json::from_str(inner)?,
            None => return Err(err.into()),
        },
    };

    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(field, answer)| (field, RawAnswer::from_json(answer)))
            .collect()),
        other => Err(ClientError::InvalidResponse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Drop an opening ```` ```json ```` line and the closing fence.
fn strip_code_fence(text: &str) -> &str {
    if !text.starts_with("```") {
        return text;
    }
    let body = match text.find('\n') {
        Some(newline) => &text[newline + 1..],
        None => return "",
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
