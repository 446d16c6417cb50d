//! Parse-or-fallback contract for the model's structured reply.
//!
//! The model is asked for a JSON object but may return anything; parse
//! failure is never an error at this level, it just downgrades to the raw
//! text.

use serde_json::Value;

#[derive(Debug)]
pub enum ModelOutput {
    /// The reply parsed as the expected JSON object.
    Parsed(ParsedAnswer),
    /// The reply was not a JSON object; the trimmed raw text stands in.
    Raw(String),
}

#[derive(Debug, Default)]
pub struct ParsedAnswer {
    pub answer: String,
    pub action: Option<String>,
    pub confidence: f64,
    pub sources: Option<Vec<String>>,
}

pub fn parse_model_output(raw: &str) -> ModelOutput {
    match extract_json_object(raw) {
        Some(value) => ModelOutput::Parsed(ParsedAnswer {
            answer: field_as_string(&value, "answer"),
            action: value
                .get("action")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_uppercase()),
            confidence: value
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            sources: value.get("sources").and_then(|v| v.as_array()).map(|items| {
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            }),
        }),
        None => ModelOutput::Raw(raw.trim().to_string()),
    }
}

/// Locates the outermost `{...}` in the reply and parses it. Markdown code
/// fences and surrounding prose fall away for free: they sit outside the
/// braces.
fn extract_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end < start {
        return None;
    }

    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    }
}

fn field_as_string(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
