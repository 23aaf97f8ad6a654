//! Response Parser — turns the model's raw text into validated `InsightRecord`s.
//!
//! Models wrap JSON in code fences or talk around it, sometimes with bracketed
//! asides like "reviews [1] and [2]". The parser tries every `[` or `{` as the
//! start of a JSON value and keeps the first one shaped like an insight payload.
//! Every element is checked against the insight schema; elements that fail are
//! reported in `ParsedResponse::rejected` and dropped, the rest are kept verbatim.

use serde_json::{Deserializer, Map, Value};
use thiserror::Error;

use crate::models::insight::InsightRecord;

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON found in model output: {preview:?}")]
    NoJson { preview: String },

    #[error("invalid JSON in model output: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("expected a JSON array of insights, got {0}")]
    UnexpectedShape(&'static str),

    #[error("insight #{index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("insight #{index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("insight #{index} has invalid '{field}': {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },
}

/// Result of parsing one model response.
#[derive(Debug, Default)]
pub struct ParsedResponse {
    pub insights: Vec<InsightRecord>,
    /// Elements that did not match the schema, in response order.
    pub rejected: Vec<ParseError>,
}

/// Parses a raw model response into insight records.
///
/// Returns `Err` (and no records) when the text holds no usable JSON. Individual
/// malformed elements do not fail the whole response.
pub fn parse_insights(raw: &str) -> Result<ParsedResponse, ParseError> {
    let elements = match extract_json(raw)? {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("insights") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(ParseError::UnexpectedShape("a non-array 'insights' field")),
            // a lone insight object
            None => vec![Value::Object(obj)],
        },
        _ => return Err(ParseError::UnexpectedShape("a scalar value")),
    };

    let mut parsed = ParsedResponse::default();
    for (index, element) in elements.iter().enumerate() {
        match validate_insight(index, element) {
            Ok(insight) => parsed.insights.push(insight),
            Err(e) => parsed.rejected.push(e),
        }
    }
    Ok(parsed)
}

/// Finds and decodes the JSON payload inside `raw`.
///
/// Candidates are decoded left to right from each `[` or `{`. The first one
/// that looks like insights wins: an array holding objects (or empty), an
/// `{"insights": [...]}` wrapper, or an object with `source_row`. Otherwise the
/// first JSON value seen is returned so its elements get rejected one by one.
/// A value cut off by the end of the text is `InvalidJson`, since every later
/// bracket sits inside it.
pub fn extract_json(raw: &str) -> Result<Value, ParseError> {
    let mut fallback: Option<Value> = None;
    let mut first_error: Option<serde_json::Error> = None;
    let mut pos = 0;

    while let Some(offset) = raw[pos..].find(|c: char| c == '[' || c == '{') {
        let start = pos + offset;
        let mut values = Deserializer::from_str(&raw[start..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) if looks_like_insights(&value) => return Ok(value),
            Some(Ok(value)) => {
                fallback.get_or_insert(value);
                // skip brackets nested inside the value just read
                pos = start + values.byte_offset().max(1);
            }
            Some(Err(e)) if e.is_eof() => return Err(ParseError::InvalidJson(e)),
            Some(Err(e)) => {
                first_error.get_or_insert(e);
                pos = start + 1;
            }
            None => break,
        }
    }

    match (fallback, first_error) {
        (Some(value), _) => Ok(value),
        (None, Some(e)) => Err(ParseError::InvalidJson(e)),
        (None, None) => Err(ParseError::NoJson {
            preview: raw.chars().take(PREVIEW_CHARS).collect(),
        }),
    }
}

fn looks_like_insights(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty() || items.iter().any(Value::is_object),
        Value::Object(obj) => {
            matches!(obj.get("insights"), Some(Value::Array(_))) || obj.contains_key("source_row")
        }
        _ => false,
    }
}

fn validate_insight(index: usize, element: &Value) -> Result<InsightRecord, ParseError> {
    let obj = element
        .as_object()
        .ok_or(ParseError::NotAnObject { index })?;

    let source_row = match obj.get("source_row") {
        None | Some(Value::Null) => {
            return Err(ParseError::MissingField {
                index,
                field: "source_row",
            })
        }
        Some(v) => v.as_u64().ok_or_else(|| ParseError::InvalidField {
            index,
            field: "source_row",
            reason: format!("expected a non-negative integer, got {v}"),
        })?,
    };

    let confidence = match obj.get("confidence") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let c = v.as_f64().ok_or_else(|| ParseError::InvalidField {
                index,
                field: "confidence",
                reason: format!("expected a number, got {v}"),
            })?;
            if !(0.0..=1.0).contains(&c) {
                return Err(ParseError::InvalidField {
                    index,
                    field: "confidence",
                    reason: format!("{c} is outside 0.0–1.0"),
                });
            }
            Some(c)
        }
    };

    Ok(InsightRecord {
        source_row,
        category: required_text(obj, index, "category")?,
        component: required_text(obj, index, "component")?,
        summary: required_text(obj, index, "summary")?,
        confidence,
    })
}

fn required_text(
    obj: &Map<String, Value>,
    index: usize,
    field: &'static str,
) -> Result<String, ParseError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ParseError::MissingField { index, field }),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ParseError::InvalidField {
            index,
            field,
            reason: "empty string".to_string(),
        }),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ParseError::InvalidField {
            index,
            field,
            reason: format!("expected a string, got {other}"),
        }),
    }
}
