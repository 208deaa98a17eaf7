//! Response Validator/Repair — the single entry point that turns raw AI text
//! into a `Plan`.
//!
//! Steps: trim → strip code fences → locate the JSON object → parse →
//! check structure → read fields leniently.
//!
//! Only the structure is enforced (`metadata` object, non-empty `rows`).
//! Field types and the percentage total are advisory: the AI is untrusted
//! free text, so fields are coerced instead of rejected.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::planning::models::{Plan, PlanMetadata, PlanRow};

/// Characters of the candidate payload quoted back in parse errors.
const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseDefect {
    Truncated,
    Malformed,
    SchemaViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidAiResponse {
    #[error(
        "The AI returned invalid JSON. The response appears to have been truncated: \
         try a shorter unit or less content.\n\nStart of the response: \"{snippet}...\""
    )]
    Truncated { snippet: String },

    #[error("The AI returned invalid JSON. Try again.\n\nStart of the response: \"{snippet}...\"")]
    Malformed { snippet: String },

    #[error("The AI response does not have the expected structure: {detail}")]
    SchemaViolation { detail: String },
}

impl InvalidAiResponse {
    pub fn kind(&self) -> ResponseDefect {
        match self {
            Self::Truncated { .. } => ResponseDefect::Truncated,
            Self::Malformed { .. } => ResponseDefect::Malformed,
            Self::SchemaViolation { .. } => ResponseDefect::SchemaViolation,
        }
    }

    fn schema(detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            detail: detail.into(),
        }
    }
}

/// Parses raw AI output into a validated `Plan`.
pub fn parse_plan(raw: &str) -> Result<Plan, InvalidAiResponse> {
    let candidate = locate_json_object(strip_json_fences(raw));

    let value: Value = serde_json::from_str(candidate).map_err(|_| {
        let snippet: String = candidate.chars().take(SNIPPET_CHARS).collect();
        if candidate.trim_end().ends_with('}') {
            InvalidAiResponse::Malformed { snippet }
        } else {
            InvalidAiResponse::Truncated { snippet }
        }
    })?;

    let root = value
        .as_object()
        .ok_or_else(|| InvalidAiResponse::schema("the response is not a JSON object"))?;
    let metadata = root
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or_else(|| InvalidAiResponse::schema("missing 'metadata' object"))?;
    let rows = root
        .get("rows")
        .and_then(Value::as_array)
        .ok_or_else(|| InvalidAiResponse::schema("missing 'rows' list"))?;
    if rows.is_empty() {
        return Err(InvalidAiResponse::schema("the plan contains no rows"));
    }

    let rows = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            row.as_object()
                .map(read_row)
                .ok_or_else(|| InvalidAiResponse::schema(format!("row {} is not an object", i + 1)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Plan {
        metadata: read_metadata(metadata),
        rows,
        universal_design_notes: text_field(root, "universal_design_notes"),
    })
}

/// Strips a leading ```` ``` ```` fence (with or without a language tag) and a
/// trailing one.
fn strip_json_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let tag_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let is_tag = rest[..tag_len]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        text = if is_tag { &rest[tag_len..] } else { rest };
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Finds the first `{` and scans to its matching `}`, skipping braces inside
/// string literals. An object that never closes runs to the end of the text;
/// text without any `{` is returned as is.
fn locate_json_object(text: &str) -> &str {
    let Some(start) = text.find('{') else {
        return text;
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return &text[start..start + offset + 1];
                }
            }
            _ => {}
        }
    }
    &text[start..]
}

fn read_metadata(obj: &Map<String, Value>) -> PlanMetadata {
    PlanMetadata {
        academic_year: text_field(obj, "academic_year"),
        level: text_field(obj, "level"),
        stage: text_field(obj, "stage"),
        group: text_field(obj, "group"),
        unit_title: text_field(obj, "unit_title"),
        justification: text_field(obj, "justification"),
    }
}

fn read_row(obj: &Map<String, Value>) -> PlanRow {
    PlanRow {
        key_competences: text_field(obj, "key_competences"),
        same_area_criterion: text_field(obj, "same_area_criterion"),
        related_area_criterion: text_field(obj, "related_area_criterion"),
        foundational_knowledge: text_field(obj, "foundational_knowledge"),
        specific_knowledge: text_field(obj, "specific_knowledge"),
        evaluation_criteria: text_field(obj, "evaluation_criteria"),
        achievement_indicators: text_field(obj, "achievement_indicators"),
        percentage: percentage_field(obj, "percentage"),
        evaluation_instruments: text_field(obj, "evaluation_instruments"),
        timing: text_field(obj, "timing"),
        activities: text_field(obj, "activities"),
        resources: text_field(obj, "resources"),
        space: text_field(obj, "space"),
    }
}

/// Strings as is, scalars stringified, lists of scalars one per line,
/// anything else empty.
fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| !item.is_object() && !item.is_array() && !item.is_null())
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::Null) | Some(Value::Object(_)) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Numbers as is; strings like "0.04", "0,04" or "4%" are converted.
fn percentage_field(obj: &Map<String, Value>, key: &str) -> f64 {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => {
            let s = s.trim();
            let (digits, is_percent) = match s.strip_suffix('%') {
                Some(d) => (d.trim(), true),
                None => (s, false),
            };
            digits
                .replace(',', ".")
                .parse::<f64>()
                .map(|v| if is_percent { v / 100.0 } else { v })
                .unwrap_or(0.0)
        }
        _ => 0.0,
    }
}
