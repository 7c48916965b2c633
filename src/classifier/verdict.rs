//! Model output → [`ClassificationVerdict`].
//!
//! Parsing never fails: anything that is not a well-formed verdict becomes
//! `Ignore` with a diagnostic.

use serde_json::{Map, Value};

/// Fault details reported with an alert. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertDetails {
    pub error_code: Option<String>,
    pub error_description: Option<String>,
    pub context: Option<String>,
    pub suggested_fix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationVerdict {
    Ignore { diagnostic: Option<String> },
    Alert(AlertDetails),
}

impl ClassificationVerdict {
    pub fn ignore_with(diagnostic: impl Into<String>) -> Self {
        ClassificationVerdict::Ignore {
            diagnostic: Some(diagnostic.into()),
        }
    }

    pub fn is_alert(&self) -> bool {
        matches!(self, ClassificationVerdict::Alert(_))
    }
}

/// Remove a surrounding ```` ```json ```` / ```` ``` ```` fence.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

pub fn parse_verdict(raw: &str) -> ClassificationVerdict {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return ClassificationVerdict::ignore_with("empty model response");
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return ClassificationVerdict::ignore_with(format!("invalid JSON: {e}")),
    };
    let Value::Object(obj) = value else {
        return ClassificationVerdict::ignore_with("response is not a JSON object");
    };

    let status = match obj.get("status") {
        Some(Value::String(s)) => s.trim().to_ascii_lowercase(),
        Some(_) => return ClassificationVerdict::ignore_with("'status' is not a string"),
        None => return ClassificationVerdict::ignore_with("missing 'status'"),
    };

    match status.as_str() {
        "ignore" => ClassificationVerdict::Ignore { diagnostic: None },
        "alert" => ClassificationVerdict::Alert(AlertDetails {
            error_code: field(&obj, "error_code"),
            error_description: field(&obj, "error_description"),
            context: field(&obj, "context"),
            suggested_fix: field(&obj, "solution"),
        }),
        other => ClassificationVerdict::ignore_with(format!("unknown status '{other}'")),
    }
}

fn field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
