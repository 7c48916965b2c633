//! Alert message rendering.

use crate::classifier::AlertDetails;
use crate::defaults;
use crate::telephony::CallRecord;
use chrono::FixedOffset;

/// Built-in layout, used when no `alert_template.txt` is present.
pub const DEFAULT_TEMPLATE: &str = "\u{1f7e5} LOST SALE (MANAGER FAULT)

\u{2699}\u{fe0f} Error: {error_code} - {error_description}
\u{1f4de} Client: {client_phone}
\u{1f552} Call: {call_time} ({call_id})
\u{1f4cb} Context: {context}

\u{27a1}\u{fe0f} How it could have been saved: {solution}";

#[derive(Debug, Clone)]
pub struct AlertFormatter {
    template: String,
    offset: FixedOffset,
    max_chars: usize,
}

impl AlertFormatter {
    /// `template` of `None` selects [`DEFAULT_TEMPLATE`].
    pub fn new(template: Option<String>, offset: FixedOffset) -> Self {
        Self {
            template: template.unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            offset,
            max_chars: defaults::ALERT_MAX_CHARS,
        }
    }

    /// Render the alert. Absent or blank values become `N/A`, an absent
    /// error code becomes `UNKNOWN`.
    pub fn format(&self, details: &AlertDetails, call: &CallRecord) -> String {
        let or_na = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults::NOT_AVAILABLE)
                .to_string()
        };
        let error_code = details
            .error_code
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults::UNKNOWN_ERROR_CODE)
            .to_string();

        let values = [
            ("error_code", error_code),
            ("error_description", or_na(&details.error_description)),
            ("client_phone", or_na(&call.client_number())),
            ("context", or_na(&details.context)),
            ("solution", or_na(&details.suggested_fix)),
            ("call_time", call.local_start(self.offset)),
            ("call_id", call.id.clone()),
        ];

        truncate(&render(&self.template, &values), self.max_chars)
    }
}

/// Single pass over the template; substituted values are never re-scanned.
fn render(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (value, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('\u{2026}');
    cut
}
