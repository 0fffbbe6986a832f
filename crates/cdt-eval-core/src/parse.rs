//! Response content parsing: structured JSON first, then code-shaped tokens.

use crate::model::{ClassificationResponse, CodeSet, CodeSuggestion};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref CODE_TOKEN: Regex = Regex::new(r"\bD\d{4}\b").unwrap();
}

/// Parse assistant message content. Never fails: content that is not structured
/// degrades to regex extraction, and to `Unparseable` when nothing code-shaped remains.
pub fn parse_content(raw: &str) -> ClassificationResponse {
    if let Some(resp) = parse_structured(raw) {
        return resp;
    }

    let codes = extract_code_tokens(raw);
    if codes.is_empty() {
        ClassificationResponse::Unparseable {
            raw: raw.to_string(),
        }
    } else {
        ClassificationResponse::RawFallback {
            raw: raw.to_string(),
            codes,
        }
    }
}

/// All distinct `D####` tokens in `text`.
pub fn extract_code_tokens(text: &str) -> CodeSet {
    CODE_TOKEN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn parse_structured(raw: &str) -> Option<ClassificationResponse> {
    let trimmed = raw.trim();
    if let Ok(val) = serde_json::from_str::<Value>(trimmed) {
        if let Some(resp) = structured_from_value(raw, &val) {
            return Some(resp);
        }
    }

    // JSON object embedded in prose or a markdown fence: try each '{' in order.
    for (idx, _) in trimmed.match_indices('{') {
        let segment = &trimmed[idx..];
        let Some(Ok(val)) = serde_json::Deserializer::from_str(segment)
            .into_iter::<Value>()
            .next()
        else {
            continue;
        };
        if let Some(resp) = structured_from_value(raw, &val) {
            return Some(resp);
        }
    }
    None
}

fn structured_from_value(raw: &str, val: &Value) -> Option<ClassificationResponse> {
    let entries = val.get("cdt_codes")?.as_array()?;

    let mut suggestions: Vec<CodeSuggestion> = Vec::new();
    let mut codes = CodeSet::new();
    for entry in entries {
        let code = match entry.get("code") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Null) | None => continue,
            Some(other) => other.to_string(),
        };
        if code.is_empty() || code.eq_ignore_ascii_case("N/A") {
            continue;
        }
        // First occurrence wins for duplicate codes.
        if !codes.insert(code.clone()) {
            continue;
        }
        suggestions.push(CodeSuggestion {
            code,
            description: entry
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            confidence: entry
                .get("confidence")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    Some(ClassificationResponse::Structured {
        raw: raw.to_string(),
        codes,
        suggestions,
        explanation: val
            .get("explanation")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
