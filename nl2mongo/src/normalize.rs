//! Model output normalization.
//!
//! Responsibilities:
//! - Recover the first JSON object from a raw completion that may be wrapped
//!   in markdown fences or prose.
//! - Repair the malformations small models actually produce (trailing
//!   commas, single-quoted strings).
//! - Map the loose vocabulary models emit onto the strict `Action` wire
//!   shape: safe read defaults, and an explicit empty filter for writes so
//!   scope checks happen at validation, not as a parse failure.
//!
//! Everything here is pure string/value manipulation; no I/O.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::types::Action;

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma pattern"));

pub struct ResponseNormalizer;

impl ResponseNormalizer {
    /// Raw completion text in, structured action out.
    ///
    /// `preview_limit` is backfilled into reads that carry no explicit limit
    /// so a missing option can never mean "unbounded".
    pub fn normalize(raw: &str, preview_limit: i64) -> Result<Action, EngineError> {
        let candidate = extract_json_object(raw)
            .ok_or_else(|| EngineError::malformed("no JSON object found", raw))?;

        let mut value = parse_with_repairs(candidate, raw)?;
        apply_aliases(&mut value);
        backfill_defaults(&mut value, preview_limit);

        serde_json::from_value::<Action>(value)
            .map_err(|e| EngineError::malformed(e.to_string(), raw))
    }
}

/// First balanced `{...}` in the text, tracking string/escape state so braces
/// inside string values do not unbalance the scan. Fences and surrounding
/// prose fall away for free: the scan starts at the first `{`.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses the candidate, escalating through repairs: as-is, then with
/// trailing commas removed, then with single quotes rewritten to double
/// quotes. The quote rewrite is a last resort since it also hits apostrophes
/// inside legitimate strings.
fn parse_with_repairs(candidate: &str, raw: &str) -> Result<Value, EngineError> {
    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Ok(value);
    }

    let without_commas = TRAILING_COMMA.replace_all(candidate, "$1");
    if let Ok(value) = serde_json::from_str::<Value>(&without_commas) {
        return Ok(value);
    }

    let requoted = without_commas.replace('\'', "\"");
    serde_json::from_str::<Value>(&requoted)
        .map_err(|e| EngineError::malformed(format!("unparseable JSON: {}", e), raw))
}

/// Folds the synonyms models emit onto the canonical key names, and
/// lowercases the action verb.
fn apply_aliases(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };

    for (alias, canonical) in [
        ("operation", "action"),
        ("collectionName", "collection"),
        ("collection_name", "collection"),
        ("filter", "query"),
    ] {
        if !obj.contains_key(canonical) {
            if let Some(v) = obj.remove(alias) {
                obj.insert(canonical.to_string(), v);
            }
        }
    }

    if let Some(Value::String(verb)) = obj.get_mut("action") {
        *verb = verb.to_lowercase();
    }

    // The insert payload arrives under `documents`, `document` or `insert`,
    // as one object or an array; the wire shape wants a `documents` array.
    if obj.get("action").and_then(Value::as_str) == Some("insert")
        && !obj.contains_key("documents")
    {
        let payload = obj.remove("document").or_else(|| obj.remove("insert"));
        if let Some(payload) = payload {
            let documents = match payload {
                Value::Array(items) => Value::Array(items),
                single => Value::Array(vec![single]),
            };
            obj.insert("documents".to_string(), documents);
        }
    }
}

/// Safe defaults: a missing filter becomes an explicit empty one (for a find
/// that means "match all"; for a delete or update it puts the empty-scope
/// decision in the validator's hands, where it is BLOCKED, instead of dying
/// here as a missing field), and a find with no limit gets the preview
/// limit. Aggregates are left untouched: their pipeline runs verbatim.
fn backfill_defaults(value: &mut Value, preview_limit: i64) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    let verb = obj
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if matches!(verb.as_str(), "find" | "update" | "delete") && !obj.contains_key("query") {
        obj.insert("query".to_string(), json!({}));
    }

    if verb == "find" {
        let options = obj
            .entry("options")
            .or_insert_with(|| json!({}));
        if let Some(options) = options.as_object_mut() {
            if !options.contains_key("limit") {
                options.insert("limit".to_string(), json!(preview_limit));
            }
        }
    }
}
