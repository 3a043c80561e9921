//! Defensive parsing of completion output.
//!
//! Models wrap JSON in prose or markdown fences, return bare arrays, or
//! return an object with the rows under some key. Anything we cannot turn
//! into at least one row is `Unparseable` and goes to the placeholder path.

use crate::dump_store::Row;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Parsed {
        rows: Vec<Row>,
        narrative: Option<String>,
    },
    Unparseable(String),
}

const ROW_KEYS: &[&str] = &["data", "rows", "data_points", "results", "items"];
const NARRATIVE_KEYS: &[&str] = &["summary", "narrative", "explanation", "insight", "answer"];

/// Parse model output into at most `max_points` rows
pub fn parse_completion(text: &str, max_points: usize) -> ParsedResponse {
    let Some(value) = extract_json(text) else {
        return ParsedResponse::Unparseable("no JSON found in completion".to_string());
    };

    let (rows, narrative) = match value {
        Value::Array(items) => (objects(items), None),
        Value::Object(mut map) => {
            let narrative = NARRATIVE_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(|v| v.as_str()).map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty());
            let rows = ROW_KEYS
                .iter()
                .find_map(|k| match map.remove(*k) {
                    Some(Value::Array(items)) => Some(objects(items)),
                    _ => None,
                })
                .unwrap_or_default();
            (rows, narrative)
        }
        other => {
            return ParsedResponse::Unparseable(format!("unexpected JSON value: {}", other));
        }
    };

    if rows.is_empty() {
        return ParsedResponse::Unparseable("completion contained no data rows".to_string());
    }

    let mut rows = rows;
    rows.truncate(max_points.max(1));
    ParsedResponse::Parsed { rows, narrative }
}

fn objects(items: Vec<Value>) -> Vec<Row> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) if !map.is_empty() => Some(map),
            _ => None,
        })
        .collect()
}

/// Find a JSON document in free text: fenced block first, then the whole
/// text, then the widest `{...}` or `[...]` span.
fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let after_start = &trimmed[start + fence.len()..];
            if let Some(end) = after_start.find("```") {
                if let Ok(v) = serde_json::from_str(after_start[..end].trim()) {
                    return Some(v);
                }
            }
        }
    }

    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(v);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_with_rows_and_summary() {
        let text = r#"Here you go:
```json
{"summary": "EV volume fell in the Northeast.", "data": [
  {"dealer": "Apex Motors", "region": "Northeast", "volume": 120},
  {"dealer": "Metro Wheels", "region": "South", "volume": 95}
]}
```"#;
        match parse_completion(text, 10) {
            ParsedResponse::Parsed { rows, narrative } => {
                assert_eq!(rows.len(), 2);
                assert_eq!(narrative.as_deref(), Some("EV volume fell in the Northeast."));
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_array_in_prose_is_truncated() {
        let items: Vec<String> = (0..14)
            .map(|i| format!(r#"{{"label":"l{}","value":{}}}"#, i, i))
            .collect();
        let text = format!("Sure! [{}] Hope that helps.", items.join(","));
        match parse_completion(&text, 10) {
            ParsedResponse::Parsed { rows, narrative } => {
                assert_eq!(rows.len(), 10);
                assert!(narrative.is_none());
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn test_prose_only_is_unparseable() {
        assert!(matches!(
            parse_completion("Sales dropped because of a supply issue.", 10),
            ParsedResponse::Unparseable(_)
        ));
    }

    #[test]
    fn test_object_without_rows_is_unparseable() {
        assert!(matches!(
            parse_completion(r#"{"summary": "no data"}"#, 10),
            ParsedResponse::Unparseable(_)
        ));
    }
}
