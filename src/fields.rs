//! Lenient readers for rows that arrive as JSON objects from imported
//! spreadsheets: numbers and strings are interchangeable, blanks are absent.

use serde_json::Value;

pub fn text(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn int(row: &Value, key: &str) -> Option<i64> {
    match row.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn flag(row: &Value, key: &str) -> Option<bool> {
    match row.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => parse_flag(s),
        _ => None,
    }
}

/// Accepts the spellings seen in exported rosters and schedules.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "oui" | "o" | "x" => Some(true),
        "false" | "0" | "no" | "n" | "non" | "" => Some(false),
        _ => None,
    }
}
