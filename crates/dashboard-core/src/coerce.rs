/// Defensive parse-and-coerce helpers for loosely typed store rows.
///
/// Every helper takes the raw field (`row.get("col")`) and never fails:
/// malformed input becomes a documented safe default (0, empty string,
/// empty list, `now`) instead of an error.
use crate::{Row, SourceMix};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Parse an ISO-ish timestamp: RFC 3339, a naive datetime (read as UTC) or a
/// bare date (midnight UTC).
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Timestamp field, or `now` when it is missing or unparseable.
pub fn timestamp_or(value: Option<&Value>, now: DateTime<Utc>) -> DateTime<Utc> {
    match value {
        Some(Value::String(text)) => parse_timestamp(text).unwrap_or(now),
        _ => now,
    }
}

/// Finite number, or `None` for null, empty string and non-numeric input.
pub fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                s.parse::<f64>().ok()
            }
        }
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

pub fn number_or_zero(value: Option<&Value>) -> f64 {
    number(value).unwrap_or(0.0)
}

pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return min;
    }
    value.max(min).min(max)
}

/// Probability-like score clamped to [0, 1].
pub fn score(value: Option<&Value>) -> f64 {
    clamp(number_or_zero(value), 0.0, 1.0)
}

pub fn integer(value: Option<&Value>) -> i64 {
    number(value).map(|n| n.trunc() as i64).unwrap_or(0)
}

/// Non-negative rounded count.
pub fn count(value: Option<&Value>) -> u32 {
    number(value).map(|n| n.max(0.0).round().min(u32::MAX as f64) as u32).unwrap_or(0)
}

/// String form of a scalar field. Objects, arrays and null become "".
pub fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Like `text`, with `fallback` for an empty value.
pub fn text_or(value: Option<&Value>, fallback: &str) -> String {
    let raw = text(value);
    if raw.is_empty() {
        fallback.to_string()
    } else {
        raw
    }
}

pub fn upper_text(value: Option<&Value>) -> String {
    text(value).trim().to_uppercase()
}

/// Loose truthiness: non-empty strings, non-zero numbers and `true`.
pub fn boolean(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && f.is_finite()).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        _ => false,
    }
}

/// Positive integer ids from an array field.
pub fn id_list(value: Option<&Value>) -> Vec<i64> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| integer(Some(item)))
            .filter(|id| *id > 0)
            .collect(),
        _ => Vec::new(),
    }
}

/// Trimmed, non-empty strings from an array field, capped at `cap`.
pub fn string_list(value: Option<&Value>, cap: usize) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| text(Some(item)).trim().to_string())
            .filter(|item| !item.is_empty())
            .take(cap)
            .collect(),
        _ => Vec::new(),
    }
}

/// Catalysts are stored either as plain strings or as
/// `{"event_type": "...", "count": n}` objects.
pub fn catalyst_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.trim().to_string(),
            Value::Object(obj) => {
                let event_type = text(obj.get("event_type")).trim().to_string();
                let count = number_or_zero(obj.get("count"));
                if event_type.is_empty() {
                    String::new()
                } else if count > 0.0 {
                    format!("{} x{}", event_type, count)
                } else {
                    event_type
                }
            }
            _ => String::new(),
        })
        .filter(|item| !item.is_empty())
        .take(5)
        .collect()
}

/// Only the finite numeric entries of an object field.
pub fn number_map(value: Option<&Value>) -> BTreeMap<String, f64> {
    let Some(Value::Object(obj)) = value else {
        return BTreeMap::new();
    };
    obj.iter()
        .filter_map(|(key, raw)| number(Some(raw)).map(|n| (key.clone(), n)))
        .collect()
}

pub fn object_list(value: Option<&Value>) -> Vec<Row> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    }
}

/// Borrow an object field, or nothing when the field is any other shape.
pub fn object(value: Option<&Value>) -> Option<&Row> {
    value.and_then(Value::as_object)
}

pub fn source_mix(value: Option<&Value>, now: DateTime<Utc>) -> Option<SourceMix> {
    let row = object(value)?;
    let x_count = number_or_zero(row.get("x_count")).max(0.0);
    let article_count = number_or_zero(row.get("article_count")).max(0.0);
    let other_count = number_or_zero(row.get("other_count")).max(0.0);
    let source_total = number(row.get("source_total"))
        .unwrap_or(x_count + article_count + other_count)
        .max(1.0);

    Some(SourceMix {
        x_count: x_count.round() as u32,
        article_count: article_count.round() as u32,
        other_count: other_count.round() as u32,
        source_total: source_total.round() as u32,
        x_ratio: score(row.get("x_ratio")),
        mixed_sources: boolean(row.get("mixed_sources")),
        top_x_handles: string_list(row.get("top_x_handles"), 3),
        latest_x_at: timestamp_or(row.get("latest_x_at"), now),
        latest_news_at: timestamp_or(row.get("latest_news_at"), now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2026-03-01T09:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01T17:30:00+08:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01T09:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01 09:30:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2026-03-01"),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_timestamp_falls_back_to_now() {
        assert_eq!(timestamp_or(None, now()), now());
        assert_eq!(timestamp_or(Some(&json!(42)), now()), now());
        assert_eq!(timestamp_or(Some(&json!("garbage")), now()), now());
    }

    #[test]
    fn test_score_clamping() {
        assert_eq!(score(Some(&json!(1.4))), 1.0);
        assert_eq!(score(Some(&json!(-0.2))), 0.0);
        assert_eq!(score(Some(&json!("0.35"))), 0.35);
        assert_eq!(score(Some(&json!("n/a"))), 0.0);
        assert_eq!(score(Some(&Value::Null)), 0.0);
        assert_eq!(score(None), 0.0);
    }

    #[test]
    fn test_lists() {
        let raw = json!([" a ", "", "b", 3, null, "c", "d", "e", "f"]);
        assert_eq!(string_list(Some(&raw), 5), vec!["a", "b", "3", "c", "d"]);
        assert_eq!(id_list(Some(&json!([1, "2", 0, -3, "x", 4.0]))), vec![1, 2, 4]);
        assert!(id_list(Some(&json!("1,2"))).is_empty());
    }

    #[test]
    fn test_catalysts_accept_objects() {
        let raw = json!(["earnings beat", {"event_type": "macro", "count": 2}, {"event_type": "flow"}, {"count": 3}, 7]);
        assert_eq!(catalyst_list(Some(&raw)), vec!["earnings beat", "macro x2", "flow"]);
    }

    #[test]
    fn test_number_map_skips_non_numeric() {
        let raw = json!({"momentum": 0.4, "value": "1.5", "note": "high", "nested": {}});
        let map = number_map(Some(&raw));
        assert_eq!(map.len(), 2);
        assert_eq!(map["value"], 1.5);
    }

    #[test]
    fn test_source_mix_normalization() {
        let raw = json!({
            "x_count": 3.6,
            "article_count": -2,
            "x_ratio": 1.7,
            "mixed_sources": 1,
            "top_x_handles": ["@a", " ", "@b", "@c", "@d"]
        });
        let mix = source_mix(Some(&raw), now()).unwrap();
        assert_eq!(mix.x_count, 4);
        assert_eq!(mix.article_count, 0);
        assert_eq!(mix.source_total, 4);
        assert_eq!(mix.x_ratio, 1.0);
        assert!(mix.mixed_sources);
        assert_eq!(mix.top_x_handles, vec!["@a", "@b", "@c"]);
        assert_eq!(mix.latest_x_at, now());
        assert!(source_mix(Some(&json!([1, 2])), now()).is_none());
    }
}
