//! Field-level extraction. Every function here is pure and answers `None`
//! for both "absent" and "malformed"; none of them can fail a record.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Tag keywords in match priority order.
pub const CATEGORY_KEYWORDS: [&str; 6] = [
    "politics",
    "crypto",
    "sports",
    "science",
    "entertainment",
    "economics",
];

/// Scaled prices are rounded to this many steps per point so that
/// `0.62 * 100` lands on `62.0`.
const PRICE_PRECISION: f64 = 10_000.0;

/// A finite number from a JSON number or a numeric string.
pub fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// A non-negative integer count, truncating fractional input ("1234.5" → 1234).
pub fn integer(v: &Value) -> Option<i64> {
    let n = number(v)?;
    (n >= 0.0 && n < i64::MAX as f64).then(|| n.trunc() as i64)
}

/// A price already on the 0–100 scale (Kalshi cents).
pub fn percent(v: &Value) -> Option<f64> {
    number(v).and_then(in_range)
}

/// A 0–1 probability, scaled to 0–100.
pub fn probability(v: &Value) -> Option<f64> {
    number(v).and_then(|p| in_range(p * 100.0))
}

/// First element of an outcome-price array, scaled to 0–100.
/// Accepts a real JSON array or one encoded inside a string.
pub fn outcome_price(v: &Value) -> Option<f64> {
    let first = match v {
        Value::Array(items) => items.first()?.clone(),
        Value::String(s) => {
            let decoded: Value = serde_json::from_str(s).ok()?;
            decoded.as_array()?.first()?.clone()
        }
        _ => return None,
    };
    probability(&first)
}

fn in_range(p: f64) -> Option<f64> {
    let p = (p * PRICE_PRECISION).round() / PRICE_PRECISION;
    (0.0..=100.0).contains(&p).then_some(p)
}

/// Parse an expiry timestamp.
///
/// Accepts RFC 3339 (`Z` or numeric offset), offset-less date-times (read as
/// UTC), with `T` or space separators and optional fractional seconds, and
/// bare dates (midnight UTC).
pub fn expiry(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive = s.strip_suffix('Z').unwrap_or(s);
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(dt.and_utc());
        }
    }

    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Text of one tag: a plain string, or an object's `label` / `slug`.
pub fn tag_text(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.as_str(),
        Value::Object(o) => o
            .get("label")
            .and_then(|l| l.as_str())
            .or_else(|| o.get("slug").and_then(|l| l.as_str()))?,
        _ => return None,
    };
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Explicit category if present, else the first keyword hit across tags,
/// else the first tag verbatim.
pub fn category(explicit: Option<&str>, tags: &[Value]) -> Option<String> {
    if let Some(c) = explicit.map(str::trim).filter(|c| !c.is_empty()) {
        return Some(c.to_string());
    }

    let tags: Vec<String> = tags.iter().filter_map(tag_text).collect();
    for tag in &tags {
        let lower = tag.to_lowercase();
        if let Some(keyword) = CATEGORY_KEYWORDS.iter().find(|kw| lower.contains(*kw)) {
            return Some(capitalize(keyword));
        }
    }
    tags.into_iter().next()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
