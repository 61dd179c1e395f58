//! InfluxDB line protocol encoding.
//!
//! ```text
//! measurement,tag=value field=1i,other=0.5 1700000000000000000
//! ```

use chrono::{DateTime, Utc};
use fleetmon_common::types::{FieldValue, MetricPoint};
use std::fmt::Write;

/// Encodes one point, or `None` when it has no encodable field.
///
/// Tags with an empty value are dropped and non-finite floats are skipped,
/// since the line protocol accepts neither.
pub fn encode_point(point: &MetricPoint) -> Option<String> {
    let fields: Vec<String> = point
        .fields
        .iter()
        .filter_map(|(name, value)| {
            let value = match value {
                FieldValue::Integer(v) => format!("{v}i"),
                FieldValue::Float(v) if v.is_finite() => format!("{v}"),
                FieldValue::Float(_) => return None,
            };
            Some(format!("{}={value}", escape_key(name)))
        })
        .collect();
    if fields.is_empty() {
        return None;
    }

    let mut line = escape_measurement(&point.measurement);
    for (key, value) in point.tags.iter().filter(|(_, v)| !v.is_empty()) {
        let _ = write!(line, ",{}={}", escape_key(key), escape_key(value));
    }
    line.push(' ');
    line.push_str(&fields.join(","));
    let _ = write!(line, " {}", timestamp_nanos(point.timestamp));
    Some(line)
}

/// Encodes `points` as newline-separated lines, skipping unencodable ones.
pub fn encode_batch(points: &[MetricPoint]) -> String {
    points
        .iter()
        .filter_map(encode_point)
        .collect::<Vec<_>>()
        .join("\n")
}

fn timestamp_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt()
        .unwrap_or_else(|| ts.timestamp_millis().saturating_mul(1_000_000))
}

fn escape_measurement(s: &str) -> String {
    escape(s, &[',', ' '])
}

/// Tag keys, tag values and field keys share the same escaping rules.
fn escape_key(s: &str) -> String {
    escape(s, &[',', '=', ' '])
}

/// Line breaks become escaped spaces so a point never spans two lines. A
/// backslash that would swallow the escape or separator after it is doubled.
fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s
        .chars()
        .map(|c| if matches!(c, '\n' | '\r') { ' ' } else { c })
        .peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(c);
            if chars.peek().map_or(true, |next| special.contains(next)) {
                out.push('\\');
            }
            continue;
        }
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
