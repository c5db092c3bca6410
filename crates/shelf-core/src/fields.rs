//! Typed field lookup over loosely structured JSON.
//!
//! Origin payloads spell the same field several ways (`id` / `categoryId`,
//! `children` / `subs`, numbers as strings). Callers list candidate paths in
//! priority order and get the first usable value back.

use serde_json::Value;

/// Follows `path` through objects and arrays. Numeric segments index arrays.
pub fn lookup<'v>(value: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// First path that resolves to a non-null, non-empty value.
pub fn first_present<'v>(value: &'v Value, paths: &[&[&str]]) -> Option<&'v Value> {
    paths
        .iter()
        .filter_map(|path| lookup(value, path))
        .find(|v| is_present(v))
}

/// First present value rendered as a string. Numbers are stringified.
pub fn first_str(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .filter_map(|path| lookup(value, path))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// First present value readable as a number. Accepts `"12,5"` style strings.
pub fn first_f64(value: &Value, paths: &[&[&str]]) -> Option<f64> {
    paths
        .iter()
        .filter_map(|path| lookup(value, path))
        .find_map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_decimal(s),
            _ => None,
        })
}

pub fn first_bool(value: &Value, paths: &[&[&str]]) -> Option<bool> {
    paths
        .iter()
        .filter_map(|path| lookup(value, path))
        .find_map(|v| match v {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            _ => None,
        })
}

pub fn first_array<'v>(value: &'v Value, paths: &[&[&str]]) -> Option<&'v Vec<Value>> {
    paths
        .iter()
        .filter_map(|path| lookup(value, path))
        .find_map(|v| v.as_array().filter(|items| !items.is_empty()))
}

/// Strings found at `field_paths` inside each element of `items`.
pub fn collect_strs(items: &[Value], field_paths: &[&[&str]]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            other => first_str(other, field_paths),
        })
        .collect()
}

/// Parses `"1 234,50"`, `"12.5"`, `"7"`.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}
