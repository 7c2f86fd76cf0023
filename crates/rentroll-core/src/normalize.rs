//! Pure conversions from raw source text into canonical values.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

const CENTS: f64 = 100.0;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitSize {
    pub width: f64,
    pub length: f64,
    pub height: f64,
}

/// Trimmed value, or `None` when the input is empty or whitespace.
pub fn clean(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Parses `"WxLxH"`. Case-insensitive and whitespace-tolerant; anything other than
/// exactly three finite numbers is rejected as a whole.
pub fn parse_unit_size(raw: &str) -> Option<UnitSize> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    let parts = cleaned
        .split('x')
        .map(|part| part.parse::<f64>().ok().filter(|n| n.is_finite()))
        .collect::<Option<Vec<_>>>()?;

    match parts.as_slice() {
        [width, length, height] => Some(UnitSize {
            width: *width,
            length: *length,
            height: *height,
        }),
        _ => None,
    }
}

/// Trims and strips a trailing `.0`, `.00`, ... left behind by spreadsheet exports.
pub fn normalize_unit_number(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some((head, tail)) = trimmed.rsplit_once('.') {
        if !tail.is_empty() && tail.bytes().all(|b| b == b'0') {
            return head.to_string();
        }
    }
    trimmed.to_string()
}

/// Comparison form of a facility name. Only the rent-roll lookup path uses it.
pub fn normalize_facility_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Strict parse against a fixed whitelist of formats. Empty or unrecognized input
/// is `None`, never an error.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    for format in NAIVE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }

    None
}

/// Monetary parse. Missing or non-numeric input is `0.0`.
pub fn parse_amount(raw: &str) -> f64 {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

pub fn round_cents(value: f64) -> f64 {
    (value * CENTS).round() / CENTS
}

/// ISO-8601 rendering used at the storage and log boundaries.
pub fn to_iso(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
