//! CF time coordinate decoding.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde_json::{Map, Value};
use tracing::debug;

use crate::types::TimeCoordinate;

const DECODABLE_CALENDARS: &[&str] = &["standard", "gregorian", "proleptic_gregorian"];

const EPOCH_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Decode a time coordinate to ISO-8601 strings when its calendar allows it.
///
/// Anything that cannot be decoded comes back as raw values with the
/// attributes needed to interpret them. That covers non-standard calendars,
/// unparsable units and `decode` off, as well as any value (fill values
/// included) whose instant falls outside the representable range.
pub fn decode_time_coordinate(
    name: &str,
    values: Vec<f64>,
    attributes: &Map<String, Value>,
    decode: bool,
) -> TimeCoordinate {
    let units = attributes.get("units").and_then(Value::as_str).map(str::to_string);
    let calendar = attributes
        .get("calendar")
        .and_then(Value::as_str)
        .map(|c| c.trim().to_ascii_lowercase());

    let decodable_calendar = calendar
        .as_deref()
        .map(|c| DECODABLE_CALENDARS.contains(&c))
        .unwrap_or(true);

    if decode && decodable_calendar {
        if let Some(decoded) = units.as_deref().and_then(|u| decode_values(u, &values)) {
            return TimeCoordinate::Decoded {
                name: name.to_string(),
                values: decoded,
                calendar: calendar.unwrap_or_else(|| "standard".to_string()),
            };
        }
        debug!(coordinate = name, units = ?units, "Time units not decodable, returning raw values");
    }

    TimeCoordinate::Raw {
        name: name.to_string(),
        values,
        units,
        calendar,
        attributes: attributes.clone(),
    }
}

fn decode_values(units: &str, values: &[f64]) -> Option<Vec<String>> {
    let (unit, epoch) = units.split_once(" since ")?;
    let unit_ms = unit_millis(unit.trim())?;
    let epoch = parse_epoch(epoch)?;

    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return None;
            }
            let offset = (v * unit_ms).round();
            // Fill values such as -2^63 land outside chrono's range
            if offset < i64::MIN as f64 || offset >= i64::MAX as f64 {
                return None;
            }
            let instant = epoch.checked_add_signed(Duration::try_milliseconds(offset as i64)?)?;
            Some(format_instant(&instant))
        })
        .collect()
}

fn unit_millis(unit: &str) -> Option<f64> {
    let ms = match unit.to_ascii_lowercase().as_str() {
        "days" | "day" | "d" => 86_400_000.0,
        "hours" | "hour" | "hrs" | "hr" | "h" => 3_600_000.0,
        "minutes" | "minute" | "mins" | "min" => 60_000.0,
        "seconds" | "second" | "secs" | "sec" | "s" => 1_000.0,
        "milliseconds" | "millisecond" | "msecs" | "ms" => 1.0,
        "microseconds" | "microsecond" | "us" => 0.001,
        _ => return None,
    };
    Some(ms)
}

/// Parse a CF epoch, ignoring any `T` separator, `Z`/`UTC` suffix or
/// numeric offset.
fn parse_epoch(raw: &str) -> Option<NaiveDateTime> {
    let mut text = raw.trim();
    for suffix in ["UTC", "utc", "Z"] {
        if let Some(stripped) = text.strip_suffix(suffix) {
            text = stripped.trim_end();
        }
    }
    let text = text.replacen('T', " ", 1);
    let text = strip_offset(&text);

    EPOCH_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Drop a numeric offset following the time part ("00:00:00 +00:00").
fn strip_offset(text: &str) -> &str {
    let Some(space) = text.find(' ') else {
        return text;
    };
    match text[space + 1..].rfind(['+', '-']) {
        Some(i) => text[..space + 1 + i].trim_end(),
        None => text,
    }
}

fn format_instant(instant: &NaiveDateTime) -> String {
    if instant.nanosecond() / 1_000_000 > 0 {
        instant.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
    } else {
        instant.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}
