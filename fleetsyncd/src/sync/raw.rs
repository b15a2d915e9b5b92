use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

pub const TIME_FIELD: &str = "time";
pub const ID_FIELD: &str = "id";

/// A record as authored by the mobile app. Nothing about its shape is
/// guaranteed; the accessors coerce what they can and report absence otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|value| !value.is_null())
    }

    /// Trimmed string value; numbers and booleans are rendered, blanks are absent.
    pub fn text(&self, field: &str) -> Option<String> {
        let text = match self.get(field)? {
            Value::String(value) => value.trim().to_string(),
            Value::Number(value) => value.to_string(),
            Value::Bool(value) => value.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        let parsed = match self.get(field)? {
            Value::Number(value) => value.as_f64(),
            Value::String(value) => value.trim().replace(',', ".").parse::<f64>().ok(),
            _ => None,
        };
        parsed.filter(|value| value.is_finite())
    }

    /// Unix milliseconds. Accepts epoch-millisecond numbers, numeric strings,
    /// RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
    pub fn timestamp(&self, field: &str) -> Option<i64> {
        match self.get(field)? {
            Value::Number(value) => value
                .as_i64()
                .or_else(|| value.as_f64().map(|v| v as i64)),
            Value::String(value) => parse_timestamp(value.trim()),
            _ => None,
        }
    }

    /// Any JSON value re-serialized as text, for free-form columns.
    pub fn json_text(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            Value::String(value) => Some(value.clone()),
            other => serde_json::to_string(other).ok(),
        }
    }

    pub fn set_text(&mut self, field: &str, value: Option<String>) {
        match value {
            Some(value) => self.0.insert(field.to_string(), Value::String(value)),
            None => self.0.remove(field),
        };
    }
}

pub fn parse_timestamp(value: &str) -> Option<i64> {
    if value.is_empty() {
        return None;
    }
    if let Ok(millis) = value.parse::<i64>() {
        return Some(millis);
    }
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(unix_millis(parsed));
    }
    let date_only = format_description!("[year]-[month]-[day]");
    Date::parse(value, &date_only)
        .ok()
        .map(|date| unix_millis(date.midnight().assume_utc()))
}

pub fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn now_millis() -> i64 {
    unix_millis(OffsetDateTime::now_utc())
}
