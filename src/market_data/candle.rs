// =============================================================================
// Candle Normalizer — RawCandle (feed JSON) -> canonical Candle
// =============================================================================
//
// Feeds disagree on field naming/casing and on how time is encoded. A raw
// candle's time may be a date string, epoch seconds, or epoch milliseconds
// (anything above 2e10 is milliseconds). The canonical candle always carries
// whole epoch seconds; a candle whose time cannot be resolved is rejected.
// =============================================================================

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Numeric timestamps above this are milliseconds.
pub const MILLIS_THRESHOLD: f64 = 2e10;

/// Time-field aliases, highest priority first.
const TIME_ALIASES: &[&str] = &[
    "time",
    "Time",
    "date",
    "Date",
    "datetime",
    "Datetime",
    "timestamp",
    "Timestamp",
];

const OPEN_ALIASES: &[&str] = &["open", "Open"];
const HIGH_ALIASES: &[&str] = &["high", "High"];
const LOW_ALIASES: &[&str] = &["low", "Low"];
const CLOSE_ALIASES: &[&str] = &["close", "Close"];

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLC candle, time in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// A candle exactly as the feed delivered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawCandle(pub Value);

impl From<Value> for RawCandle {
    fn from(v: Value) -> Self {
        Self(v)
    }
}

/// What to do with price fields that are not numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricePolicy {
    /// Drop the candle.
    Reject,
    /// Keep the candle with NaN in the offending field.
    Propagate,
}

impl Default for PricePolicy {
    fn default() -> Self {
        Self::Reject
    }
}

/// Why a raw candle was not turned into a [`Candle`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleRejection {
    #[error("candle payload is not an object")]
    NotAnObject,
    #[error("no time field present")]
    MissingTime,
    #[error("time value {0} cannot be parsed")]
    UnparsableTime(String),
    #[error("time value {0} is not a valid epoch")]
    InvalidTime(f64),
    #[error("price field {field} is not numeric: {value}")]
    InvalidPrice { field: &'static str, value: String },
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

impl RawCandle {
    /// First alias whose value is present, non-null and not an empty string.
    fn field(&self, aliases: &[&str]) -> Option<&Value> {
        let obj = self.0.as_object()?;
        aliases.iter().find_map(|name| match obj.get(*name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(v) => Some(v),
        })
    }

    /// Turn this raw candle into a canonical one.
    pub fn normalize(&self, policy: PricePolicy) -> Result<Candle, CandleRejection> {
        if !self.0.is_object() {
            return Err(CandleRejection::NotAnObject);
        }

        let time_value = self.field(TIME_ALIASES).ok_or(CandleRejection::MissingTime)?;
        let time = resolve_time(time_value)?;

        Ok(Candle {
            time,
            open: self.price("open", OPEN_ALIASES, policy)?,
            high: self.price("high", HIGH_ALIASES, policy)?,
            low: self.price("low", LOW_ALIASES, policy)?,
            close: self.price("close", CLOSE_ALIASES, policy)?,
        })
    }

    /// An absent price field is carried as NaN under either policy; the
    /// policy only applies to values that are present but not numeric.
    fn price(
        &self,
        field: &'static str,
        aliases: &[&str],
        policy: PricePolicy,
    ) -> Result<f64, CandleRejection> {
        let Some(raw) = self.field(aliases) else {
            return Ok(f64::NAN);
        };
        let value = coerce_f64(raw);
        if value.is_finite() || policy == PricePolicy::Propagate {
            return Ok(value);
        }
        Err(CandleRejection::InvalidPrice {
            field,
            value: raw.to_string(),
        })
    }
}

/// Numeric coercion: numbers as-is, numeric strings parsed, anything else NaN.
fn coerce_f64(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Resolve a raw time value to whole epoch seconds.
fn resolve_time(v: &Value) -> Result<i64, CandleRejection> {
    let secs = match v {
        Value::String(s) => {
            parse_datetime(s).ok_or_else(|| CandleRejection::UnparsableTime(s.clone()))? as f64
        }
        Value::Number(n) => {
            let raw = n.as_f64().unwrap_or(f64::NAN);
            if raw > MILLIS_THRESHOLD {
                raw / 1000.0
            } else {
                raw
            }
        }
        other => return Err(CandleRejection::UnparsableTime(other.to_string())),
    };

    let whole = secs.trunc();
    if !whole.is_finite() || whole == 0.0 {
        return Err(CandleRejection::InvalidTime(secs));
    }
    // Beyond chrono's calendar range the value cannot be an epoch.
    let seconds = whole as i64;
    if whole != seconds as f64 || DateTime::from_timestamp(seconds, 0).is_none() {
        return Err(CandleRejection::InvalidTime(secs));
    }
    Ok(seconds)
}

/// Parse a calendar date/time into epoch seconds. Strings without an offset
/// are read as UTC.
pub fn parse_datetime(s: &str) -> Option<i64> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    // pandas / yfinance export: "2024-01-01 00:00:00+00:00"
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.timestamp());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
