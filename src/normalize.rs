//! Turns raw source rows into typed [`SourceRecord`]s.
//!
//! Numeric policy: every numeric field is truncated toward zero after parsing,
//! so `"361.75"` becomes `361`. Negative values are rejected and thousands
//! separators in text values are ignored.

use chrono::NaiveDate;
use thiserror::Error;

use crate::model::{BarFields, Payload, SourceRecord};

/// A column value as read from an upstream system.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl std::fmt::Display for RawValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawValue::Null => write!(f, "NULL"),
            RawValue::Integer(v) => write!(f, "{v}"),
            RawValue::Real(v) => write!(f, "{v}"),
            RawValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Integer(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Real(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Bar {
        open: RawValue,
        high: RawValue,
        low: RawValue,
        close: RawValue,
        volume: RawValue,
    },
    Dividend {
        amount: RawValue,
    },
}

/// An unvalidated row: nothing past [`normalize`] sees one of these.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub code: String,
    pub date: RawValue,
    pub payload: RawPayload,
}

/// A field that failed validation, with the offending raw value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("field '{field}' has invalid value '{raw}': {reason}")]
pub struct NormalizationError {
    pub field: &'static str,
    pub raw: String,
    pub reason: &'static str,
}

impl NormalizationError {
    fn new(field: &'static str, raw: &RawValue, reason: &'static str) -> Self {
        Self {
            field,
            raw: raw.to_string(),
            reason,
        }
    }
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"];

/// Validates and coerces one raw row. Never panics; the caller decides
/// whether a failure skips the row or halts.
pub fn normalize(raw: &RawRow) -> Result<SourceRecord, NormalizationError> {
    let code = raw.code.trim();
    if code.is_empty() {
        return Err(NormalizationError {
            field: "code",
            raw: raw.code.clone(),
            reason: "empty instrument code",
        });
    }

    let date = parse_date(&raw.date)?;

    let payload = match &raw.payload {
        RawPayload::Bar {
            open,
            high,
            low,
            close,
            volume,
        } => Payload::Bar(BarFields {
            open: parse_amount("open", open)?,
            high: parse_amount("high", high)?,
            low: parse_amount("low", low)?,
            close: parse_amount("close", close)?,
            volume: parse_amount("volume", volume)?,
        }),
        RawPayload::Dividend { amount } => Payload::Dividend {
            amount: parse_amount("amount", amount)?,
        },
    };

    Ok(SourceRecord {
        code: code.to_string(),
        date,
        payload,
    })
}

/// Parses a plain calendar date. Datetime text keeps only its date part.
pub fn parse_date(raw: &RawValue) -> Result<NaiveDate, NormalizationError> {
    match raw {
        RawValue::Text(s) => {
            let s = s.trim();
            // "2025-01-24 00:00:00" and "2025-01-24T00:00:00"
            let s = s.split([' ', 'T']).next().unwrap_or(s);
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .ok_or_else(|| NormalizationError::new("date", raw, "not a calendar date"))
        }
        RawValue::Integer(v) => NaiveDate::parse_from_str(&v.to_string(), "%Y%m%d")
            .map_err(|_| NormalizationError::new("date", raw, "not a calendar date")),
        RawValue::Null => Err(NormalizationError::new("date", raw, "missing")),
        RawValue::Real(_) => Err(NormalizationError::new("date", raw, "not a calendar date")),
    }
}

/// Parses a non-negative amount, truncating any fractional part.
pub fn parse_amount(field: &'static str, raw: &RawValue) -> Result<u64, NormalizationError> {
    match raw {
        RawValue::Integer(v) => {
            u64::try_from(*v).map_err(|_| NormalizationError::new(field, raw, "negative value"))
        }
        RawValue::Real(v) => {
            if !v.is_finite() {
                Err(NormalizationError::new(field, raw, "not a finite number"))
            } else if *v < 0.0 {
                Err(NormalizationError::new(field, raw, "negative value"))
            } else if *v >= u64::MAX as f64 {
                Err(NormalizationError::new(field, raw, "out of range"))
            } else {
                Ok(v.trunc() as u64)
            }
        }
        RawValue::Text(s) => parse_decimal_text(field, raw, s),
        RawValue::Null => Err(NormalizationError::new(field, raw, "missing")),
    }
}

fn parse_decimal_text(field: &'static str, raw: &RawValue, s: &str) -> Result<u64, NormalizationError> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    if digits.starts_with('-') {
        return Err(NormalizationError::new(field, raw, "negative value"));
    }

    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part)
    {
        return Err(NormalizationError::new(field, raw, "not a number"));
    }

    if int_part.is_empty() {
        return Ok(0);
    }
    int_part
        .parse::<u64>()
        .map_err(|_| NormalizationError::new(field, raw, "out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_row(date: &str, close: RawValue) -> RawRow {
        RawRow {
            code: "005930".into(),
            date: date.into(),
            payload: RawPayload::Bar {
                open: RawValue::Integer(9895),
                high: "10,020".into(),
                low: RawValue::Real(9810.0),
                close,
                volume: "1523000".into(),
            },
        }
    }

    #[test]
    fn normalizes_bar_with_mixed_raw_types() {
        let record = normalize(&bar_row("2025-01-02", "9860".into())).unwrap();
        assert_eq!(record.code, "005930");
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
        assert_eq!(
            record.payload,
            Payload::Bar(BarFields {
                open: 9895,
                high: 10020,
                low: 9810,
                close: 9860,
                volume: 1_523_000,
            })
        );
    }

    #[test]
    fn truncates_fractional_dividends() {
        let row = RawRow {
            code: " 005930 ".into(),
            date: "20250124".into(),
            payload: RawPayload::Dividend {
                amount: "361.75".into(),
            },
        };
        let record = normalize(&row).unwrap();
        assert_eq!(record.code, "005930");
        assert_eq!(record.payload, Payload::Dividend { amount: 361 });

        assert_eq!(parse_amount("amount", &RawValue::Real(124.99)).unwrap(), 124);
        assert_eq!(parse_amount("amount", &".5".into()).unwrap(), 0);
    }

    #[test]
    fn accepts_datetime_and_integer_dates() {
        let expected = NaiveDate::from_ymd_opt(2024, 11, 4).unwrap();
        assert_eq!(parse_date(&"2024-11-04 15:40:00".into()).unwrap(), expected);
        assert_eq!(parse_date(&RawValue::Integer(20241104)).unwrap(), expected);
        assert_eq!(parse_date(&"2024/11/04".into()).unwrap(), expected);
    }

    #[test]
    fn rejects_bad_fields_with_field_name() {
        let err = normalize(&bar_row("2025-13-40", "100".into())).unwrap_err();
        assert_eq!(err.field, "date");
        assert_eq!(err.raw, "2025-13-40");

        let err = normalize(&bar_row("2025-01-02", "-5".into())).unwrap_err();
        assert_eq!(err.field, "close");
        assert_eq!(err.reason, "negative value");

        let err = normalize(&bar_row("2025-01-02", RawValue::Null)).unwrap_err();
        assert_eq!(err.field, "close");
        assert_eq!(err.reason, "missing");

        let err = normalize(&bar_row("2025-01-02", "1e5".into())).unwrap_err();
        assert_eq!(err.reason, "not a number");

        assert!(parse_amount("volume", &RawValue::Real(f64::NAN)).is_err());
        assert!(parse_amount("volume", &RawValue::Integer(-1)).is_err());
    }

    #[test]
    fn rejects_blank_code() {
        let mut row = bar_row("2025-01-02", "1".into());
        row.code = "  ".into();
        assert_eq!(normalize(&row).unwrap_err().field, "code");
    }
}
