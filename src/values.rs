//! Typed decoding of SQL cells read from the employee table.
//!
//! The employee table is owned by another system, so a column may hold
//! integers where text was expected, textual booleans, or dates in any of a
//! handful of layouts. The helpers here normalise those into the types the
//! [`EmployeeRecord`](crate::store::EmployeeRecord) uses and report what
//! they found when they cannot.
//!
//! Optional columns are modelled with [`Cell`], which separates "the column
//! is not in the table" from "the column holds NULL".

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rusqlite::types::ValueRef;

/// Three-valued read of an optional column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell<T> {
    /// The table has no such column.
    Absent,
    /// The column exists and the row holds NULL.
    Null,
    Value(T),
}

impl<T> Cell<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Cell::Value(value) => Some(value),
            Cell::Absent | Cell::Null => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Cell::Absent)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Cell<U> {
        match self {
            Cell::Absent => Cell::Absent,
            Cell::Null => Cell::Null,
            Cell::Value(value) => Cell::Value(f(value)),
        }
    }
}

impl<T> From<Option<T>> for Cell<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Cell::Value(value),
            None => Cell::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
    Unparseable(String),
}

pub fn sql_type_name(value: &ValueRef<'_>) -> &'static str {
    match value {
        ValueRef::Null => "NULL",
        ValueRef::Integer(_) => "INTEGER",
        ValueRef::Real(_) => "REAL",
        ValueRef::Text(_) => "TEXT",
        ValueRef::Blob(_) => "BLOB",
    }
}

fn text_of<'a>(value: &ValueRef<'a>) -> Result<&'a str, DecodeError> {
    match value {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map_err(|err| DecodeError::Unparseable(format!("invalid UTF-8: {err}"))),
        other => Err(DecodeError::WrongType {
            expected: "TEXT",
            found: sql_type_name(other),
        }),
    }
}

pub fn decode_integer(value: ValueRef<'_>) -> Result<Option<i64>, DecodeError> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(i) => Ok(Some(i)),
        ValueRef::Real(f) if f.fract() == 0.0 => Ok(Some(f as i64)),
        ValueRef::Text(_) => {
            let text = text_of(&value)?.trim();
            text.parse::<i64>()
                .map(Some)
                .map_err(|_| DecodeError::Unparseable(format!("'{text}' is not an integer")))
        }
        other => Err(DecodeError::WrongType {
            expected: "INTEGER",
            found: sql_type_name(&other),
        }),
    }
}

pub fn decode_text(value: ValueRef<'_>) -> Result<Option<String>, DecodeError> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(i) => Ok(Some(i.to_string())),
        ValueRef::Real(f) => Ok(Some(f.to_string())),
        ValueRef::Text(_) => text_of(&value).map(|s| Some(s.to_string())),
        other => Err(DecodeError::WrongType {
            expected: "TEXT",
            found: sql_type_name(&other),
        }),
    }
}

pub fn decode_boolean(value: ValueRef<'_>) -> Result<Option<bool>, DecodeError> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(i) => Ok(Some(i != 0)),
        ValueRef::Real(f) => Ok(Some(f != 0.0)),
        ValueRef::Text(_) => {
            let text = text_of(&value)?;
            parse_boolean(text)
                .map(Some)
                .ok_or_else(|| DecodeError::Unparseable(format!("'{text}' is not a boolean")))
        }
        other => Err(DecodeError::WrongType {
            expected: "BOOLEAN",
            found: sql_type_name(&other),
        }),
    }
}

pub fn decode_timestamp(value: ValueRef<'_>) -> Result<Option<NaiveDateTime>, DecodeError> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(secs) => DateTime::from_timestamp(secs, 0)
            .map(|dt| Some(dt.naive_utc()))
            .ok_or_else(|| DecodeError::Unparseable(format!("{secs} is out of range"))),
        ValueRef::Real(number) => real_timestamp(number).map(Some),
        ValueRef::Text(_) => {
            let text = text_of(&value)?.trim();
            if text.is_empty() {
                return Ok(None);
            }
            parse_timestamp(text)
                .map(Some)
                .map_err(|err| DecodeError::Unparseable(err.to_string()))
        }
        other => Err(DecodeError::WrongType {
            expected: "TIMESTAMP",
            found: sql_type_name(&other),
        }),
    }
}

/// Lower-case textual spellings of true. The pending-row predicate in
/// [`crate::store`] is built from the same list.
pub const TRUE_TOKENS: &[&str] = &["true", "t", "yes", "y", "1"];
pub const FALSE_TOKENS: &[&str] = &["false", "f", "no", "n", "0"];

/// Julian day of 1970-01-01T00:00:00Z.
const UNIX_EPOCH_JULIAN_DAY: f64 = 2_440_587.5;
/// REAL values below this are read as Julian days (`julianday()` output),
/// larger ones as Unix seconds.
const JULIAN_DAY_LIMIT: f64 = 10_000_000.0;

fn real_timestamp(number: f64) -> Result<NaiveDateTime, DecodeError> {
    if !number.is_finite() {
        return Err(DecodeError::Unparseable(format!("{number} is not a timestamp")));
    }
    let secs = if number.abs() < JULIAN_DAY_LIMIT {
        (number - UNIX_EPOCH_JULIAN_DAY) * 86_400.0
    } else {
        number
    };
    DateTime::from_timestamp(secs.round() as i64, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| DecodeError::Unparseable(format!("{number} is out of range")))
}

pub fn parse_boolean(value: &str) -> Option<bool> {
    let token = value.trim().to_ascii_lowercase();
    if TRUE_TOKENS.contains(&token.as_str()) {
        Some(true)
    } else if FALSE_TOKENS.contains(&token.as_str()) {
        Some(false)
    } else {
        None
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.naive_utc());
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Datetime first, then a plain date taken at midnight.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    parse_naive_datetime(value).or_else(|_| {
        parse_naive_date(value)
            .map(|date| date.and_time(chrono::NaiveTime::MIN))
            .map_err(|_| anyhow!("Failed to parse '{value}' as timestamp"))
    })
}

/// Text layout used when writing the sync date column.
pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cell_collapses_absent_and_null_to_none() {
        assert_eq!(Cell::<i32>::Absent.into_option(), None);
        assert_eq!(Cell::<i32>::Null.into_option(), None);
        assert_eq!(Cell::Value(4).into_option(), Some(4));
        assert!(Cell::<i32>::Absent.is_absent());
        assert!(!Cell::<i32>::Null.is_absent());
        assert_eq!(Cell::from(Some(2)).map(|v| v * 2), Cell::Value(4));
    }

    #[test]
    fn decode_integer_accepts_numeric_text() {
        assert_eq!(decode_integer(ValueRef::Integer(7)).unwrap(), Some(7));
        assert_eq!(decode_integer(ValueRef::Text(b" 42 ")).unwrap(), Some(42));
        assert_eq!(decode_integer(ValueRef::Null).unwrap(), None);
        assert!(matches!(
            decode_integer(ValueRef::Text(b"abc")),
            Err(DecodeError::Unparseable(_))
        ));
        assert_eq!(
            decode_integer(ValueRef::Blob(b"\x00")),
            Err(DecodeError::WrongType {
                expected: "INTEGER",
                found: "BLOB"
            })
        );
    }

    #[test]
    fn decode_timestamp_supports_dates_datetimes_and_epochs() {
        let expected =
            NaiveDateTime::parse_from_str("2024-05-06 14:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(
            decode_timestamp(ValueRef::Text(b"2024-05-06T14:30:00")).unwrap(),
            Some(expected)
        );
        assert_eq!(
            decode_timestamp(ValueRef::Text(b"2024-05-06 14:30:00.000")).unwrap(),
            Some(expected)
        );
        let midnight = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            decode_timestamp(ValueRef::Text(b"2024-05-06")).unwrap(),
            Some(midnight)
        );
        assert_eq!(
            decode_timestamp(ValueRef::Integer(expected.and_utc().timestamp())).unwrap(),
            Some(expected)
        );
        assert_eq!(decode_timestamp(ValueRef::Text(b"")).unwrap(), None);
    }

    #[test]
    fn decode_timestamp_reads_real_as_julian_day_or_epoch() {
        let feb_25 = NaiveDate::from_ymd_opt(2023, 2, 25)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(decode_timestamp(ValueRef::Real(2_460_000.5)).unwrap(), Some(feb_25));
        assert_eq!(
            decode_timestamp(ValueRef::Real(feb_25.and_utc().timestamp() as f64)).unwrap(),
            Some(feb_25)
        );
        assert!(decode_timestamp(ValueRef::Real(f64::NAN)).is_err());
    }

    #[test]
    fn format_timestamp_round_trips_through_parser() {
        let value = NaiveDate::from_ymd_opt(2025, 1, 31)
            .unwrap()
            .and_hms_opt(23, 59, 1)
            .unwrap();
        let text = format_timestamp(&value);
        assert_eq!(text, "2025-01-31 23:59:01");
        assert_eq!(parse_timestamp(&text).unwrap(), value);
    }

    proptest! {
        #[test]
        fn decode_boolean_treats_any_nonzero_integer_as_true(value in any::<i64>()) {
            let decoded = decode_boolean(ValueRef::Integer(value)).unwrap();
            prop_assert_eq!(decoded, Some(value != 0));
        }

        #[test]
        fn decode_boolean_accepts_case_insensitive_tokens(
            token in prop::sample::select(vec!["true", "t", "yes", "y", "1", "false", "f", "no", "n", "0"]),
            upper in any::<bool>(),
        ) {
            let text = if upper { token.to_ascii_uppercase() } else { token.to_string() };
            let expected = matches!(token, "true" | "t" | "yes" | "y" | "1");
            let decoded = decode_boolean(ValueRef::Text(text.as_bytes())).unwrap();
            prop_assert_eq!(decoded, Some(expected));
        }
    }
}
