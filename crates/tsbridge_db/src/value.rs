//! Driver-neutral cell values and typed extraction.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt;

use crate::error::DbError;

/// UTC timestamp read from a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DbTimestamp {
    inner: DateTime<Utc>,
}

impl DbTimestamp {
    pub fn now() -> Self {
        Self { inner: Utc::now() }
    }

    fn from_chrono(value: DateTime<Utc>) -> Self {
        Self { inner: value }
    }

    /// Interpret a zone-less database timestamp as UTC.
    pub fn from_naive_utc(value: NaiveDateTime) -> Self {
        Self {
            inner: value.and_utc(),
        }
    }

    pub fn from_unix_micros(micros: i64) -> Option<Self> {
        DateTime::from_timestamp_micros(micros).map(|inner| Self { inner })
    }

    /// Parse RFC3339 or the `YYYY-MM-DD HH:MM:SS[.f]` form most drivers print.
    pub fn parse(raw: &str) -> Result<Self, DbError> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Self::from_chrono(dt.with_timezone(&Utc)));
        }
        for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d-%H.%M.%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Ok(Self::from_naive_utc(naive));
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(Self::from_naive_utc(midnight));
            }
        }
        Err(DbError::TypeConversion(format!(
            "'{}' is not a recognised timestamp",
            raw
        )))
    }

    pub fn unix_micros(&self) -> i64 {
        self.inner.timestamp_micros()
    }

    pub fn unix_millis(&self) -> i64 {
        self.inner.timestamp_millis()
    }

    pub fn to_rfc3339(&self) -> String {
        self.inner.to_rfc3339()
    }
}

impl fmt::Display for DbTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.format("%Y-%m-%d %H:%M:%S%.6f"))
    }
}

/// One cell as decoded by a driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DbTimestamp),
}

impl DbValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            DbValue::Null => "NULL",
            DbValue::Integer(_) => "integer",
            DbValue::Real(_) => "real",
            DbValue::Text(_) => "text",
            DbValue::Boolean(_) => "boolean",
            DbValue::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbValue::Null => write!(f, "NULL"),
            DbValue::Integer(v) => write!(f, "{}", v),
            DbValue::Real(v) => write!(f, "{}", v),
            DbValue::Text(v) => write!(f, "{}", v),
            DbValue::Boolean(v) => write!(f, "{}", v),
            DbValue::Timestamp(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

/// One result-set row; values are positional.
#[derive(Debug, Clone, PartialEq)]
pub struct DbRow {
    values: Vec<DbValue>,
}

impl DbRow {
    pub fn new(values: Vec<DbValue>) -> Self {
        Self { values }
    }

    /// Decode the value at `index` as `T`.
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T, DbError> {
        let value = self.values.get(index).ok_or_else(|| {
            DbError::TypeConversion(format!(
                "column index {} out of bounds for row of width {}",
                index,
                self.values.len()
            ))
        })?;
        T::from_db_value(value)
    }

    pub fn get_raw(&self, index: usize) -> Option<&DbValue> {
        self.values.get(index)
    }
}

/// Conversion from a driver value into a concrete scalar.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError>;
}

fn unexpected(expected: &str, value: &DbValue) -> DbError {
    match value {
        DbValue::Null => DbError::TypeConversion(format!(
            "cannot convert NULL into {}",
            expected
        )),
        other => DbError::TypeConversion(format!(
            "cannot convert {} value '{}' into {}",
            other.type_name(),
            other,
            expected
        )),
    }
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            // Integral reals (e.g. DECIMAL(10,0) surfaced as double) are accepted.
            DbValue::Real(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(*v as i64),
            DbValue::Text(v) => v
                .trim()
                .parse::<i64>()
                .map_err(|_| unexpected("int64", value)),
            other => Err(unexpected("int64", other)),
        }
    }
}

impl FromDbValue for DbTimestamp {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Timestamp(v) => Ok(*v),
            DbValue::Text(v) => DbTimestamp::parse(v),
            other => Err(unexpected("timestamp", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i64_rejects_null_and_text() {
        assert!(i64::from_db_value(&DbValue::Null).is_err());
        assert!(i64::from_db_value(&DbValue::from("abc")).is_err());
        assert_eq!(i64::from_db_value(&DbValue::from(" 42 ")).unwrap(), 42);
        assert_eq!(i64::from_db_value(&DbValue::Real(7.0)).unwrap(), 7);
        assert!(i64::from_db_value(&DbValue::Real(7.5)).is_err());
    }

    #[test]
    fn test_timestamp_parses_driver_formats() {
        let expected = DbTimestamp::parse("2024-01-02T03:04:05Z").unwrap();
        assert_eq!(DbTimestamp::parse("2024-01-02 03:04:05").unwrap(), expected);
        assert_eq!(DbTimestamp::parse("2024-01-02-03.04.05.000000").unwrap(), expected);
        assert!(DbTimestamp::parse("yesterday").is_err());
    }

    #[test]
    fn test_timestamp_from_integer_is_rejected() {
        let err = DbTimestamp::from_db_value(&DbValue::Integer(10)).unwrap_err();
        assert!(matches!(err, DbError::TypeConversion(_)));
    }

    #[test]
    fn test_row_get_out_of_bounds() {
        let row = DbRow::new(vec![DbValue::from(1_i64)]);
        assert_eq!(row.get::<i64>(0).unwrap(), 1);
        assert!(row.get::<i64>(1).is_err());
    }

    #[test]
    fn test_display_timestamp_microseconds() {
        let ts = DbTimestamp::from_unix_micros(1_500_000).unwrap();
        assert_eq!(ts.to_string(), "1970-01-01 00:00:01.500000");
    }
}
