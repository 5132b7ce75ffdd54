use std::cmp::Ordering;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::conversions::hex;

/// Format used to render dates as text.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Format used to render times of day as text.
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";
/// Format used to render timestamps without time zone as text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
/// Format used to render timestamps with time zone as text.
pub const TIMESTAMPTZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

/// A single column value read from or written to any tier.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Numeric(BigDecimal),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Renders the value as text the way PostgreSQL reads it back, or `None` for `NULL`.
    ///
    /// The same rendering is used for persisted watermarks, staged CSV files and text binds.
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            Cell::Null => return None,
            Cell::Bool(value) => value.to_string(),
            Cell::I64(value) => value.to_string(),
            Cell::U64(value) => value.to_string(),
            Cell::F64(value) => render_float(*value),
            Cell::Numeric(value) => value.normalized().to_plain_string(),
            Cell::String(value) => value.clone(),
            Cell::Bytes(value) => hex::encode_bytea(value),
            Cell::Date(value) => value.format(DATE_FORMAT).to_string(),
            Cell::Time(value) => value.format(TIME_FORMAT).to_string(),
            Cell::DateTime(value) => value.format(TIMESTAMP_FORMAT).to_string(),
            Cell::TimestampTz(value) => value.format(TIMESTAMPTZ_FORMAT).to_string(),
            Cell::Json(value) => value.to_string(),
        };

        Some(text)
    }

    /// Returns the value as an `i64` when it is an integer that fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::I64(value) => Some(*value),
            Cell::U64(value) => i64::try_from(*value).ok(),
            Cell::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    /// Orders two values of the same column. `NULL` sorts first.
    ///
    /// Numeric variants compare by value across representations. Values of unrelated variants
    /// compare by variant rank so that the order stays total.
    pub fn compare(&self, other: &Cell) -> Ordering {
        use Cell::*;

        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Bool(a), Bool(b)) => a.cmp(b),
            (I64(a), I64(b)) => a.cmp(b),
            (U64(a), U64(b)) => a.cmp(b),
            (I64(a), U64(b)) => i128::from(*a).cmp(&i128::from(*b)),
            (U64(a), I64(b)) => i128::from(*a).cmp(&i128::from(*b)),
            (F64(a), F64(b)) => a.total_cmp(b),
            (Numeric(a), Numeric(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (TimestampTz(a), TimestampTz(b)) => a.cmp(b),
            (DateTime(a), TimestampTz(b)) => a.cmp(&b.naive_utc()),
            (TimestampTz(a), DateTime(b)) => a.naive_utc().cmp(b),
            (Date(a), DateTime(b)) => a.and_time(NaiveTime::MIN).cmp(b),
            (DateTime(a), Date(b)) => a.cmp(&b.and_time(NaiveTime::MIN)),
            (Json(a), Json(b)) => a.to_string().cmp(&b.to_string()),
            (a, b) => match (a.to_decimal(), b.to_decimal()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => a.rank().cmp(&b.rank()),
            },
        }
    }

    fn to_decimal(&self) -> Option<BigDecimal> {
        match self {
            Cell::I64(value) => Some(BigDecimal::from(*value)),
            Cell::U64(value) => Some(BigDecimal::from(*value)),
            Cell::Numeric(value) => Some(value.clone()),
            Cell::F64(value) => BigDecimal::try_from(*value).ok(),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Cell::Null => 0,
            Cell::Bool(_) => 1,
            Cell::I64(_) | Cell::U64(_) | Cell::F64(_) | Cell::Numeric(_) => 2,
            Cell::String(_) => 3,
            Cell::Bytes(_) => 4,
            Cell::Date(_) | Cell::DateTime(_) | Cell::TimestampTz(_) => 5,
            Cell::Time(_) => 6,
            Cell::Json(_) => 7,
        }
    }
}

/// Renders a float with the spellings PostgreSQL accepts for special values.
fn render_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        value.to_string()
    }
}

/// Compares two rows over the given column positions, lexicographically.
pub fn compare_keys(left: &[Cell], right: &[Cell], positions: &[usize]) -> Ordering {
    for &position in positions {
        let ordering = match (left.get(position), right.get(position)) {
            (Some(a), Some(b)) => a.compare(b),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn null_sorts_first() {
        assert_eq!(Cell::Null.compare(&Cell::I64(-5)), Ordering::Less);
        assert_eq!(Cell::I64(0).compare(&Cell::Null), Ordering::Greater);
    }

    #[test]
    fn integers_compare_across_signedness() {
        assert_eq!(Cell::I64(-1).compare(&Cell::U64(0)), Ordering::Less);
        assert_eq!(Cell::U64(u64::MAX).compare(&Cell::I64(i64::MAX)), Ordering::Greater);
        assert_eq!(
            Cell::Numeric(BigDecimal::from_str("10.5").unwrap()).compare(&Cell::I64(10)),
            Ordering::Greater
        );
    }

    #[test]
    fn renders_text_for_the_warehouse() {
        let timestamp = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(
            Cell::DateTime(timestamp).to_text().as_deref(),
            Some("2024-03-01 08:30:00")
        );
        assert_eq!(
            Cell::TimestampTz(timestamp.and_utc()).to_text().as_deref(),
            Some("2024-03-01 08:30:00+00:00")
        );
        assert_eq!(Cell::Bytes(vec![0xde, 0xad]).to_text().as_deref(), Some("\\xdead"));
        assert_eq!(Cell::F64(f64::NAN).to_text().as_deref(), Some("NaN"));
        assert_eq!(Cell::Null.to_text(), None);
    }

    #[test]
    fn numeric_text_is_plain() {
        let value = BigDecimal::from_str("1.2300").unwrap();
        assert_eq!(Cell::Numeric(value).to_text().as_deref(), Some("1.23"));
    }

    #[test]
    fn keys_compare_in_column_order() {
        let a = [Cell::I64(1), Cell::String("b".into())];
        let b = [Cell::I64(1), Cell::String("c".into())];
        assert_eq!(compare_keys(&a, &b, &[0, 1]), Ordering::Less);
        assert_eq!(compare_keys(&a, &b, &[0]), Ordering::Equal);
    }
}
