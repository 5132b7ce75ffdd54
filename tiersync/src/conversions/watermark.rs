//! Parsing of persisted incremental watermarks back into typed values.
//!
//! Watermarks are stored as text, either rendered by [`Cell::to_text`] or read from the
//! warehouse as `max(column)::text`. They are parsed with the type of the replica column they
//! filter so that comparisons happen on typed values.

use tiersync_mysql::types::MySqlType;

use crate::conversions::{numeric, temporal};
use crate::error::SyncResult;
use crate::types::Cell;

pub fn parse_watermark(text: &str, typ: &MySqlType) -> SyncResult<Cell> {
    let text = text.trim();

    let cell = match typ {
        MySqlType::TinyInt { unsigned: false }
        | MySqlType::SmallInt { unsigned: false }
        | MySqlType::MediumInt { unsigned: false }
        | MySqlType::Int { unsigned: false }
        | MySqlType::BigInt { unsigned: false }
        | MySqlType::Year => Cell::I64(parse_integer(text)?),
        MySqlType::TinyInt { unsigned: true }
        | MySqlType::SmallInt { unsigned: true }
        | MySqlType::MediumInt { unsigned: true }
        | MySqlType::Int { unsigned: true }
        | MySqlType::BigInt { unsigned: true } => Cell::U64(text.parse()?),
        MySqlType::Decimal { .. } => Cell::Numeric(numeric::parse_decimal(text)?),
        MySqlType::Float | MySqlType::Double => Cell::F64(text.parse()?),
        MySqlType::Date => Cell::Date(temporal::parse_date(text)?),
        MySqlType::Time => Cell::Time(temporal::parse_time(text)?),
        MySqlType::DateTime => Cell::DateTime(temporal::parse_timestamp(text)?),
        MySqlType::Timestamp => Cell::TimestampTz(temporal::parse_timestamptz(text)?),
        _ => Cell::String(text.to_string()),
    };

    Ok(cell)
}

/// Parses an integer, also accepting the `true`/`false` spelling of boolean warehouse columns.
fn parse_integer(text: &str) -> SyncResult<i64> {
    match text {
        "true" | "t" => Ok(1),
        "false" | "f" => Ok(0),
        _ => Ok(text.parse()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn round_trips_datetime_watermarks() {
        let value = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        let text = Cell::DateTime(value).to_text().unwrap();
        assert_eq!(
            parse_watermark(&text, &MySqlType::DateTime).unwrap(),
            Cell::DateTime(value)
        );
    }

    #[test]
    fn reads_warehouse_booleans_as_integers() {
        assert_eq!(
            parse_watermark("true", &MySqlType::TinyInt { unsigned: false }).unwrap(),
            Cell::I64(1)
        );
    }

    #[test]
    fn unsigned_columns_keep_full_range() {
        assert_eq!(
            parse_watermark("18446744073709551615", &MySqlType::BigInt { unsigned: true })
                .unwrap(),
            Cell::U64(u64::MAX)
        );
    }

    #[test]
    fn invalid_text_is_a_conversion_error() {
        assert!(parse_watermark("yesterday", &MySqlType::Date).is_err());
    }
}
