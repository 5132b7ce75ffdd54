use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::types::DATE_FORMAT;

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const OFFSET_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];

/// Rejects the zero dates MySQL stores when strict mode is off, e.g. `0000-00-00`.
fn reject_zero_date(text: &str) -> SyncResult<()> {
    let year = text.get(0..4);
    let month = text.get(5..7);
    let day = text.get(8..10);

    if year == Some("0000") || month == Some("00") || day == Some("00") {
        bail!(
            ErrorKind::ConversionError,
            "Zero dates have no warehouse representation",
            text.to_string()
        );
    }

    Ok(())
}

pub fn parse_date(text: &str) -> SyncResult<NaiveDate> {
    let text = text.trim();
    reject_zero_date(text)?;
    Ok(NaiveDate::parse_from_str(text, DATE_FORMAT)?)
}

pub fn parse_time(text: &str) -> SyncResult<NaiveTime> {
    let text = text.trim();
    Ok(NaiveTime::parse_from_str(text, "%H:%M:%S%.f")?)
}

/// Parses a timestamp without time zone, accepting either a space or `T` separator.
///
/// A bare date is read as midnight.
pub fn parse_timestamp(text: &str) -> SyncResult<NaiveDateTime> {
    let text = text.trim();
    reject_zero_date(text)?;

    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(value);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, DATE_FORMAT) {
        return Ok(date.and_time(NaiveTime::MIN));
    }

    bail!(
        ErrorKind::ConversionError,
        "Could not parse timestamp",
        text.to_string()
    );
}

/// Parses a timestamp with time zone. Values without an offset are read as UTC.
///
/// Accepts RFC 3339 and PostgreSQL's `2024-01-01 10:00:00+00` output.
pub fn parse_timestamptz(text: &str) -> SyncResult<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(value) = DateTime::parse_from_rfc3339(text) {
        return Ok(value.with_timezone(&Utc));
    }

    for format in OFFSET_TIMESTAMP_FORMATS {
        if let Ok(value) = DateTime::parse_from_str(text, format) {
            return Ok(value.with_timezone(&Utc));
        }
    }

    Ok(parse_timestamp(text)?.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_postgres_and_mysql_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_micro_opt(3, 4, 5, 600_000)
            .unwrap();
        assert_eq!(parse_timestamp("2024-01-02 03:04:05.6").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-02T03:04:05.600").unwrap(), expected);
    }

    #[test]
    fn bare_dates_are_midnight() {
        let value = parse_timestamp("2024-01-02").unwrap();
        assert_eq!(value.time(), NaiveTime::MIN);
    }

    #[test]
    fn reads_short_postgres_offsets() {
        let value = parse_timestamptz("2024-01-02 10:00:00+02").unwrap();
        assert_eq!(value.to_rfc3339(), "2024-01-02T08:00:00+00:00");

        let naive = parse_timestamptz("2024-01-02 10:00:00").unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-01-02T10:00:00+00:00");
    }

    #[test]
    fn zero_dates_are_rejected() {
        assert_eq!(
            parse_date("0000-00-00").unwrap_err().kind(),
            ErrorKind::ConversionError
        );
        assert!(parse_timestamp("2024-00-10 00:00:00").is_err());
        assert!(parse_date("2024-02-30").is_err());
    }
}
