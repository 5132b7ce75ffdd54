use std::str::FromStr;

use bigdecimal::BigDecimal;

use crate::error::SyncResult;

/// Parses a decimal literal as produced by MySQL or PostgreSQL.
pub fn parse_decimal(text: &str) -> SyncResult<BigDecimal> {
    Ok(BigDecimal::from_str(text.trim())?)
}

/// Returns `true` when `value` fits a `numeric(precision, scale)` column without losing
/// integer digits.
pub fn fits_precision(value: &BigDecimal, precision: u32, scale: u32) -> bool {
    let integer_digits = u64::from(precision.saturating_sub(scale));
    let integer_part = value.abs().with_scale(0);
    if integer_part == BigDecimal::from(0) {
        return true;
    }

    integer_part.digits() <= integer_digits
}
