use bigdecimal::BigDecimal;
use metrics::counter;
use tracing::warn;

use crate::bail;
use crate::conversions::numeric::fits_precision;
use crate::error::{ErrorKind, SyncResult};
use crate::metrics::{TABLE_NAME_LABEL, TIERSYNC_CONVERSION_FAILURES_TOTAL};
use crate::types::{Cell, TableRow, TableSchema, TargetSchema, WarehouseType};

/// Converts replica rows into rows of a warehouse table.
///
/// The same conversion is applied by every load strategy. A value that cannot be represented
/// in its warehouse column is replaced by `NULL` and reported; it never fails the row.
#[derive(Debug, Clone)]
pub struct RowConverter {
    table: String,
    columns: Vec<(String, WarehouseType)>,
    /// Position in the replica row of every warehouse column.
    positions: Vec<Option<usize>>,
}

impl RowConverter {
    pub fn new(replica: &TableSchema, target: &TargetSchema) -> Self {
        let columns = target
            .columns
            .iter()
            .map(|column| (column.name.clone(), column.data_type.clone()))
            .collect::<Vec<_>>();
        let positions = columns
            .iter()
            .map(|(name, _)| replica.column_index(name))
            .collect();

        Self {
            table: target.full_name(),
            columns,
            positions,
        }
    }

    pub fn convert(&self, row: &TableRow) -> TableRow {
        let values = self
            .columns
            .iter()
            .zip(&self.positions)
            .map(|((name, typ), position)| {
                let value = position
                    .and_then(|position| row.values.get(position))
                    .cloned()
                    .unwrap_or(Cell::Null);

                match convert_value(value, typ) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(
                            table = %self.table,
                            column = %name,
                            error = %err.summary(),
                            "value does not fit its warehouse column, storing NULL"
                        );
                        counter!(TIERSYNC_CONVERSION_FAILURES_TOTAL, TABLE_NAME_LABEL => self.table.clone())
                            .increment(1);
                        Cell::Null
                    }
                }
            })
            .collect();

        TableRow::new(values)
    }

    pub fn convert_all(&self, rows: &[TableRow]) -> Vec<TableRow> {
        rows.iter().map(|row| self.convert(row)).collect()
    }
}

/// Converts one value into the representation of a warehouse column type.
pub fn convert_value(value: Cell, typ: &WarehouseType) -> SyncResult<Cell> {
    if value.is_null() {
        return Ok(Cell::Null);
    }

    let converted = match typ {
        WarehouseType::Boolean => match (&value, value.as_i64()) {
            (Cell::Bool(flag), _) => Cell::Bool(*flag),
            (_, Some(0)) => Cell::Bool(false),
            (_, Some(1)) => Cell::Bool(true),
            _ => return mismatch(&value, typ),
        },
        WarehouseType::SmallInt => integer(&value, i64::from(i16::MIN), i64::from(i16::MAX), typ)?,
        WarehouseType::Integer => integer(&value, i64::from(i32::MIN), i64::from(i32::MAX), typ)?,
        WarehouseType::BigInt => integer(&value, i64::MIN, i64::MAX, typ)?,
        WarehouseType::Numeric { precision, scale } => {
            let Some(decimal) = decimal(&value) else {
                return mismatch(&value, typ);
            };
            let fits = precision
                .is_none_or(|precision| fits_precision(&decimal, precision, scale.unwrap_or(0)));
            if !fits {
                return mismatch(&value, typ);
            }
            Cell::Numeric(decimal)
        }
        WarehouseType::Real | WarehouseType::DoublePrecision => match &value {
            Cell::F64(float) => Cell::F64(*float),
            Cell::I64(integer) => Cell::F64(*integer as f64),
            Cell::U64(integer) => Cell::F64(*integer as f64),
            Cell::Numeric(decimal) => match decimal.to_string().parse::<f64>() {
                Ok(float) => Cell::F64(float),
                Err(_) => return mismatch(&value, typ),
            },
            _ => return mismatch(&value, typ),
        },
        WarehouseType::VarChar { .. } | WarehouseType::Text => {
            let text = match value {
                Cell::String(text) => text,
                Cell::Bytes(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(err) => bail!(
                        ErrorKind::ConversionError,
                        "Binary value is not valid UTF-8",
                        err.to_string()
                    ),
                },
                other => other.to_text().unwrap_or_default(),
            };
            // PostgreSQL text cannot hold NUL characters.
            let text = if text.contains('\0') {
                text.replace('\0', "")
            } else {
                text
            };

            if let WarehouseType::VarChar {
                length: Some(length),
            } = typ
            {
                let characters = text.chars().count();
                if characters > *length as usize {
                    bail!(
                        ErrorKind::ConversionError,
                        "Value exceeds the column length",
                        format!("{characters} characters for {typ}")
                    );
                }
            }
            Cell::String(text)
        }
        WarehouseType::Bytea => match value {
            Cell::Bytes(bytes) => Cell::Bytes(bytes),
            Cell::String(text) => Cell::Bytes(text.into_bytes()),
            other => return mismatch(&other, typ),
        },
        WarehouseType::Date => match value {
            Cell::Date(date) => Cell::Date(date),
            Cell::DateTime(timestamp) => Cell::Date(timestamp.date()),
            other => return mismatch(&other, typ),
        },
        WarehouseType::Time => match value {
            Cell::Time(time) => Cell::Time(time),
            other => return mismatch(&other, typ),
        },
        WarehouseType::Timestamp => match value {
            Cell::DateTime(timestamp) => Cell::DateTime(timestamp),
            Cell::TimestampTz(timestamp) => Cell::DateTime(timestamp.naive_utc()),
            Cell::Date(date) => Cell::DateTime(date.and_time(chrono::NaiveTime::MIN)),
            other => return mismatch(&other, typ),
        },
        WarehouseType::TimestampTz => match value {
            Cell::TimestampTz(timestamp) => Cell::TimestampTz(timestamp),
            Cell::DateTime(timestamp) => Cell::TimestampTz(timestamp.and_utc()),
            other => return mismatch(&other, typ),
        },
        WarehouseType::Jsonb => match value {
            Cell::Json(document) => Cell::Json(document),
            Cell::String(text) => Cell::Json(serde_json::from_str(&text)?),
            other => return mismatch(&other, typ),
        },
        WarehouseType::Other(_) => value,
    };

    Ok(converted)
}

fn integer(value: &Cell, min: i64, max: i64, typ: &WarehouseType) -> SyncResult<Cell> {
    match value.as_i64() {
        Some(integer) if (min..=max).contains(&integer) => Ok(Cell::I64(integer)),
        _ => mismatch(value, typ),
    }
}

fn decimal(value: &Cell) -> Option<BigDecimal> {
    match value {
        Cell::Numeric(decimal) => Some(decimal.clone()),
        Cell::I64(integer) => Some(BigDecimal::from(*integer)),
        Cell::U64(integer) => Some(BigDecimal::from(*integer)),
        Cell::Bool(flag) => Some(BigDecimal::from(u8::from(*flag))),
        Cell::F64(float) => BigDecimal::try_from(*float).ok(),
        _ => None,
    }
}

fn mismatch<T>(value: &Cell, typ: &WarehouseType) -> SyncResult<T> {
    bail!(
        ErrorKind::ConversionError,
        "Value cannot be stored in its warehouse column",
        format!(
            "'{}' as {typ}",
            value.to_text().unwrap_or_else(|| "NULL".to_string())
        )
    );
}
