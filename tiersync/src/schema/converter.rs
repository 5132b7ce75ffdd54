use tracing::debug;

use crate::database::{Connector, RowSource};
use crate::error::SyncResult;
use crate::resilience::ResilientSession;
use crate::types::{Cell, ColumnSchema, MySqlType, TableSchema, TargetColumn, TargetSchema, WarehouseType};

/// Distinct values sampled per single-byte integer column. Seeing a third value is enough to
/// rule out a boolean.
pub const BOOLEAN_SAMPLE_LIMIT: usize = 3;

/// Derives the warehouse schema of a replica table.
///
/// Single-byte integer columns are sampled on the replica: a column whose non-null values are
/// all `0` or `1` becomes `boolean`, whatever its declared display width. A column holding only
/// `NULL` passes that test too.
pub async fn derive_schema<K>(
    session: &mut ResilientSession<K>,
    replica: &TableSchema,
    warehouse_schema: &str,
) -> SyncResult<TargetSchema>
where
    K: Connector,
    K::Connection: RowSource,
{
    let mut columns = Vec::with_capacity(replica.columns.len());

    for column in &replica.columns {
        let boolean = if column.typ.is_tiny_int() {
            let sample = session
                .distinct_values(replica, &column.name, BOOLEAN_SAMPLE_LIMIT)
                .await?;
            let boolean = is_boolean_sample(&sample);
            debug!(
                table = %replica.name,
                column = %column.name,
                sampled = sample.len(),
                boolean,
                "sampled single-byte integer column"
            );
            boolean
        } else {
            false
        };

        columns.push(TargetColumn {
            name: column.name.clone(),
            data_type: map_type(column, boolean),
            nullable: column.nullable,
        });
    }

    Ok(TargetSchema {
        schema: warehouse_schema.to_string(),
        name: replica.name.clone(),
        columns,
        primary_key: replica.primary_key.clone(),
    })
}

/// Decides the boolean heuristic from sampled distinct non-null values.
pub fn is_boolean_sample(sample: &[Cell]) -> bool {
    sample
        .iter()
        .all(|value| matches!(value.as_i64(), Some(0) | Some(1)))
}

/// Maps a replica column onto its warehouse type.
pub fn map_type(column: &ColumnSchema, boolean: bool) -> WarehouseType {
    match &column.typ {
        MySqlType::TinyInt { .. } if boolean => WarehouseType::Boolean,
        MySqlType::TinyInt { .. } | MySqlType::SmallInt { unsigned: false } | MySqlType::Year => {
            WarehouseType::SmallInt
        }
        MySqlType::SmallInt { unsigned: true }
        | MySqlType::MediumInt { .. }
        | MySqlType::Int { unsigned: false } => WarehouseType::Integer,
        MySqlType::Int { unsigned: true } | MySqlType::BigInt { unsigned: false } => {
            WarehouseType::BigInt
        }
        MySqlType::BigInt { unsigned: true } => WarehouseType::Numeric {
            precision: Some(20),
            scale: Some(0),
        },
        MySqlType::Decimal { precision, scale } => WarehouseType::Numeric {
            precision: Some(*precision),
            scale: Some(*scale),
        },
        MySqlType::Float => WarehouseType::Real,
        MySqlType::Double => WarehouseType::DoublePrecision,
        MySqlType::Bit { width: 1 } => WarehouseType::Boolean,
        MySqlType::Bit { width } if *width < 64 => WarehouseType::BigInt,
        MySqlType::Bit { .. } => WarehouseType::Numeric {
            precision: Some(20),
            scale: Some(0),
        },
        MySqlType::Char { length } | MySqlType::VarChar { length } => WarehouseType::VarChar {
            length: Some(*length),
        },
        MySqlType::Text | MySqlType::Enum | MySqlType::Set | MySqlType::Other(_) => {
            WarehouseType::Text
        }
        MySqlType::Binary | MySqlType::Blob => WarehouseType::Bytea,
        MySqlType::Date => WarehouseType::Date,
        MySqlType::Time => WarehouseType::Time,
        MySqlType::DateTime => WarehouseType::Timestamp,
        MySqlType::Timestamp => WarehouseType::TimestampTz,
        MySqlType::Json => WarehouseType::Jsonb,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(data_type: &str, column_type: &str) -> ColumnSchema {
        ColumnSchema {
            name: "c".to_string(),
            typ: MySqlType::parse(data_type, column_type),
            column_type: column_type.to_string(),
            nullable: true,
        }
    }

    #[test]
    fn zero_and_one_make_a_boolean() {
        assert!(is_boolean_sample(&[Cell::I64(0), Cell::I64(1)]));
        assert!(is_boolean_sample(&[Cell::I64(1)]));
        assert!(!is_boolean_sample(&[Cell::I64(0), Cell::I64(2)]));
    }

    #[test]
    fn all_null_columns_are_booleans() {
        assert!(is_boolean_sample(&[]));
    }

    #[test]
    fn maps_integer_widths_without_overflow() {
        assert_eq!(map_type(&column("tinyint", "tinyint(4)"), false), WarehouseType::SmallInt);
        assert_eq!(map_type(&column("tinyint", "tinyint(1)"), true), WarehouseType::Boolean);
        assert_eq!(
            map_type(&column("int", "int(10) unsigned"), false),
            WarehouseType::BigInt
        );
        assert_eq!(
            map_type(&column("bigint", "bigint(20) unsigned"), false),
            WarehouseType::Numeric {
                precision: Some(20),
                scale: Some(0)
            }
        );
    }

    #[test]
    fn maps_temporal_types() {
        assert_eq!(map_type(&column("datetime", "datetime"), false), WarehouseType::Timestamp);
        assert_eq!(
            map_type(&column("timestamp", "timestamp"), false),
            WarehouseType::TimestampTz
        );
        assert_eq!(map_type(&column("json", "json"), false), WarehouseType::Jsonb);
        assert_eq!(
            map_type(&column("varchar", "varchar(64)"), false),
            WarehouseType::VarChar { length: Some(64) }
        );
    }
}
