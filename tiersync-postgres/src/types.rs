use std::fmt;

/// A column type of a warehouse table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    /// `numeric`, unconstrained when `precision` is `None`.
    Numeric {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Real,
    DoublePrecision,
    VarChar {
        length: Option<u32>,
    },
    Text,
    Bytea,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Jsonb,
    /// A type this engine never derives, kept by name when read from an existing table.
    Other(String),
}

impl WarehouseType {
    /// Returns the type as written in DDL and casts.
    pub fn as_sql(&self) -> String {
        match self {
            WarehouseType::Boolean => "boolean".to_string(),
            WarehouseType::SmallInt => "smallint".to_string(),
            WarehouseType::Integer => "integer".to_string(),
            WarehouseType::BigInt => "bigint".to_string(),
            WarehouseType::Numeric {
                precision: Some(precision),
                scale,
            } => format!("numeric({precision},{})", scale.unwrap_or(0)),
            WarehouseType::Numeric {
                precision: None, ..
            } => "numeric".to_string(),
            WarehouseType::Real => "real".to_string(),
            WarehouseType::DoublePrecision => "double precision".to_string(),
            WarehouseType::VarChar {
                length: Some(length),
            } => format!("varchar({length})"),
            WarehouseType::VarChar { length: None } => "varchar".to_string(),
            WarehouseType::Text => "text".to_string(),
            WarehouseType::Bytea => "bytea".to_string(),
            WarehouseType::Date => "date".to_string(),
            WarehouseType::Time => "time".to_string(),
            WarehouseType::Timestamp => "timestamp".to_string(),
            WarehouseType::TimestampTz => "timestamptz".to_string(),
            WarehouseType::Jsonb => "jsonb".to_string(),
            WarehouseType::Other(name) => name.clone(),
        }
    }

    /// Builds a type from the columns of `information_schema.columns`.
    pub fn from_information_schema(
        data_type: &str,
        character_maximum_length: Option<i32>,
        numeric_precision: Option<i32>,
        numeric_scale: Option<i32>,
    ) -> WarehouseType {
        let to_u32 = |value: Option<i32>| value.and_then(|value| u32::try_from(value).ok());

        match data_type.trim().to_ascii_lowercase().as_str() {
            "boolean" => WarehouseType::Boolean,
            "smallint" => WarehouseType::SmallInt,
            "integer" => WarehouseType::Integer,
            "bigint" => WarehouseType::BigInt,
            "numeric" => WarehouseType::Numeric {
                precision: to_u32(numeric_precision),
                scale: to_u32(numeric_scale),
            },
            "real" => WarehouseType::Real,
            "double precision" => WarehouseType::DoublePrecision,
            "character varying" => WarehouseType::VarChar {
                length: to_u32(character_maximum_length),
            },
            "text" => WarehouseType::Text,
            "bytea" => WarehouseType::Bytea,
            "date" => WarehouseType::Date,
            "time without time zone" => WarehouseType::Time,
            "timestamp without time zone" => WarehouseType::Timestamp,
            "timestamp with time zone" => WarehouseType::TimestampTz,
            "jsonb" => WarehouseType::Jsonb,
            other => WarehouseType::Other(other.to_string()),
        }
    }

    /// Returns `true` when a column of this type can store every value of `derived`.
    ///
    /// An existing warehouse column that is wider than the freshly derived one is kept as is.
    pub fn accepts(&self, derived: &WarehouseType) -> bool {
        use WarehouseType::*;

        if self == derived {
            return true;
        }

        match (self, derived) {
            (SmallInt, Boolean) => true,
            (Integer, Boolean | SmallInt) => true,
            (BigInt, Boolean | SmallInt | Integer) => true,
            (Numeric { precision: None, .. }, SmallInt | Integer | BigInt | Numeric { .. }) => {
                true
            }
            (
                Numeric {
                    precision: Some(precision),
                    scale,
                },
                derived,
            ) => {
                let integer_digits = precision.saturating_sub(scale.unwrap_or(0));
                match derived {
                    SmallInt => integer_digits >= 5,
                    Integer => integer_digits >= 10,
                    BigInt => integer_digits >= 19,
                    Numeric {
                        precision: Some(other_precision),
                        scale: other_scale,
                    } => {
                        let other_scale = other_scale.unwrap_or(0);
                        scale.unwrap_or(0) >= other_scale
                            && integer_digits >= other_precision.saturating_sub(other_scale)
                    }
                    _ => false,
                }
            }
            (DoublePrecision, Real | SmallInt | Integer) => true,
            (Real, SmallInt) => true,
            (Text, VarChar { .. }) => true,
            (VarChar { length: None }, VarChar { .. }) => true,
            (
                VarChar {
                    length: Some(existing),
                },
                VarChar {
                    length: Some(derived),
                },
            ) => existing >= derived,
            (TimestampTz, Timestamp) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WarehouseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_parameterized_types() {
        assert_eq!(
            WarehouseType::Numeric {
                precision: Some(12),
                scale: Some(2)
            }
            .as_sql(),
            "numeric(12,2)"
        );
        assert_eq!(
            WarehouseType::VarChar { length: Some(64) }.as_sql(),
            "varchar(64)"
        );
    }

    #[test]
    fn reads_information_schema_names() {
        assert_eq!(
            WarehouseType::from_information_schema("character varying", Some(64), None, None),
            WarehouseType::VarChar { length: Some(64) }
        );
        assert_eq!(
            WarehouseType::from_information_schema("timestamp with time zone", None, None, None),
            WarehouseType::TimestampTz
        );
    }

    #[test]
    fn wider_columns_accept_narrower_values() {
        assert!(WarehouseType::SmallInt.accepts(&WarehouseType::Boolean));
        assert!(WarehouseType::BigInt.accepts(&WarehouseType::Integer));
        assert!(WarehouseType::Text.accepts(&WarehouseType::VarChar { length: Some(10) }));
        assert!(
            WarehouseType::Numeric {
                precision: Some(20),
                scale: Some(0)
            }
            .accepts(&WarehouseType::BigInt)
        );
    }

    #[test]
    fn narrower_or_unrelated_columns_are_rejected() {
        assert!(!WarehouseType::Boolean.accepts(&WarehouseType::SmallInt));
        assert!(!WarehouseType::Integer.accepts(&WarehouseType::BigInt));
        assert!(!WarehouseType::Date.accepts(&WarehouseType::Text));
        assert!(
            !WarehouseType::VarChar { length: Some(8) }
                .accepts(&WarehouseType::VarChar { length: Some(16) })
        );
    }
}
