use std::fmt;

/// A MySQL column type as reported by `information_schema.columns`.
///
/// Parsed from the `DATA_TYPE` and `COLUMN_TYPE` columns. The raw `COLUMN_TYPE` text is kept
/// by callers next to this value since it carries details (display width, enum members) that
/// only matter when the exact text is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MySqlType {
    TinyInt { unsigned: bool },
    SmallInt { unsigned: bool },
    MediumInt { unsigned: bool },
    Int { unsigned: bool },
    BigInt { unsigned: bool },
    Decimal { precision: u32, scale: u32 },
    Float,
    Double,
    Bit { width: u32 },
    Char { length: u32 },
    VarChar { length: u32 },
    Text,
    Binary,
    Blob,
    Date,
    Time,
    DateTime,
    Timestamp,
    Year,
    Json,
    Enum,
    Set,
    Other(String),
}

impl MySqlType {
    /// Parses `information_schema` type information.
    ///
    /// `data_type` is the bare type name (`int`) and `column_type` the full definition
    /// (`int(10) unsigned`). Unknown types are preserved in [`MySqlType::Other`].
    pub fn parse(data_type: &str, column_type: &str) -> MySqlType {
        let data_type = data_type.trim().to_ascii_lowercase();
        let column_type = column_type.trim().to_ascii_lowercase();
        let unsigned = column_type.contains("unsigned");
        let (first, second) = type_arguments(&column_type);

        match data_type.as_str() {
            "tinyint" | "bool" | "boolean" => MySqlType::TinyInt { unsigned },
            "smallint" => MySqlType::SmallInt { unsigned },
            "mediumint" => MySqlType::MediumInt { unsigned },
            "int" | "integer" => MySqlType::Int { unsigned },
            "bigint" => MySqlType::BigInt { unsigned },
            "decimal" | "numeric" => MySqlType::Decimal {
                precision: first.unwrap_or(10),
                scale: second.unwrap_or(0),
            },
            "float" => MySqlType::Float,
            "double" | "real" => MySqlType::Double,
            "bit" => MySqlType::Bit {
                width: first.unwrap_or(1),
            },
            "char" => MySqlType::Char {
                length: first.unwrap_or(1),
            },
            "varchar" => MySqlType::VarChar {
                length: first.unwrap_or(255),
            },
            "tinytext" | "text" | "mediumtext" | "longtext" => MySqlType::Text,
            "binary" | "varbinary" => MySqlType::Binary,
            "tinyblob" | "blob" | "mediumblob" | "longblob" => MySqlType::Blob,
            "date" => MySqlType::Date,
            "time" => MySqlType::Time,
            "datetime" => MySqlType::DateTime,
            "timestamp" => MySqlType::Timestamp,
            "year" => MySqlType::Year,
            "json" => MySqlType::Json,
            "enum" => MySqlType::Enum,
            "set" => MySqlType::Set,
            other => MySqlType::Other(other.to_string()),
        }
    }

    /// Returns `true` for single-byte integers, the candidates of the boolean heuristic.
    pub fn is_tiny_int(&self) -> bool {
        matches!(self, MySqlType::TinyInt { .. })
    }

    /// Returns `true` for integer types that can key a range partition.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            MySqlType::TinyInt { .. }
                | MySqlType::SmallInt { .. }
                | MySqlType::MediumInt { .. }
                | MySqlType::Int { .. }
                | MySqlType::BigInt { .. }
        )
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            MySqlType::TinyInt { unsigned: true }
                | MySqlType::SmallInt { unsigned: true }
                | MySqlType::MediumInt { unsigned: true }
                | MySqlType::Int { unsigned: true }
                | MySqlType::BigInt { unsigned: true }
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            MySqlType::Date | MySqlType::Time | MySqlType::DateTime | MySqlType::Timestamp
        )
    }
}

impl fmt::Display for MySqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = |unsigned: bool| if unsigned { " unsigned" } else { "" };

        match self {
            MySqlType::TinyInt { unsigned } => write!(f, "tinyint{}", sign(*unsigned)),
            MySqlType::SmallInt { unsigned } => write!(f, "smallint{}", sign(*unsigned)),
            MySqlType::MediumInt { unsigned } => write!(f, "mediumint{}", sign(*unsigned)),
            MySqlType::Int { unsigned } => write!(f, "int{}", sign(*unsigned)),
            MySqlType::BigInt { unsigned } => write!(f, "bigint{}", sign(*unsigned)),
            MySqlType::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            MySqlType::Float => f.write_str("float"),
            MySqlType::Double => f.write_str("double"),
            MySqlType::Bit { width } => write!(f, "bit({width})"),
            MySqlType::Char { length } => write!(f, "char({length})"),
            MySqlType::VarChar { length } => write!(f, "varchar({length})"),
            MySqlType::Text => f.write_str("text"),
            MySqlType::Binary => f.write_str("varbinary"),
            MySqlType::Blob => f.write_str("blob"),
            MySqlType::Date => f.write_str("date"),
            MySqlType::Time => f.write_str("time"),
            MySqlType::DateTime => f.write_str("datetime"),
            MySqlType::Timestamp => f.write_str("timestamp"),
            MySqlType::Year => f.write_str("year"),
            MySqlType::Json => f.write_str("json"),
            MySqlType::Enum => f.write_str("enum"),
            MySqlType::Set => f.write_str("set"),
            MySqlType::Other(name) => f.write_str(name),
        }
    }
}

/// Extracts the numeric arguments of `name(a,b)` style definitions.
///
/// Enum and set member lists are not numeric and yield `(None, None)`.
fn type_arguments(column_type: &str) -> (Option<u32>, Option<u32>) {
    let Some(start) = column_type.find('(') else {
        return (None, None);
    };
    let Some(end) = column_type[start..].find(')') else {
        return (None, None);
    };

    let mut arguments = column_type[start + 1..start + end]
        .split(',')
        .map(|argument| argument.trim().parse::<u32>().ok());

    let first = arguments.next().flatten();
    let second = arguments.next().flatten();

    (first, second)
}

/// Column metadata as read from `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub typ: MySqlType,
    /// Full `COLUMN_TYPE` text, e.g. `tinyint(1) unsigned`.
    pub column_type: String,
    pub nullable: bool,
    /// Position of the column inside the primary key, starting at 1.
    pub primary_key_position: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_types_with_sign() {
        assert_eq!(
            MySqlType::parse("tinyint", "tinyint(1)"),
            MySqlType::TinyInt { unsigned: false }
        );
        assert_eq!(
            MySqlType::parse("INT", "int(10) unsigned"),
            MySqlType::Int { unsigned: true }
        );
        assert!(MySqlType::parse("bigint", "bigint(20)").is_integer());
    }

    #[test]
    fn parses_type_arguments() {
        assert_eq!(
            MySqlType::parse("decimal", "decimal(12,4)"),
            MySqlType::Decimal {
                precision: 12,
                scale: 4
            }
        );
        assert_eq!(
            MySqlType::parse("varchar", "varchar(64)"),
            MySqlType::VarChar { length: 64 }
        );
        assert_eq!(
            MySqlType::parse("enum", "enum('a','b')"),
            MySqlType::Enum
        );
    }

    #[test]
    fn keeps_unknown_types() {
        assert_eq!(
            MySqlType::parse("geometry", "geometry"),
            MySqlType::Other("geometry".to_string())
        );
    }
}
