use tiersync_mysql::types::{ColumnDefinition, MySqlType};
use tiersync_postgres::types::WarehouseType;

/// A column of a source or replica table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: MySqlType,
    /// Full MySQL column type, e.g. `tinyint(1) unsigned`.
    pub column_type: String,
    pub nullable: bool,
}

/// Schema of a source or replica table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    /// Primary key columns in key order. Empty when the table has no primary key.
    pub primary_key: Vec<String>,
    /// `SHOW CREATE TABLE` output, replayed to build an identical replica table.
    pub create_statement: Option<String>,
}

impl TableSchema {
    /// Builds a schema from `information_schema` column definitions.
    pub fn from_definitions(
        name: impl Into<String>,
        definitions: Vec<ColumnDefinition>,
        create_statement: Option<String>,
    ) -> Self {
        let mut key: Vec<(u32, String)> = definitions
            .iter()
            .filter_map(|definition| {
                definition
                    .primary_key_position
                    .map(|position| (position, definition.name.clone()))
            })
            .collect();
        key.sort_by_key(|(position, _)| *position);

        let columns = definitions
            .into_iter()
            .map(|definition| ColumnSchema {
                name: definition.name,
                typ: definition.typ,
                column_type: definition.column_type,
                nullable: definition.nullable,
            })
            .collect();

        Self {
            name: name.into(),
            columns,
            primary_key: key.into_iter().map(|(_, name)| name).collect(),
            create_statement,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Columns identifying a row: the primary key, or every column for tables without one.
    pub fn row_identity(&self) -> Vec<&str> {
        if self.has_primary_key() {
            self.primary_key.iter().map(String::as_str).collect()
        } else {
            self.column_names()
        }
    }

    /// Ordering used to page through rows: `leading` columns, then the row identity columns
    /// not already listed.
    pub fn paging_order(&self, leading: &[String]) -> Vec<String> {
        let mut order: Vec<String> = leading.to_vec();
        for column in self.row_identity() {
            if !order.iter().any(|existing| existing == column) {
                order.push(column.to_string());
            }
        }
        order
    }

    /// Positions of `names` inside the row, skipping unknown names.
    pub fn positions(&self, names: &[String]) -> Vec<usize> {
        names
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect()
    }
}

/// A column of a warehouse table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetColumn {
    pub name: String,
    pub data_type: WarehouseType,
    pub nullable: bool,
}

/// Schema of a warehouse table derived from a replica table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSchema {
    /// Warehouse schema (namespace) holding the table.
    pub schema: String,
    pub name: String,
    pub columns: Vec<TargetColumn>,
    pub primary_key: Vec<String>,
}

impl TargetSchema {
    pub fn column(&self, name: &str) -> Option<&TargetColumn> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    pub fn primary_key(&self) -> Vec<&str> {
        self.primary_key.iter().map(String::as_str).collect()
    }

    /// Schema qualified name, for logging.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str, data_type: &str, pk: Option<u32>) -> ColumnDefinition {
        ColumnDefinition {
            name: name.to_string(),
            typ: MySqlType::parse(data_type, data_type),
            column_type: data_type.to_string(),
            nullable: pk.is_none(),
            primary_key_position: pk,
        }
    }

    #[test]
    fn primary_key_follows_key_positions() {
        let schema = TableSchema::from_definitions(
            "visit",
            vec![
                definition("PatientId", "int", Some(2)),
                definition("Note", "text", None),
                definition("ClinicId", "int", Some(1)),
            ],
            None,
        );
        assert_eq!(schema.primary_key, vec!["ClinicId", "PatientId"]);
    }

    #[test]
    fn paging_order_appends_missing_key_columns() {
        let schema = TableSchema::from_definitions(
            "patient",
            vec![
                definition("Id", "int", Some(1)),
                definition("DateModified", "datetime", None),
            ],
            None,
        );
        assert_eq!(
            schema.paging_order(&["DateModified".to_string()]),
            vec!["DateModified", "Id"]
        );
        assert_eq!(schema.paging_order(&["Id".to_string()]), vec!["Id"]);
    }

    #[test]
    fn tables_without_key_are_identified_by_every_column() {
        let schema = TableSchema::from_definitions(
            "log",
            vec![definition("At", "datetime", None), definition("Line", "text", None)],
            None,
        );
        assert_eq!(schema.row_identity(), vec!["At", "Line"]);
    }
}
