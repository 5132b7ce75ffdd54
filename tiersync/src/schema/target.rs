use tracing::info;

use crate::bail;
use crate::database::{Connector, WarehouseStore};
use crate::error::{ErrorKind, SyncResult};
use crate::resilience::ResilientSession;
use crate::types::{TargetColumn, TargetSchema};

/// Warehouse table ready to receive rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredTable {
    /// Schema to write with: the derived schema for a new table, the existing column types
    /// otherwise.
    pub target: TargetSchema,
    /// The table did not exist and was created.
    pub created: bool,
}

/// Creates the warehouse table when missing, or checks that the existing one can hold the
/// derived schema.
///
/// Fails with [`ErrorKind::SchemaIncompatibility`] when an existing table lacks a column or
/// has a column too narrow for the derived type.
pub async fn ensure_table<K>(
    session: &mut ResilientSession<K>,
    derived: TargetSchema,
) -> SyncResult<EnsuredTable>
where
    K: Connector,
    K::Connection: WarehouseStore,
{
    match session
        .existing_columns(&derived.schema, &derived.name)
        .await?
    {
        None => {
            session.create_warehouse_table(&derived).await?;
            info!(table = %derived.full_name(), columns = derived.columns.len(), "warehouse table created");

            Ok(EnsuredTable {
                target: derived,
                created: true,
            })
        }
        Some(existing) => Ok(EnsuredTable {
            target: reconcile(derived, &existing)?,
            created: false,
        }),
    }
}

/// Validates an existing table against a derived schema and returns the schema to write with.
pub fn reconcile(derived: TargetSchema, existing: &[TargetColumn]) -> SyncResult<TargetSchema> {
    let mut problems = Vec::new();
    let mut columns = Vec::with_capacity(derived.columns.len());

    for column in &derived.columns {
        match existing.iter().find(|existing| existing.name == column.name) {
            None => problems.push(format!("column '{}' is missing", column.name)),
            Some(existing) if !existing.data_type.accepts(&column.data_type) => {
                problems.push(format!(
                    "column '{}' is {} but {} is required",
                    column.name,
                    existing.data_type.as_sql(),
                    column.data_type.as_sql()
                ));
            }
            Some(existing) => columns.push(existing.clone()),
        }
    }

    if !problems.is_empty() {
        bail!(
            ErrorKind::SchemaIncompatibility,
            "Existing warehouse table is incompatible",
            format!("{}: {}", derived.full_name(), problems.join(", "))
        );
    }

    Ok(TargetSchema { columns, ..derived })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WarehouseType;

    fn column(name: &str, data_type: WarehouseType) -> TargetColumn {
        TargetColumn {
            name: name.to_string(),
            data_type,
            nullable: true,
        }
    }

    fn derived() -> TargetSchema {
        TargetSchema {
            schema: "analytics".to_string(),
            name: "patient".to_string(),
            columns: vec![
                column("Id", WarehouseType::Integer),
                column("IsActive", WarehouseType::Boolean),
            ],
            primary_key: vec!["Id".to_string()],
        }
    }

    #[test]
    fn wider_existing_columns_are_kept() {
        let existing = vec![
            column("Id", WarehouseType::BigInt),
            column("IsActive", WarehouseType::SmallInt),
            column("Extra", WarehouseType::Text),
        ];

        let target = reconcile(derived(), &existing).unwrap();
        assert_eq!(target.columns[0].data_type, WarehouseType::BigInt);
        assert_eq!(target.columns[1].data_type, WarehouseType::SmallInt);
        assert_eq!(target.columns.len(), 2);
        assert_eq!(target.primary_key, vec!["Id"]);
    }

    #[test]
    fn narrower_or_missing_columns_are_rejected() {
        let existing = vec![column("Id", WarehouseType::Boolean)];

        let err = reconcile(derived(), &existing).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaIncompatibility);
        let detail = err.detail().unwrap();
        assert!(detail.contains("'Id' is boolean"));
        assert!(detail.contains("'IsActive' is missing"));
    }
}
