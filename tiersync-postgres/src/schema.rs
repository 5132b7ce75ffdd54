//! SQL text builders for the warehouse.

use pg_escape::quote_identifier;

/// Bind parameter limit of the PostgreSQL extended protocol.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Lists the columns of one table, with the `information_schema` domains cast to plain types.
///
/// Binds: schema name, table name.
pub const EXISTING_COLUMNS_QUERY: &str = r#"
    select column_name::text as column_name,
        data_type::text as data_type,
        character_maximum_length::int4 as character_maximum_length,
        numeric_precision::int4 as numeric_precision,
        numeric_scale::int4 as numeric_scale,
        (is_nullable = 'YES') as nullable
    from information_schema.columns
    where table_schema = $1 and table_name = $2
    order by ordinal_position
"#;

/// Reads the load progress of one table. Binds: table name.
pub const SELECT_LOAD_PROGRESS: &str = r#"
    select table_name, rows_loaded, load_status, load_strategy, last_loaded_at,
        created_at, updated_at
    from tiersync.load_progress
    where table_name = $1
"#;

/// Inserts or updates the load progress of one table, keeping `created_at`.
///
/// Binds: table name, rows loaded, status, strategy, last loaded timestamp.
pub const UPSERT_LOAD_PROGRESS: &str = r#"
    insert into tiersync.load_progress (
        table_name, rows_loaded, load_status, load_strategy, last_loaded_at
    )
    values ($1, $2, $3, $4, $5)
    on conflict (table_name) do update set
        rows_loaded = excluded.rows_loaded,
        load_status = excluded.load_status,
        load_strategy = excluded.load_strategy,
        last_loaded_at = excluded.last_loaded_at,
        updated_at = now()
"#;

/// Flags the load progress of one table as failed. Binds: table name.
pub const MARK_LOAD_FAILED: &str = r#"
    update tiersync.load_progress
    set load_status = 'failed', updated_at = now()
    where table_name = $1
"#;

/// A column of a table to create or write.
#[derive(Debug, Clone, Copy)]
pub struct ColumnDef<'a> {
    pub name: &'a str,
    /// Type as written in DDL, e.g. `numeric(12,2)`.
    pub type_sql: &'a str,
    pub nullable: bool,
}

/// Quotes `schema.table`.
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

fn quote_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(|name| quote_identifier(name).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn create_schema_sql(schema: &str) -> String {
    format!("create schema if not exists {}", quote_identifier(schema))
}

/// Builds a `create table if not exists` with an optional primary key.
pub fn create_table_sql(
    schema: &str,
    table: &str,
    columns: &[ColumnDef<'_>],
    primary_key: &[&str],
) -> String {
    let mut definitions: Vec<String> = columns
        .iter()
        .map(|column| {
            let null = if column.nullable { "" } else { " not null" };
            format!(
                "{} {}{}",
                quote_identifier(column.name),
                column.type_sql,
                null
            )
        })
        .collect();

    if !primary_key.is_empty() {
        definitions.push(format!(
            "primary key ({})",
            quote_list(primary_key.iter().copied())
        ));
    }

    format!(
        "create table if not exists {} ({})",
        qualified_name(schema, table),
        definitions.join(", ")
    )
}

pub fn truncate_table_sql(schema: &str, table: &str) -> String {
    format!("truncate table {}", qualified_name(schema, table))
}

pub fn count_rows_sql(schema: &str, table: &str) -> String {
    format!("select count(*) from {}", qualified_name(schema, table))
}

/// Builds a query returning the largest value of `column` rendered as text.
pub fn max_value_sql(schema: &str, table: &str, column: &str) -> String {
    format!(
        "select max({})::text from {}",
        quote_identifier(column),
        qualified_name(schema, table)
    )
}

/// Largest number of rows a multi-row insert of `columns` columns can carry.
pub fn max_rows_per_insert(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

/// Builds the conflict clause shared by the insert and the staged merge.
fn conflict_clause(columns: &[ColumnDef<'_>], primary_key: &[&str]) -> String {
    if primary_key.is_empty() {
        return String::new();
    }

    let updates: Vec<String> = columns
        .iter()
        .filter(|column| !primary_key.contains(&column.name))
        .map(|column| {
            let name = quote_identifier(column.name);
            format!("{name} = excluded.{name}")
        })
        .collect();

    let target = quote_list(primary_key.iter().copied());
    if updates.is_empty() {
        format!(" on conflict ({target}) do nothing")
    } else {
        format!(" on conflict ({target}) do update set {}", updates.join(", "))
    }
}

/// Builds a multi-row insert that upserts on the primary key.
///
/// Every value is bound as text and cast to its column type. Binds: every row's values in
/// column order.
pub fn upsert_rows_sql(
    schema: &str,
    table: &str,
    columns: &[ColumnDef<'_>],
    primary_key: &[&str],
    row_count: usize,
) -> String {
    let mut placeholder = 0usize;
    let rows: Vec<String> = (0..row_count)
        .map(|_| {
            let values: Vec<String> = columns
                .iter()
                .map(|column| {
                    placeholder += 1;
                    format!("${placeholder}::{}", column.type_sql)
                })
                .collect();
            format!("({})", values.join(", "))
        })
        .collect();

    format!(
        "insert into {} ({}) values {}{}",
        qualified_name(schema, table),
        quote_list(columns.iter().map(|column| column.name)),
        rows.join(", "),
        conflict_clause(columns, primary_key)
    )
}

/// Builds a temporary staging table shaped like the target.
pub fn create_staging_table_sql(staging: &str, schema: &str, table: &str) -> String {
    format!(
        "create temporary table {} (like {} including defaults)",
        quote_identifier(staging),
        qualified_name(schema, table)
    )
}

pub fn drop_staging_table_sql(staging: &str) -> String {
    format!("drop table if exists {}", quote_identifier(staging))
}

/// Builds the `copy ... from stdin` statement for a CSV file with the given columns.
pub fn copy_from_stdin_sql(staging: &str, columns: &[ColumnDef<'_>]) -> String {
    format!(
        "copy {} ({}) from stdin with (format csv)",
        quote_identifier(staging),
        quote_list(columns.iter().map(|column| column.name))
    )
}

/// Builds the statement moving staged rows into the target, upserting on the primary key.
pub fn merge_staging_sql(
    staging: &str,
    schema: &str,
    table: &str,
    columns: &[ColumnDef<'_>],
    primary_key: &[&str],
) -> String {
    let names = quote_list(columns.iter().map(|column| column.name));
    format!(
        "insert into {} ({names}) select {names} from {}{}",
        qualified_name(schema, table),
        quote_identifier(staging),
        conflict_clause(columns, primary_key)
    )
}
