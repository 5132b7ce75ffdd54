//! SQL text builders for the MySQL source and replica.
//!
//! Every builder returns statement text with `?` placeholders. Callers bind values in the order
//! documented on each builder.

/// Placeholder limit of a single prepared statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Lists the columns of a table in the current database, primary key position included.
///
/// Text columns are cast since `information_schema` reports some of them with a binary
/// collation. Binds: table name.
pub const TABLE_COLUMNS_QUERY: &str = r#"
    select
        cast(c.column_name as char) as column_name,
        cast(c.data_type as char) as data_type,
        cast(c.column_type as char) as column_type,
        cast(c.is_nullable as char) as is_nullable,
        cast(k.ordinal_position as signed) as pk_position
    from information_schema.columns c
    left join information_schema.key_column_usage k
        on k.table_schema = c.table_schema
        and k.table_name = c.table_name
        and k.column_name = c.column_name
        and k.constraint_name = 'PRIMARY'
    where c.table_schema = database()
        and c.table_name = ?
    order by c.ordinal_position
"#;

/// Reads the progress row of one table. Binds: table name.
pub const SELECT_COPY_PROGRESS: &str = r#"
    select table_name, rows_copied, cast(copy_status as char) as copy_status,
        last_primary_value, primary_column_name, copy_duration_ms,
        last_success_at, updated_at
    from copy_progress
    where table_name = ?
"#;

/// Inserts or replaces the progress row of one table.
///
/// Binds: table name, rows copied, status, last primary value, primary column name,
/// duration in milliseconds, last success timestamp, update timestamp.
pub const UPSERT_COPY_PROGRESS: &str = r#"
    insert into copy_progress (
        table_name, rows_copied, copy_status, last_primary_value,
        primary_column_name, copy_duration_ms, last_success_at, updated_at
    )
    values (?, ?, ?, ?, ?, ?, ?, ?)
    on duplicate key update
        rows_copied = values(rows_copied),
        copy_status = values(copy_status),
        last_primary_value = values(last_primary_value),
        primary_column_name = values(primary_column_name),
        copy_duration_ms = values(copy_duration_ms),
        last_success_at = values(last_success_at),
        updated_at = values(updated_at)
"#;

/// Flags the progress row of one table as failed, keeping its other fields.
///
/// Binds: table name.
pub const MARK_COPY_FAILED: &str = r#"
    update copy_progress
    set copy_status = 'failed', updated_at = current_timestamp(6)
    where table_name = ?
"#;

/// Quotes an identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

fn quote_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| quote_identifier(column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Kind of one side of a column range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundKind {
    Unbounded,
    Inclusive,
    Exclusive,
}

/// A range restriction on one column. Bounded sides each take one placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeClause<'a> {
    pub column: &'a str,
    pub lower: BoundKind,
    pub upper: BoundKind,
}

impl RangeClause<'_> {
    /// Number of placeholders this clause takes.
    pub fn bind_count(&self) -> usize {
        usize::from(self.lower != BoundKind::Unbounded)
            + usize::from(self.upper != BoundKind::Unbounded)
    }
}

/// Shape of a row selection.
#[derive(Debug, Clone, Default)]
pub struct SelectQuery<'a> {
    pub ranges: Vec<RangeClause<'a>>,
    pub order_by: Vec<&'a str>,
    /// Restricts to rows strictly after a cursor over `order_by`.
    pub keyset: bool,
    pub limit: Option<usize>,
}

/// Builds the `where` clause for range restrictions and an optional keyset cursor.
///
/// Binds: for every range its lower then upper bound when present, then the keyset values in
/// the order given by [`keyset_bind_order`].
fn where_clause(ranges: &[RangeClause<'_>], keyset_columns: Option<&[&str]>) -> String {
    let mut conditions = Vec::new();

    for range in ranges {
        let column = quote_identifier(range.column);
        match range.lower {
            BoundKind::Inclusive => conditions.push(format!("{column} >= ?")),
            BoundKind::Exclusive => conditions.push(format!("{column} > ?")),
            BoundKind::Unbounded => {}
        }
        match range.upper {
            BoundKind::Inclusive => conditions.push(format!("{column} <= ?")),
            BoundKind::Exclusive => conditions.push(format!("{column} < ?")),
            BoundKind::Unbounded => {}
        }
    }

    if let Some(columns) = keyset_columns.filter(|columns| !columns.is_empty()) {
        let alternatives = (0..columns.len())
            .map(|position| {
                let mut parts: Vec<String> = columns[..position]
                    .iter()
                    .map(|column| format!("{} <=> ?", quote_identifier(column)))
                    .collect();
                let column = quote_identifier(columns[position]);
                parts.push(format!(
                    "({column} > ? or (? is null and {column} is not null))"
                ));
                format!("({})", parts.join(" and "))
            })
            .collect::<Vec<_>>();
        conditions.push(format!("({})", alternatives.join(" or ")));
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!(" where {}", conditions.join(" and "))
    }
}

/// Index into the cursor values for every keyset placeholder, in bind order.
///
/// `NULL` sorts first in MySQL, so a `NULL` cursor value is passed by every non-null value and
/// the prefix columns compare with the null-safe `<=>`. For cursor columns `(a, b)` the
/// predicate is `((a > ? or (? is null and a is not null))) or (a <=> ? and (b > ? or (? is
/// null and b is not null)))`, which binds `[0, 0, 0, 1, 1]`.
pub fn keyset_bind_order(columns: usize) -> Vec<usize> {
    (0..columns)
        .flat_map(|position| (0..position).chain([position, position]))
        .collect()
}

/// Builds a `select` of `columns` from `table`.
pub fn select_rows_sql(table: &str, columns: &[&str], query: &SelectQuery<'_>) -> String {
    let keyset = query.keyset.then_some(query.order_by.as_slice());
    let mut sql = format!(
        "select {} from {}{}",
        quote_list(columns),
        quote_identifier(table),
        where_clause(&query.ranges, keyset)
    );

    if !query.order_by.is_empty() {
        sql.push_str(&format!(" order by {}", quote_list(&query.order_by)));
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" limit {limit}"));
    }

    sql
}

/// Builds a `count(*)` restricted by `ranges`.
pub fn count_rows_sql(table: &str, ranges: &[RangeClause<'_>]) -> String {
    format!(
        "select count(*) from {}{}",
        quote_identifier(table),
        where_clause(ranges, None)
    )
}

/// Builds a query returning the smallest and largest value of `column` within `ranges`.
pub fn column_bounds_sql(table: &str, column: &str, ranges: &[RangeClause<'_>]) -> String {
    let column = quote_identifier(column);
    format!(
        "select min({column}), max({column}) from {}{}",
        quote_identifier(table),
        where_clause(ranges, None)
    )
}

/// Builds a query sampling up to `limit` distinct non-null values of `column`.
pub fn distinct_values_sql(table: &str, column: &str, limit: usize) -> String {
    let column = quote_identifier(column);
    format!(
        "select distinct {column} from {} where {column} is not null limit {limit}",
        quote_identifier(table)
    )
}

pub fn show_create_table_sql(table: &str) -> String {
    format!("show create table {}", quote_identifier(table))
}

pub fn drop_table_sql(table: &str) -> String {
    format!("drop table if exists {}", quote_identifier(table))
}

pub fn truncate_table_sql(table: &str) -> String {
    format!("truncate table {}", quote_identifier(table))
}

/// Rewrites a `SHOW CREATE TABLE` statement so that replaying it is a no-op for existing tables.
pub fn create_if_missing(create_statement: &str) -> String {
    let trimmed = create_statement.trim_start();
    let prefix = "create table";

    if trimmed.len() >= prefix.len() && trimmed[..prefix.len()].eq_ignore_ascii_case(prefix) {
        let rest = &trimmed[prefix.len()..];
        if rest
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("if not exists")
        {
            return trimmed.to_string();
        }
        return format!("CREATE TABLE IF NOT EXISTS{rest}");
    }

    trimmed.to_string()
}

/// Largest number of rows a multi-row insert of `columns` columns can carry.
pub fn max_rows_per_insert(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

/// Builds a multi-row `insert ... on duplicate key update` over `columns`.
///
/// Columns listed in `key_columns` are not updated. Binds: every row's values in column order.
pub fn upsert_rows_sql(
    table: &str,
    columns: &[&str],
    key_columns: &[&str],
    row_count: usize,
) -> String {
    let row_placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![row_placeholders.as_str(); row_count].join(", ");

    let mut updates: Vec<String> = columns
        .iter()
        .filter(|column| !key_columns.contains(column))
        .map(|column| {
            let column = quote_identifier(column);
            format!("{column} = values({column})")
        })
        .collect();

    if updates.is_empty() {
        // Key-only tables still need a no-op update to ignore duplicates.
        if let Some(first) = columns.first() {
            let column = quote_identifier(first);
            updates.push(format!("{column} = {column}"));
        }
    }

    format!(
        "insert into {} ({}) values {} on duplicate key update {}",
        quote_identifier(table),
        quote_list(columns),
        values,
        updates.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_embedded_backticks() {
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn select_with_range_and_keyset() {
        let query = SelectQuery {
            ranges: vec![RangeClause {
                column: "DateModified",
                lower: BoundKind::Exclusive,
                upper: BoundKind::Unbounded,
            }],
            order_by: vec!["DateModified", "Id"],
            keyset: true,
            limit: Some(500),
        };

        assert_eq!(
            select_rows_sql("patient", &["Id", "DateModified"], &query),
            "select `Id`, `DateModified` from `patient` where `DateModified` > ? and \
             (((`DateModified` > ? or (? is null and `DateModified` is not null))) or \
             (`DateModified` <=> ? and (`Id` > ? or (? is null and `Id` is not null)))) \
             order by `DateModified`, `Id` limit 500"
        );
    }

    #[test]
    fn keyset_binds_prefix_then_column_twice() {
        assert_eq!(keyset_bind_order(1), vec![0, 0]);
        assert_eq!(keyset_bind_order(3), vec![0, 0, 0, 1, 1, 0, 1, 2, 2]);
    }

    #[test]
    fn keyset_placeholders_match_bind_order() {
        let query = SelectQuery {
            order_by: vec!["a", "b", "c"],
            keyset: true,
            ..SelectQuery::default()
        };

        let sql = select_rows_sql("t", &["a", "b", "c"], &query);
        assert_eq!(sql.matches('?').count(), keyset_bind_order(3).len());
        assert!(!sql.contains("` = ?"));
    }

    #[test]
    fn count_without_ranges_has_no_where() {
        assert_eq!(count_rows_sql("orders", &[]), "select count(*) from `orders`");
    }

    #[test]
    fn upsert_skips_key_columns_in_update() {
        assert_eq!(
            upsert_rows_sql("patient", &["Id", "Name"], &["Id"], 2),
            "insert into `patient` (`Id`, `Name`) values (?, ?), (?, ?) \
             on duplicate key update `Name` = values(`Name`)"
        );
    }

    #[test]
    fn upsert_of_key_only_table_ignores_duplicates() {
        assert!(upsert_rows_sql("tags", &["Id"], &["Id"], 1).ends_with("`Id` = `Id`"));
    }

    #[test]
    fn create_statement_becomes_idempotent() {
        assert_eq!(
            create_if_missing("CREATE TABLE `patient` (`Id` int)"),
            "CREATE TABLE IF NOT EXISTS `patient` (`Id` int)"
        );
        assert_eq!(
            create_if_missing("CREATE TABLE IF NOT EXISTS `x` (`Id` int)"),
            "CREATE TABLE IF NOT EXISTS `x` (`Id` int)"
        );
    }

    #[test]
    fn insert_row_limit_respects_placeholders() {
        assert_eq!(max_rows_per_insert(10), 6_553);
        assert_eq!(max_rows_per_insert(0), MAX_BIND_PARAMS);
    }
}
