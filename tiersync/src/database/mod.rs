//! Database access for the three tiers.
//!
//! A [`Connector`] opens connections to one tier. The connection types implement the role
//! traits the engine needs from that tier: [`RowSource`] for the source and the replica,
//! [`ReplicaStore`] for the replica and [`WarehouseStore`] for the warehouse. Engine code never
//! calls these traits directly; it goes through a
//! [`ResilientSession`](crate::resilience::ResilientSession), which adds retries and rate
//! limiting.

use std::fmt;
use std::future::Future;
use std::ops::Bound;
use std::path::Path;

use tokio::sync::mpsc;

use crate::error::{ErrorKind, SyncResult};
use crate::state::{CopyProgress, LoadProgress};
use crate::types::{Cell, TableRow, TableSchema, TargetColumn, TargetSchema};

pub mod csv;
pub mod mysql;
pub mod postgres;

/// The tier a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseRole {
    Source,
    Replica,
    Warehouse,
}

impl DatabaseRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseRole::Source => "source",
            DatabaseRole::Replica => "replica",
            DatabaseRole::Warehouse => "warehouse",
        }
    }

    /// Kind of errors raised when a connection of this tier is lost or cannot be opened.
    pub fn connection_error_kind(&self) -> ErrorKind {
        match self {
            DatabaseRole::Source => ErrorKind::SourceConnectionFailed,
            DatabaseRole::Replica => ErrorKind::ReplicaConnectionFailed,
            DatabaseRole::Warehouse => ErrorKind::WarehouseConnectionFailed,
        }
    }

    /// Kind of errors raised when a statement of this tier is rejected.
    pub fn query_error_kind(&self) -> ErrorKind {
        match self {
            DatabaseRole::Source => ErrorKind::SourceQueryFailed,
            DatabaseRole::Replica => ErrorKind::ReplicaQueryFailed,
            DatabaseRole::Warehouse => ErrorKind::WarehouseQueryFailed,
        }
    }
}

impl fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opens connections to one database tier.
///
/// Connections are cheap handles that can be cloned into a statement future. A connection that
/// failed with a transient error is handed back through [`Connector::discard`] and never reused.
pub trait Connector: Clone + Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    fn role(&self) -> DatabaseRole;

    fn connect(&self) -> impl Future<Output = SyncResult<Self::Connection>> + Send;

    fn discard(&self, connection: Self::Connection) -> impl Future<Output = ()> + Send {
        async move { drop(connection) }
    }
}

/// A range restriction on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRange {
    pub column: String,
    pub lower: Bound<Cell>,
    pub upper: Bound<Cell>,
}

impl ColumnRange {
    pub fn contains(&self, value: &Cell) -> bool {
        if value.is_null() {
            return false;
        }

        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(lower) => value.compare(lower).is_ge(),
            Bound::Excluded(lower) => value.compare(lower).is_gt(),
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(upper) => value.compare(upper).is_le(),
            Bound::Excluded(upper) => value.compare(upper).is_lt(),
        };

        above && below
    }
}

/// Conjunction of column ranges selecting a subset of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFilter {
    pub ranges: Vec<ColumnRange>,
}

impl RowFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Rows whose `column` is greater than (or equal to, when `inclusive`) `value`.
    pub fn after(column: impl Into<String>, value: Cell, inclusive: bool) -> Self {
        Self::all().and(ColumnRange {
            column: column.into(),
            lower: if inclusive {
                Bound::Included(value)
            } else {
                Bound::Excluded(value)
            },
            upper: Bound::Unbounded,
        })
    }

    pub fn and(mut self, range: ColumnRange) -> Self {
        self.ranges.push(range);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Evaluates the filter against a row. Ranges on unknown columns never match.
    pub fn matches(&self, schema: &TableSchema, row: &TableRow) -> bool {
        self.ranges.iter().all(|range| {
            schema
                .column_index(&range.column)
                .and_then(|index| row.values.get(index))
                .is_some_and(|value| range.contains(value))
        })
    }
}

/// One page of an ordered row selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRequest {
    pub filter: RowFilter,
    pub order_by: Vec<String>,
    /// Only rows strictly after these values of `order_by` are returned.
    pub after: Option<Vec<Cell>>,
    pub limit: Option<usize>,
}

impl PageRequest {
    pub fn filtered(filter: RowFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Returns `true` when `row` belongs to this page, ignoring the limit.
    pub fn admits(&self, schema: &TableSchema, row: &TableRow) -> bool {
        if !self.filter.matches(schema, row) {
            return false;
        }

        match &self.after {
            None => true,
            Some(cursor) => {
                let positions = schema.positions(&self.order_by);
                keyset_after(&row.project(&positions), cursor)
            }
        }
    }
}

/// Evaluates the keyset predicate sent to MySQL for `cursor` against the ordering `key` of a
/// row.
///
/// Comparisons follow SQL: `=` and `>` are unknown when either side is `NULL`, and only the
/// null-safe `<=>` and `is null` tests see `NULL` values. The predicate holds exactly when
/// `key` sorts after `cursor` with `NULL` first.
pub fn keyset_after(key: &[Cell], cursor: &[Cell]) -> bool {
    (0..key.len().min(cursor.len())).any(|position| {
        let prefix_equal = key[..position]
            .iter()
            .zip(&cursor[..position])
            .all(|(value, bound)| null_safe_eq(value, bound));
        let value = &key[position];
        let bound = &cursor[position];

        // `value > ? or (? is null and value is not null)`
        prefix_equal
            && (sql_greater(value, bound) == Some(true) || (bound.is_null() && !value.is_null()))
    })
}

/// `value > bound` under three-valued logic.
fn sql_greater(value: &Cell, bound: &Cell) -> Option<bool> {
    if value.is_null() || bound.is_null() {
        None
    } else {
        Some(value.compare(bound).is_gt())
    }
}

/// `value <=> bound`.
fn null_safe_eq(value: &Cell, bound: &Cell) -> bool {
    match (value.is_null(), bound.is_null()) {
        (true, true) => true,
        (false, false) => value.compare(bound).is_eq(),
        _ => false,
    }
}

/// Walks an ordered selection page by page using the last row of each page as cursor.
#[derive(Debug, Clone)]
pub struct KeysetPager {
    filter: RowFilter,
    order_by: Vec<String>,
    positions: Vec<usize>,
    page_size: usize,
    cursor: Option<Vec<Cell>>,
    exhausted: bool,
}

impl KeysetPager {
    pub fn new(
        schema: &TableSchema,
        filter: RowFilter,
        order_by: Vec<String>,
        page_size: usize,
    ) -> Self {
        let positions = schema.positions(&order_by);
        Self {
            filter,
            order_by,
            positions,
            page_size: page_size.max(1),
            cursor: None,
            exhausted: false,
        }
    }

    /// Returns the request of the next page, or `None` once the selection is exhausted.
    pub fn next_request(&self) -> Option<PageRequest> {
        if self.exhausted {
            return None;
        }

        Some(PageRequest {
            filter: self.filter.clone(),
            order_by: self.order_by.clone(),
            after: self.cursor.clone(),
            limit: Some(self.page_size),
        })
    }

    /// Moves past `page`. A short page ends the walk.
    pub fn advance(&mut self, page: &[TableRow]) {
        if let Some(last) = page.last() {
            self.cursor = Some(last.project(&self.positions));
        }

        if page.len() < self.page_size {
            self.exhausted = true;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// How [`ReplicaStore::prepare_replica_table`] treats an existing replica table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareMode {
    /// Drops and recreates the table from the source definition.
    Recreate,
    /// Creates the table only when it is missing.
    KeepExisting,
}

/// Read access to the rows of a MySQL tier (the source or the replica).
pub trait RowSource {
    /// Reads the schema of `table`. Fails with [`ErrorKind::SourceSchemaError`] when missing.
    fn table_schema(&self, table: &str) -> impl Future<Output = SyncResult<TableSchema>> + Send;

    fn count_rows(
        &self,
        table: &str,
        filter: &RowFilter,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    fn read_page(
        &self,
        schema: &TableSchema,
        request: &PageRequest,
    ) -> impl Future<Output = SyncResult<Vec<TableRow>>> + Send;

    /// Sends every selected row into `sender`, returning how many were sent.
    ///
    /// Stops early without error when the receiver is dropped.
    fn stream_rows(
        &self,
        schema: &TableSchema,
        request: &PageRequest,
        sender: mpsc::Sender<TableRow>,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Samples up to `limit` distinct non-null values of `column`.
    fn distinct_values(
        &self,
        schema: &TableSchema,
        column: &str,
        limit: usize,
    ) -> impl Future<Output = SyncResult<Vec<Cell>>> + Send;

    /// Returns the smallest and largest non-null value of `column` among filtered rows.
    fn column_bounds(
        &self,
        schema: &TableSchema,
        column: &str,
        filter: &RowFilter,
    ) -> impl Future<Output = SyncResult<Option<(Cell, Cell)>>> + Send;
}

/// Write access to the replica.
pub trait ReplicaStore {
    fn prepare_replica_table(
        &self,
        schema: &TableSchema,
        mode: PrepareMode,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Inserts rows, replacing rows with the same primary key. Returns the rows written.
    fn upsert_replica_rows(
        &self,
        schema: &TableSchema,
        rows: &[TableRow],
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    fn load_copy_progress(
        &self,
        table: &str,
    ) -> impl Future<Output = SyncResult<Option<CopyProgress>>> + Send;

    fn store_copy_progress(
        &self,
        progress: &CopyProgress,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Flags the progress of `table` as failed, keeping its other fields.
    fn mark_copy_failed(&self, table: &str) -> impl Future<Output = SyncResult<()>> + Send;
}

/// Access to the warehouse.
pub trait WarehouseStore {
    /// Returns the columns of an existing warehouse table, or `None` when it does not exist.
    fn existing_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = SyncResult<Option<Vec<TargetColumn>>>> + Send;

    fn create_warehouse_table(
        &self,
        target: &TargetSchema,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    fn truncate_warehouse_table(
        &self,
        target: &TargetSchema,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Inserts converted rows, updating rows with the same primary key. Returns rows written.
    fn upsert_warehouse_rows(
        &self,
        target: &TargetSchema,
        rows: &[TableRow],
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Bulk loads a CSV file staged with [`csv::StagingFile`]. Returns rows loaded.
    fn bulk_load_file(
        &self,
        target: &TargetSchema,
        path: &Path,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    fn count_warehouse_rows(
        &self,
        target: &TargetSchema,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Returns the largest value of `column` rendered as text, `None` for an empty table.
    fn max_warehouse_value(
        &self,
        target: &TargetSchema,
        column: &str,
    ) -> impl Future<Output = SyncResult<Option<String>>> + Send;

    fn load_load_progress(
        &self,
        table: &str,
    ) -> impl Future<Output = SyncResult<Option<LoadProgress>>> + Send;

    fn store_load_progress(
        &self,
        progress: &LoadProgress,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    fn mark_load_failed(&self, table: &str) -> impl Future<Output = SyncResult<()>> + Send;
}
