use std::ops::Bound;

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::database::{ColumnRange, Connector, RowSource, WarehouseStore};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::load::method::{LoadJob, LoadMethod};
use crate::load::paged::{PagedWindow, load_pages};
use crate::load::strategy::LoadStrategy;
use crate::sync_error;
use crate::types::{Cell, TableSchema};

/// Splits the window into disjoint ranges of an integer key loaded by concurrent workers.
///
/// Every worker opens its own replica and warehouse sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelLoad;

impl<R, W> LoadMethod<R, W> for ParallelLoad
where
    R: Connector,
    R::Connection: RowSource,
    W: Connector,
    W::Connection: WarehouseStore,
{
    fn strategy(&self) -> LoadStrategy {
        LoadStrategy::Parallel
    }

    async fn load(&self, job: &mut LoadJob<'_, R, W>) -> SyncResult<u64> {
        let Some(column) = partition_column(job.schema) else {
            return Err(sync_error!(
                ErrorKind::InvalidState,
                "Parallel load needs an integer key",
                job.schema.name.clone()
            ));
        };

        let Some((lower, upper)) = job
            .replica
            .column_bounds(job.schema, column, job.window)
            .await?
        else {
            return Ok(0);
        };
        let (Some(lower), Some(upper)) = (lower.as_i64(), upper.as_i64()) else {
            return Err(sync_error!(
                ErrorKind::InvalidData,
                "Partition key bounds are not integers",
                format!("{}.{column}", job.schema.name)
            ));
        };

        let ranges = partition_ranges(lower, upper, job.config.parallel_workers);
        info!(
            table = %job.target.full_name(),
            column,
            lower,
            upper,
            workers = ranges.len(),
            "starting parallel load"
        );

        let mut workers = JoinSet::new();
        for (start, end) in ranges {
            let mut replica = job.replica.fork();
            let mut warehouse = job.warehouse.fork();
            let schema = job.schema.clone();
            let target = job.target.clone();
            let converter = job.converter.clone();
            let order_by = job.order_by.to_vec();
            let chunk_size = job.config.chunk_size;
            let shutdown_rx = job.shutdown_rx.clone();
            let filter = job.window.clone().and(ColumnRange {
                column: column.to_string(),
                lower: Bound::Included(Cell::I64(start)),
                upper: end,
            });

            workers.spawn(async move {
                let window = PagedWindow {
                    schema: &schema,
                    target: &target,
                    converter: &converter,
                    filter,
                    order_by: &order_by,
                    chunk_size,
                    strategy: LoadStrategy::Parallel,
                };
                load_pages(&mut replica, &mut warehouse, window, &shutdown_rx).await
            });
        }

        let mut written = 0;
        let mut errors = Vec::new();
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(Ok(rows)) => {
                    debug!(table = %job.target.full_name(), rows, "parallel worker finished");
                    written += rows;
                }
                Ok(Err(err)) => errors.push(err),
                Err(err) => errors.push(sync_error!(
                    ErrorKind::WorkerPanic,
                    "Parallel load worker panicked",
                    err.to_string()
                )),
            }
        }

        if !errors.is_empty() {
            return Err(SyncError::from(errors));
        }

        Ok(written)
    }
}

/// First primary key column with an integer type.
pub fn partition_column(schema: &TableSchema) -> Option<&str> {
    schema
        .primary_key
        .iter()
        .filter_map(|name| schema.column(name))
        .find(|column| column.typ.is_integer())
        .map(|column| column.name.as_str())
}

/// Splits `[lower, upper]` into at most `workers` contiguous ranges.
///
/// Each range starts at an included value; every range but the last ends at an excluded value.
fn partition_ranges(lower: i64, upper: i64, workers: usize) -> Vec<(i64, Bound<Cell>)> {
    if upper < lower {
        return Vec::new();
    }

    let span = i128::from(upper) - i128::from(lower) + 1;
    let workers = (workers.max(1) as i128).min(span);
    let step = (span + workers - 1) / workers;

    let mut ranges = Vec::new();
    let mut start = i128::from(lower);
    while start <= i128::from(upper) {
        let end = start + step;
        let bound = if end > i128::from(upper) {
            Bound::Included(Cell::I64(upper))
        } else {
            // `end` is at most `upper` here, so it fits.
            Bound::Excluded(Cell::I64(end as i64))
        };
        ranges.push((start as i64, bound));
        start = end;
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_cover_the_bounds_without_overlap() {
        let ranges = partition_ranges(1, 10, 3);
        assert_eq!(
            ranges,
            vec![
                (1, Bound::Excluded(Cell::I64(5))),
                (5, Bound::Excluded(Cell::I64(9))),
                (9, Bound::Included(Cell::I64(10))),
            ]
        );
    }

    #[test]
    fn small_spans_get_fewer_workers() {
        assert_eq!(partition_ranges(7, 7, 4), vec![(7, Bound::Included(Cell::I64(7)))]);
        assert_eq!(partition_ranges(0, 1, 4).len(), 2);
        assert!(partition_ranges(5, 1, 4).is_empty());
    }

    #[test]
    fn extreme_bounds_do_not_overflow() {
        let ranges = partition_ranges(i64::MIN, i64::MAX, 2);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].0, i64::MIN);
        assert_eq!(ranges[1].1, Bound::Included(Cell::I64(i64::MAX)));
    }
}
