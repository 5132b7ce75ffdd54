use std::future::Future;

use metrics::counter;
use tiersync_config::shared::LoadConfig;

use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::database::{Connector, RowFilter, RowSource, WarehouseStore};
use crate::error::{ErrorKind, SyncResult};
use crate::load::strategy::LoadStrategy;
use crate::metrics::{STRATEGY_LABEL, TABLE_NAME_LABEL, TIERSYNC_ROWS_LOADED_TOTAL};
use crate::resilience::ResilientSession;
use crate::schema::RowConverter;
use crate::types::{TableRow, TableSchema, TargetSchema};

/// Everything a load method needs to move one window of rows.
pub struct LoadJob<'a, R, W>
where
    R: Connector,
    W: Connector,
{
    pub replica: &'a mut ResilientSession<R>,
    pub warehouse: &'a mut ResilientSession<W>,
    /// Replica table the rows are read from.
    pub schema: &'a TableSchema,
    pub target: &'a TargetSchema,
    pub converter: &'a RowConverter,
    /// Replica rows to load.
    pub window: &'a RowFilter,
    /// Ordering used to page through the window.
    pub order_by: &'a [String],
    pub config: &'a LoadConfig,
    pub shutdown_rx: ShutdownRx,
}

/// One way of loading a window into the warehouse. Returns the rows written.
pub trait LoadMethod<R, W>
where
    R: Connector,
    R::Connection: RowSource,
    W: Connector,
    W::Connection: WarehouseStore,
{
    fn strategy(&self) -> LoadStrategy;

    fn load(&self, job: &mut LoadJob<'_, R, W>) -> impl Future<Output = SyncResult<u64>> + Send;
}

/// Converts replica rows and upserts them into the warehouse.
pub(crate) async fn write_rows<W>(
    warehouse: &mut ResilientSession<W>,
    target: &TargetSchema,
    converter: &RowConverter,
    strategy: LoadStrategy,
    rows: &[TableRow],
) -> SyncResult<u64>
where
    W: Connector,
    W::Connection: WarehouseStore,
{
    if rows.is_empty() {
        return Ok(0);
    }

    let converted = converter.convert_all(rows);
    let written = warehouse.upsert_warehouse_rows(target, &converted).await?;

    counter!(
        TIERSYNC_ROWS_LOADED_TOTAL,
        TABLE_NAME_LABEL => target.name.clone(),
        STRATEGY_LABEL => strategy.as_str(),
    )
    .increment(written);

    Ok(written)
}

/// Fails with [`ErrorKind::Cancelled`] once shutdown was requested.
pub(crate) fn check_shutdown(
    shutdown_rx: &ShutdownRx,
    target: &TargetSchema,
    rows: u64,
) -> SyncResult<()> {
    if shutdown_rx.is_shutdown() {
        bail!(
            ErrorKind::Cancelled,
            "Load cancelled",
            format!("{} stopped after {rows} rows", target.full_name())
        );
    }

    Ok(())
}
