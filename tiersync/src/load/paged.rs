use tracing::debug;

use crate::concurrency::shutdown::ShutdownRx;
use crate::database::{Connector, KeysetPager, PageRequest, RowFilter, RowSource, WarehouseStore};
use crate::error::SyncResult;
use crate::load::method::{LoadJob, LoadMethod, check_shutdown, write_rows};
use crate::load::strategy::LoadStrategy;
use crate::resilience::ResilientSession;
use crate::schema::RowConverter;
use crate::types::{TableSchema, TargetSchema};

/// Reads the whole window in one statement and upserts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardLoad;

impl<R, W> LoadMethod<R, W> for StandardLoad
where
    R: Connector,
    R::Connection: RowSource,
    W: Connector,
    W::Connection: WarehouseStore,
{
    fn strategy(&self) -> LoadStrategy {
        LoadStrategy::Standard
    }

    async fn load(&self, job: &mut LoadJob<'_, R, W>) -> SyncResult<u64> {
        let request = PageRequest {
            order_by: job.order_by.to_vec(),
            ..PageRequest::filtered(job.window.clone())
        };
        let rows = job.replica.read_page(job.schema, &request).await?;

        write_rows(
            job.warehouse,
            job.target,
            job.converter,
            LoadStrategy::Standard,
            &rows,
        )
        .await
    }
}

/// Pages through the window with a keyset cursor, one chunk per statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkedLoad;

impl<R, W> LoadMethod<R, W> for ChunkedLoad
where
    R: Connector,
    R::Connection: RowSource,
    W: Connector,
    W::Connection: WarehouseStore,
{
    fn strategy(&self) -> LoadStrategy {
        LoadStrategy::Chunked
    }

    async fn load(&self, job: &mut LoadJob<'_, R, W>) -> SyncResult<u64> {
        load_pages(
            job.replica,
            job.warehouse,
            PagedWindow {
                schema: job.schema,
                target: job.target,
                converter: job.converter,
                filter: job.window.clone(),
                order_by: job.order_by,
                chunk_size: job.config.chunk_size,
                strategy: LoadStrategy::Chunked,
            },
            &job.shutdown_rx,
        )
        .await
    }
}

/// A row selection loaded page by page.
pub(crate) struct PagedWindow<'a> {
    pub schema: &'a TableSchema,
    pub target: &'a TargetSchema,
    pub converter: &'a RowConverter,
    pub filter: RowFilter,
    pub order_by: &'a [String],
    pub chunk_size: usize,
    pub strategy: LoadStrategy,
}

/// Loads a window page by page, stopping between pages when shutdown is requested.
pub(crate) async fn load_pages<R, W>(
    replica: &mut ResilientSession<R>,
    warehouse: &mut ResilientSession<W>,
    window: PagedWindow<'_>,
    shutdown_rx: &ShutdownRx,
) -> SyncResult<u64>
where
    R: Connector,
    R::Connection: RowSource,
    W: Connector,
    W::Connection: WarehouseStore,
{
    let mut pager = KeysetPager::new(
        window.schema,
        window.filter,
        window.order_by.to_vec(),
        window.chunk_size,
    );

    let mut written = 0;
    while let Some(request) = pager.next_request() {
        check_shutdown(shutdown_rx, window.target, written)?;

        let rows = replica.read_page(window.schema, &request).await?;
        if rows.is_empty() {
            break;
        }

        written += write_rows(
            warehouse,
            window.target,
            window.converter,
            window.strategy,
            &rows,
        )
        .await?;
        pager.advance(&rows);

        debug!(
            table = %window.target.full_name(),
            chunk_rows = rows.len(),
            written,
            "loaded chunk"
        );
    }

    Ok(written)
}
