use std::time::Duration;

use futures::StreamExt;
use tokio::pin;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::concurrency::shutdown::ShutdownResult;
use crate::concurrency::stream::BatchStream;
use crate::database::{Connector, PageRequest, RowSource, WarehouseStore, keyset_after};
use crate::error::{SyncError, SyncResult};
use crate::load::method::{LoadJob, LoadMethod, check_shutdown, write_rows};
use crate::load::strategy::LoadStrategy;
use crate::types::{Cell, TableRow, TableSchema};

/// Longest time a partial batch waits for more rows before it is written.
const MAX_BATCH_FILL: Duration = Duration::from_secs(1);

/// Streams the window from a single replica cursor and upserts it in batches.
///
/// Reading and writing run concurrently; the channel between them bounds the rows in memory.
/// A stream retried after a dropped connection starts over, and [`ReplayFilter`] discards the
/// rows the consumer already received.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingLoad;

impl<R, W> LoadMethod<R, W> for StreamingLoad
where
    R: Connector,
    R::Connection: RowSource,
    W: Connector,
    W::Connection: WarehouseStore,
{
    fn strategy(&self) -> LoadStrategy {
        LoadStrategy::Streaming
    }

    async fn load(&self, job: &mut LoadJob<'_, R, W>) -> SyncResult<u64> {
        let target = job.target;
        let converter = job.converter;
        let chunk_size = job.config.chunk_size;
        let shutdown_rx = job.shutdown_rx.clone();
        let warehouse = &mut *job.warehouse;

        let request = PageRequest {
            order_by: job.order_by.to_vec(),
            ..PageRequest::filtered(job.window.clone())
        };
        let (tx, mut rx) = mpsc::channel::<TableRow>(chunk_size.max(1));

        let produce = job.replica.stream_rows(job.schema, &request, tx);

        let mut replay = ReplayFilter::new(job.schema, &request.order_by);
        let consume = async {
            let rows = futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
                .filter(move |row| futures::future::ready(replay.accept(row)));
            let batches = BatchStream::wrap(rows, chunk_size, MAX_BATCH_FILL, shutdown_rx.clone());
            pin!(batches);

            let mut written = 0;
            while let Some(batch) = batches.next().await {
                match batch {
                    ShutdownResult::Ok(rows) => {
                        written += write_rows(
                            warehouse,
                            target,
                            converter,
                            LoadStrategy::Streaming,
                            &rows,
                        )
                        .await?;
                        debug!(table = %target.full_name(), written, "loaded streamed batch");
                    }
                    ShutdownResult::Shutdown(rows) => {
                        written += write_rows(
                            warehouse,
                            target,
                            converter,
                            LoadStrategy::Streaming,
                            &rows,
                        )
                        .await?;
                        info!(table = %target.full_name(), written, "streaming load stopped by shutdown");
                        check_shutdown(&shutdown_rx, target, written)?;
                    }
                }
            }

            Ok::<_, SyncError>(written)
        };

        // The consumer drops the receiver when it stops, which ends the producer too.
        let (produced, consumed) = tokio::join!(produce, consume);
        let written = consumed?;
        let streamed = produced?;

        debug!(table = %target.full_name(), streamed, written, "streaming load finished");

        Ok(written)
    }
}

/// Drops rows that a restarted stream sends a second time.
///
/// Rows arrive ordered by the paging columns, so a row that does not sort after the last
/// accepted one was already received. Tables without a primary key may hold identical rows,
/// which are kept.
#[derive(Debug)]
struct ReplayFilter {
    positions: Vec<usize>,
    unique: bool,
    last: Option<Vec<Cell>>,
}

impl ReplayFilter {
    fn new(schema: &TableSchema, order_by: &[String]) -> Self {
        Self {
            positions: schema.positions(order_by),
            unique: schema.has_primary_key(),
            last: None,
        }
    }

    fn accept(&mut self, row: &TableRow) -> bool {
        let key = row.project(&self.positions);
        let fresh = match &self.last {
            None => true,
            Some(last) if self.unique => keyset_after(&key, last),
            Some(last) => !keyset_after(last, &key),
        };

        if fresh {
            self.last = Some(key);
        }
        fresh
    }
}
