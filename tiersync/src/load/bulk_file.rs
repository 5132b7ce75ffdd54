use metrics::counter;
use tracing::{debug, info};

use crate::database::csv::{StagingFile, remove_staging_file};
use crate::database::{Connector, KeysetPager, RowSource, WarehouseStore};
use crate::error::SyncResult;
use crate::load::method::{LoadJob, LoadMethod, check_shutdown};
use crate::load::strategy::LoadStrategy;
use crate::metrics::{STRATEGY_LABEL, TABLE_NAME_LABEL, TIERSYNC_ROWS_LOADED_TOTAL};

/// Stages the converted window as a CSV file and hands it to the warehouse bulk load.
///
/// The staging file is removed whether the load succeeds or not.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkFileLoad;

impl<R, W> LoadMethod<R, W> for BulkFileLoad
where
    R: Connector,
    R::Connection: RowSource,
    W: Connector,
    W::Connection: WarehouseStore,
{
    fn strategy(&self) -> LoadStrategy {
        LoadStrategy::BulkFile
    }

    async fn load(&self, job: &mut LoadJob<'_, R, W>) -> SyncResult<u64> {
        let directory = job.config.staging_dir();
        let mut file = StagingFile::create(&directory, &job.target.name).await?;
        let staged_path = file.path().to_path_buf();

        let staged = async {
            let mut pager = KeysetPager::new(
                job.schema,
                job.window.clone(),
                job.order_by.to_vec(),
                job.config.chunk_size,
            );

            let mut staged_rows = 0;
            while let Some(request) = pager.next_request() {
                check_shutdown(&job.shutdown_rx, job.target, staged_rows)?;

                let rows = job.replica.read_page(job.schema, &request).await?;
                if rows.is_empty() {
                    break;
                }

                file.append(&job.converter.convert_all(&rows)).await?;
                staged_rows += rows.len() as u64;
                pager.advance(&rows);
            }

            file.finish().await
        }
        .await;

        let (path, staged_rows) = match staged {
            Ok(staged) => staged,
            Err(err) => {
                remove_staging_file(&staged_path).await;
                return Err(err);
            }
        };
        debug!(path = %path.display(), staged_rows, "staged window for bulk load");

        let loaded = job.warehouse.bulk_load_file(job.target, &path).await;
        remove_staging_file(&path).await;
        let loaded = loaded?;

        counter!(
            TIERSYNC_ROWS_LOADED_TOTAL,
            TABLE_NAME_LABEL => job.target.name.clone(),
            STRATEGY_LABEL => LoadStrategy::BulkFile.as_str(),
        )
        .increment(loaded);
        info!(table = %job.target.full_name(), staged_rows, loaded, "bulk load finished");

        Ok(loaded)
    }
}
