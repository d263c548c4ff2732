//!
//! The ingestion pipeline: fetch one archive hour, count it, and store the report
//!
use serde::Serialize;
use tracing::log::*;
use url::Url;

use std::sync::Arc;

use crate::archive::{aggregate, decompress, ArchiveHour, Fetcher};
use crate::partition::{PartitionKey, PartitionStore};
use crate::{ArchiveError, ArchiveResult};

/// What a successful ingestion produced
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IngestSummary {
    pub hour: ArchiveHour,
    pub partition: PartitionKey,
    pub repositories: usize,
    pub lines: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct Ingestor {
    fetcher: Arc<dyn Fetcher>,
    store: PartitionStore,
    archive_base: Url,
}

impl Ingestor {
    pub fn new(fetcher: Arc<dyn Fetcher>, store: PartitionStore, archive_base: Url) -> Self {
        Self {
            fetcher,
            store,
            archive_base,
        }
    }

    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    /// Run a single ingestion of `hour`, the first failing stage ends the run
    pub async fn ingest(&self, hour: ArchiveHour) -> ArchiveResult<IngestSummary> {
        let url = hour.url(&self.archive_base)?;
        info!("Ingesting {hour} from {url}");

        let payload = self.fetcher.fetch(&url).await?;
        debug!("Fetched {} bytes for {hour}", payload.len());

        // Decoding and counting is CPU bound, keep it off the async workers
        let aggregation =
            tokio::task::spawn_blocking(move || decompress(payload).and_then(aggregate))
                .await
                .map_err(|e| ArchiveError::Decompress(format!("aggregation task failed: {e}")))??;
        debug!(
            "Counted {} lines across {} repositories for {hour}",
            aggregation.lines,
            aggregation.repositories()
        );

        let report = aggregation.to_json()?;
        let partition = self.store.put(hour, report).await?;

        Ok(IngestSummary {
            hour,
            partition,
            repositories: aggregation.repositories(),
            lines: aggregation.lines,
            skipped: aggregation.skipped,
        })
    }
}
