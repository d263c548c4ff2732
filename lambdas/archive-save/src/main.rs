//!
//! The archive-save lambda ingests one hour of the GitHub Archive and stores the per-repository
//! event counts as a new report partition.
//!
//! It is normally invoked by an hourly EventBridge schedule, but accepts explicit hours from
//! backfill invocations as well.
use chrono::prelude::*;
use ghpulse::archive::HttpFetcher;
use ghpulse::ingest::{IngestSummary, Ingestor};
use ghpulse::partition::PartitionStore;
use ghpulse_lambda_shared::*;
use lambda_runtime::{run, service_fn, tracing, Error, LambdaEvent};
use tracing::log::*;

use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        // disable printing the name of the module in every log line.
        .with_target(false)
        // disabling time is handy because CloudWatch will add the ingestion time.
        .without_time()
        .init();

    let store = StoreConfig::from_env()
        .expect("The `GHPULSE_STORE_URL` environment must be set in the environment");
    let archive = ArchiveConfig::from_env().expect("Failed to read the archive configuration");
    let blobs = store.blobs().expect("Failed to create the report store");
    let http = HttpConfig::from_env().expect("Failed to read the HTTP configuration");
    let fetcher = HttpFetcher::new(http.client().expect("Failed to build the HTTP client"))
        .with_timeout(http.fetch_timeout);

    let ingestor = Ingestor::new(
        Arc::new(fetcher),
        PartitionStore::new(blobs),
        archive.base.clone(),
    );

    info!("Starting archive-save, reports go to {}", store.url);
    run(service_fn(|event| {
        function_handler(event, &ingestor, archive.lag_hours)
    }))
    .await
}

async fn function_handler(
    event: LambdaEvent<TriggerPayload>,
    ingestor: &Ingestor,
    lag_hours: u32,
) -> Result<IngestSummary, Error> {
    debug!("Receiving event: {:?}", event);

    let hour = match event.payload.archive_hour(Utc::now(), lag_hours) {
        Ok(hour) => hour,
        Err(e) => {
            error!("Rejecting trigger from `{}`: {e}", event.payload.source);
            return Err(Box::new(e));
        }
    };

    match ingestor.ingest(hour).await {
        Ok(summary) => {
            info!(
                "Stored {} repositories from {hour} as {}",
                summary.repositories, summary.partition
            );
            Ok(summary)
        }
        Err(e) => {
            error!("Failed to ingest {hour}: {e}");
            Err(Box::new(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use ghpulse::archive::Fetcher;
    use ghpulse::objects::BlobStore;
    use ghpulse::partition::ListWindow;
    use ghpulse::ArchiveResult;
    use std::io::Write;
    use url::Url;

    struct FixtureFetcher;

    #[async_trait]
    impl Fetcher for FixtureFetcher {
        async fn fetch(&self, _url: &Url) -> ArchiveResult<Bytes> {
            let mut encoder = GzEncoder::new(vec![], Compression::fast());
            encoder
                .write_all(
                    br#"{"type":"WatchEvent","repo":{"name":"a/b"}}
{"type":"ForkEvent","repo":{"name":"a/b"}}
"#,
                )
                .expect("Failed to write fixture");
            Ok(encoder.finish().expect("Failed to finish fixture").into())
        }
    }

    fn ingestor() -> Ingestor {
        Ingestor::new(
            Arc::new(FixtureFetcher),
            PartitionStore::new(BlobStore::in_memory()),
            Url::parse("https://archive.test").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_backfill_trigger() {
        let ingestor = ingestor();
        let payload: TriggerPayload = serde_json::from_str(
            r#"{"source":"ghpulse.backfill","year":2019,"month":1,"day":1,"hour":5}"#,
        )
        .unwrap();
        let event = LambdaEvent::new(payload, lambda_runtime::Context::default());

        let summary = function_handler(event, &ingestor, 1)
            .await
            .expect("Failed to handle the trigger");
        assert_eq!(1, summary.repositories);
        assert_eq!(2, summary.lines);

        let stored = ingestor
            .store()
            .list(&ListWindow::month(2019, 1))
            .await
            .unwrap();
        assert_eq!(vec![summary.partition], stored);
    }

    #[tokio::test]
    async fn test_unknown_source_is_rejected() {
        let ingestor = ingestor();
        let payload: TriggerPayload =
            serde_json::from_str(r#"{"source":"aws.s3","year":2019,"month":1,"day":1,"hour":5}"#)
                .unwrap();
        let event = LambdaEvent::new(payload, lambda_runtime::Context::default());

        assert!(function_handler(event, &ingestor, 1).await.is_err());
        let stored = ingestor.store().list(&ListWindow::year(2019)).await.unwrap();
        assert!(stored.is_empty());
    }
}
