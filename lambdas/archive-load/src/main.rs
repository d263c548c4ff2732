//!
//! The archive-load lambda lists the stored report partitions of roughly the last year so that
//! downstream consumers can fetch them, with presigned URLs when the store supports them
use chrono::prelude::*;
use ghpulse::partition::{ListWindow, PartitionStore};
use ghpulse::ArchiveResult;
use ghpulse_lambda_shared::*;
use lambda_http::http::{HeaderValue, Method};
use lambda_http::{run, service_fn, tracing, Body, Error, Request, Response};
use serde::Serialize;
use tracing::log::*;

use std::time::Duration;

#[derive(Debug, Serialize)]
struct Paths {
    paths: Vec<String>,
}

/// Every report path in the trailing window ending at `now`
async fn list_paths(
    partitions: &PartitionStore,
    now: DateTime<Utc>,
    expiry: Duration,
) -> ArchiveResult<Vec<String>> {
    let window = ListWindow::trailing(now);
    debug!("Listing reports under {:?}", window.prefixes());
    let keys = partitions.list(&window).await?;
    partitions.signed_urls(&keys, expiry).await
}

async fn function_handler(
    event: Request,
    partitions: &PartitionStore,
    expiry: Duration,
) -> Result<Response<Body>, Error> {
    debug!("Receiving event: {:?}", event);

    if event.method() != Method::GET {
        warn!("Received method I cannot support: {:?}", event.method());
        return respond(405, "I only speak GET");
    }

    match list_paths(partitions, Utc::now(), expiry).await {
        Ok(paths) => {
            info!("Returning {} report paths", paths.len());
            let count = paths.len();
            let mut response = respond_json(200, &Paths { paths })?;
            response
                .headers_mut()
                .insert("result_count", HeaderValue::from(count));
            Ok(response)
        }
        Err(e) => {
            error!("Failed to list reports: {e}");
            respond(e.status(), format!("error loading report filepaths: {e}"))
        }
    }
}

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
    let partitions = PartitionStore::new(store.blobs().expect("Failed to create the report store"));

    info!("Starting archive-load for {}", store.url);
    run(service_fn(|event| {
        function_handler(event, &partitions, archive.signed_url_expiry)
    }))
    .await
}
