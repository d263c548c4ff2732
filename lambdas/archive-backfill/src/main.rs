///
/// The archive-backfill lambda ingests every hour of a range of days, protected by a preshared
/// secret since a single request can fan out into hundreds of ingestions
use ghpulse::archive::HttpFetcher;
use ghpulse::backfill::{backfill, BackfillRequest};
use ghpulse::ingest::Ingestor;
use ghpulse::partition::PartitionStore;
use ghpulse_lambda_shared::*;
use lambda_http::http::Method;
use lambda_http::{run, service_fn, tracing, Body, Error, Request, Response};
use tracing::log::*;

use std::sync::Arc;

struct Backfiller {
    ingestor: Ingestor,
    secret: String,
    concurrency: usize,
}

/// Main function handler which does the basics around HTTP management for the Lambda
async fn function_handler(event: Request, backfiller: &Backfiller) -> Result<Response<Body>, Error> {
    if let Err(e) = check_secret(event.headers(), &backfiller.secret) {
        return respond(e.status(), e.to_string());
    }

    if event.method() != Method::POST {
        warn!("Received method I cannot support: {:?}", event.method());
        return respond(405, "I only speak POST");
    }

    let request: BackfillRequest = match serde_json::from_slice(event.body().as_ref()) {
        Ok(request) => request,
        Err(e) => {
            warn!("Unable to read the backfill request: {e}");
            return respond(400, format!("invalid request: {e}"));
        }
    };
    debug!("Processing backfill of {request:?}");

    match backfill(&backfiller.ingestor, &request, backfiller.concurrency).await {
        Ok(report) if report.is_success() => respond_json(200, &report),
        Ok(report) => {
            error!("Backfill finished with {} failed hours", report.failed.len());
            respond_json(500, &report)
        }
        Err(e) => respond(e.status(), e.to_string()),
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

    let secret = std::env::var("GHPULSE_SECRET").expect("Failed to get `GHPULSE_SECRET`");
    let store = StoreConfig::from_env()
        .expect("The `GHPULSE_STORE_URL` environment must be set in the environment");
    let archive = ArchiveConfig::from_env().expect("Failed to read the archive configuration");
    let http = HttpConfig::from_env().expect("Failed to read the HTTP configuration");
    let fetcher = HttpFetcher::new(http.client().expect("Failed to build the HTTP client"))
        .with_timeout(http.fetch_timeout);

    let backfiller = Backfiller {
        ingestor: Ingestor::new(
            Arc::new(fetcher),
            PartitionStore::new(store.blobs().expect("Failed to create the report store")),
            archive.base.clone(),
        ),
        secret,
        concurrency: archive.backfill_concurrency,
    };

    info!(
        "Starting archive-backfill with {} concurrent ingestions",
        backfiller.concurrency
    );
    run(service_fn(|event| function_handler(event, &backfiller))).await
}
