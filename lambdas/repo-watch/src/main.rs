//!
//! The repo-watch lambda collects statistics for every watched repository on a schedule and
//! saves them as a snapshot in the blob store.
//!
use aws_lambda_events::event::cloudwatch_events::CloudWatchEvent;
use ghpulse_lambda_shared::*;
use ghpulse_queries::table::DynamoTable;
use ghpulse_watch::collect::{collect, CollectFailure};
use ghpulse_watch::github::{GitHubClient, StatsSource};
use ghpulse_watch::snapshot::SnapshotStore;
use ghpulse_watch::watchlist::Watchlist;
use lambda_runtime::{run, service_fn, tracing, Error, LambdaEvent};
use serde::Serialize;
use tracing::log::*;

use std::sync::Arc;

#[derive(Debug, PartialEq, Serialize)]
struct WatchSummary {
    snapshot: String,
    collected: usize,
    failures: Vec<CollectFailure>,
}

struct Watcher {
    watchlist: Watchlist,
    source: Arc<dyn StatsSource>,
    snapshots: SnapshotStore,
    concurrency: usize,
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
    let tables = TableConfig::from_env().expect("Failed to read the table configuration");
    let watch = WatchConfig::from_env().expect("Failed to read the watch configuration");
    let http = HttpConfig::from_env().expect("Failed to read the HTTP configuration");

    if watch.token.is_none() {
        warn!("No GITHUB_TOKEN is set, requests will be heavily rate limited");
    }

    let config = aws_config::load_from_env().await;
    let watcher = Watcher {
        watchlist: Watchlist::new(
            Arc::new(DynamoTable::new(aws_sdk_dynamodb::Client::new(&config))),
            tables.repos,
        ),
        source: Arc::new(
            GitHubClient::new(
                http.client().expect("Failed to build the HTTP client"),
                watch.api_base,
                watch.token,
            )
            .with_timeout(http.github_timeout),
        ),
        snapshots: SnapshotStore::new(store.blobs().expect("Failed to create the snapshot store")),
        concurrency: watch.concurrency,
    };

    info!("Starting repo-watch lambda handler");
    run(service_fn(|event| function_handler(event, &watcher))).await
}

async fn function_handler(
    event: LambdaEvent<CloudWatchEvent>,
    watcher: &Watcher,
) -> Result<WatchSummary, Error> {
    let at = event.payload.time;
    debug!("Receiving scheduled event for {at}");

    let repos = match watcher.watchlist.repos().await {
        Ok(repos) => repos,
        Err(e) => {
            error!("Failed to read the watchlist: {e}");
            return Err(Box::new(e));
        }
    };

    let collection = collect(watcher.source.as_ref(), &repos, watcher.concurrency).await;
    let snapshot = match watcher.snapshots.save(&collection.stats, at).await {
        Ok(key) => key,
        Err(e) => {
            error!("Failed to save the snapshot: {e}");
            return Err(Box::new(e));
        }
    };

    Ok(WatchSummary {
        snapshot,
        collected: collection.stats.len(),
        failures: collection.failures,
    })
}
