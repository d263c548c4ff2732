//!
//! The query-run lambda executes every stored query on a schedule and delivers the rows to the
//! webhooks subscribed to each of them.
//!
use aws_lambda_events::event::cloudwatch_events::CloudWatchEvent;
use ghpulse_lambda_shared::*;
use ghpulse_queries::engine::AthenaEngine;
use ghpulse_queries::notify::HttpNotifier;
use ghpulse_queries::queries::QueryBook;
use ghpulse_queries::runner::{RunReport, Runner};
use ghpulse_queries::table::DynamoTable;
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
    let tables = TableConfig::from_env().expect("Failed to read the table configuration");
    let athena = AthenaConfig::from_env().expect("Failed to read the Athena configuration");
    let http = HttpConfig::from_env().expect("Failed to read the HTTP configuration");

    let config = aws_config::load_from_env().await;
    let book = QueryBook::new(
        store.blobs().expect("Failed to create the query store"),
        Arc::new(DynamoTable::new(aws_sdk_dynamodb::Client::new(&config))),
        tables.queries,
        tables.subscribers,
    );
    let engine = AthenaEngine::new(aws_sdk_athena::Client::new(&config), athena.workgroup)
        .with_database(athena.database)
        .with_output_location(athena.output_location);
    let runner = Runner::new(
        book,
        Arc::new(engine),
        Arc::new(
            HttpNotifier::new(http.client().expect("Failed to build the HTTP client"))
                .with_timeout(http.webhook_timeout),
        ),
    );

    info!("Starting query-run lambda handler");
    run(service_fn(|event| function_handler(event, &runner))).await
}

async fn function_handler(
    event: LambdaEvent<CloudWatchEvent>,
    runner: &Runner,
) -> Result<RunReport, Error> {
    debug!(
        "Receiving event from {}",
        event.payload.source.as_deref().unwrap_or("an unknown source")
    );

    match runner.run().await {
        Ok(report) => {
            info!(
                "Ran {} queries with {} failures",
                report.queries.len(),
                report.failures()
            );
            Ok(report)
        }
        Err(e) => {
            error!("Failed to list stored queries: {e}");
            Err(Box::new(e))
        }
    }
}
