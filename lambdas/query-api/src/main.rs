///
/// The query-api lambda manages stored queries and their webhook subscriptions over HTTP
///
/// * `POST /queries?query_name=<name>` with the raw SQL as the body
/// * `DELETE /queries` with `{"query_name": ..}` and the preshared secret
/// * `POST /subscriptions` with the subscription as JSON
/// * `DELETE /subscriptions` with `{"query_name": .., "subscriber_target": ..}` and the secret
use ghpulse_lambda_shared::*;
use ghpulse_queries::queries::{CreateOutcome, DeleteOutcome, QueryBook};
use ghpulse_queries::subscriptions::{DeleteRequest, SubscriptionRequest, UnsubscribeRequest};
use ghpulse_queries::table::DynamoTable;
use ghpulse_queries::QueryError;
use lambda_http::http::Method;
use lambda_http::{run, service_fn, tracing, Body, Error, Request, RequestExt, Response};
use serde::de::DeserializeOwned;
use tracing::log::*;

use std::sync::Arc;

struct Api {
    book: QueryBook,
    secret: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Route {
    Queries,
    Subscriptions,
}

impl Route {
    /// Match on the last path segment so that API Gateway stage prefixes don't matter
    fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/').rsplit('/').next() {
            Some("queries") => Some(Route::Queries),
            Some("subscriptions") => Some(Route::Subscriptions),
            _ => None,
        }
    }
}

fn body_text(event: &Request) -> Result<&str, QueryError> {
    std::str::from_utf8(event.body().as_ref())
        .map_err(|e| QueryError::Validation(format!("request body is not UTF-8: {e}")))
}

fn body_json<T: DeserializeOwned>(event: &Request) -> Result<T, QueryError> {
    serde_json::from_str(body_text(event)?)
        .map_err(|e| QueryError::Validation(format!("error parsing request body: {e}")))
}

fn failure(e: QueryError) -> Result<Response<Body>, Error> {
    if e.status() >= 500 {
        error!("Request failed: {e}");
    } else {
        warn!("Request rejected: {e}");
    }
    respond(e.status(), e.to_string())
}

async fn create_query(event: &Request, api: &Api) -> Result<&'static str, QueryError> {
    let params = event.query_string_parameters();
    let name = params
        .first("query_name")
        .ok_or_else(|| QueryError::Validation("query_name parameter is required".into()))?;

    match api.book.create(name, body_text(event)?).await? {
        CreateOutcome::Created => Ok("success"),
        CreateOutcome::AlreadyExists => Ok("query already exists"),
    }
}

async fn delete_query(event: &Request, api: &Api) -> Result<&'static str, QueryError> {
    let request: DeleteRequest = body_json(event)?;
    match api.book.delete(&request.query_name).await? {
        DeleteOutcome::Deleted { subscribers } => {
            debug!("Deleted {} along with {subscribers} subscribers", request.query_name);
            Ok("success")
        }
        DeleteOutcome::NotFound => Ok("query does not exist"),
    }
}

async fn subscribe(event: &Request, api: &Api) -> Result<&'static str, QueryError> {
    let request: SubscriptionRequest = body_json(event)?;
    api.book.subscriptions().subscribe(&request).await?;
    Ok("success")
}

async fn unsubscribe(event: &Request, api: &Api) -> Result<&'static str, QueryError> {
    let request: UnsubscribeRequest = body_json(event)?;
    if api.book.subscriptions().unsubscribe(&request).await? {
        Ok("success")
    } else {
        Ok("subscription does not exist")
    }
}

/// Main function handler which does the basics around HTTP management for the Lambda
async fn function_handler(event: Request, api: &Api) -> Result<Response<Body>, Error> {
    debug!("Receiving {} {}", event.method(), event.uri().path());

    let Some(route) = Route::from_path(event.uri().path()) else {
        return respond(404, "not found");
    };

    let method = event.method().clone();
    if method == Method::DELETE {
        if let Err(e) = check_secret(event.headers(), &api.secret) {
            return respond(e.status(), e.to_string());
        }
    }

    let outcome = match (route, method) {
        (Route::Queries, Method::POST) => create_query(&event, api).await,
        (Route::Queries, Method::DELETE) => delete_query(&event, api).await,
        (Route::Subscriptions, Method::POST) => subscribe(&event, api).await,
        (Route::Subscriptions, Method::DELETE) => unsubscribe(&event, api).await,
        (_, others) => {
            warn!("Received method I cannot support: {others:?}");
            return respond(405, "I only speak POST and DELETE");
        }
    };

    match outcome {
        Ok(message) => respond(200, message),
        Err(e) => failure(e),
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
    let tables = TableConfig::from_env().expect("Failed to read the table configuration");

    let config = aws_config::load_from_env().await;
    let table = Arc::new(DynamoTable::new(aws_sdk_dynamodb::Client::new(&config)));
    let api = Api {
        book: QueryBook::new(
            store.blobs().expect("Failed to create the query store"),
            table,
            tables.queries,
            tables.subscribers,
        ),
        secret,
    };

    info!("Starting query-api lambda handler");
    run(service_fn(|event| function_handler(event, &api))).await
}
