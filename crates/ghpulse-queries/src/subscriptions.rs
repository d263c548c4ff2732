//!
//! Webhook subscriptions to stored queries
//!
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::log::*;
use url::Url;

use std::sync::Arc;

use crate::queries::{marker_key, validate_name};
use crate::table::{Key, Table};
use crate::{QueryError, QueryResult};

/// A registered webhook for one query
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Subscription {
    pub query_name: String,
    pub subscriber_target: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_email: Option<String>,
}

impl Subscription {
    fn key(&self) -> Key {
        subscription_key(&self.query_name, &self.subscriber_target)
    }
}

fn subscription_key(query_name: &str, target: &Url) -> Key {
    Key::partition("query_name", query_name).with_sort("subscriber_target", target.as_str())
}

/// Parse and check a subscriber target, only absolute http(s) URLs can receive deliveries
pub fn parse_target(target: &str) -> QueryResult<Url> {
    let url = Url::parse(target)
        .map_err(|e| QueryError::Validation(format!("subscriber_target `{target}`: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        _ => Err(QueryError::Validation(format!(
            "subscriber_target `{target}` must be an absolute http or https URL"
        ))),
    }
}

/// Body of a subscribe request
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SubscriptionRequest {
    pub query_name: String,
    pub subscriber_target: String,
    #[serde(default)]
    pub subscriber_name: Option<String>,
    #[serde(default)]
    pub subscriber_email: Option<String>,
}

impl SubscriptionRequest {
    pub fn validate(&self) -> QueryResult<Subscription> {
        validate_name(&self.query_name)?;
        Ok(Subscription {
            query_name: self.query_name.clone(),
            subscriber_target: parse_target(&self.subscriber_target)?,
            subscriber_name: self.subscriber_name.clone().filter(|n| !n.is_empty()),
            subscriber_email: self.subscriber_email.clone().filter(|e| !e.is_empty()),
        })
    }
}

/// Body of a query delete request, older clients send `query` rather than `query_name`
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DeleteRequest {
    #[serde(alias = "query")]
    pub query_name: String,
}

/// Body of an unsubscribe request
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UnsubscribeRequest {
    #[serde(alias = "query")]
    pub query_name: String,
    pub subscriber_target: String,
}

#[derive(Clone)]
pub struct Subscriptions {
    table: Arc<dyn Table>,
    queries_table: String,
    subscribers_table: String,
}

impl Subscriptions {
    pub fn new(table: Arc<dyn Table>, queries_table: String, subscribers_table: String) -> Self {
        Self {
            table,
            queries_table,
            subscribers_table,
        }
    }

    async fn query_exists(&self, query_name: &str) -> QueryResult<bool> {
        self.table
            .exists(&self.queries_table, &marker_key(query_name))
            .await
    }

    /// Register a subscriber, the query must already exist.
    ///
    /// Subscribing the same target twice replaces the earlier record. The query is checked again
    /// after the write, a record which lost the race against a delete of its query is removed.
    pub async fn subscribe(&self, request: &SubscriptionRequest) -> QueryResult<Subscription> {
        let subscription = request.validate()?;

        if !self.query_exists(&subscription.query_name).await? {
            warn!(
                "Refusing to subscribe {} to unknown query {}",
                subscription.subscriber_target, subscription.query_name
            );
            return Err(QueryError::UnknownQuery(subscription.query_name));
        }

        let Value::Object(item) = serde_json::to_value(&subscription)? else {
            return Err(QueryError::Table(format!(
                "subscription of {} did not serialize to an item",
                subscription.query_name
            )));
        };
        self.table
            .put(&self.subscribers_table, &subscription.key(), item)
            .await?;

        if !self.query_exists(&subscription.query_name).await? {
            warn!(
                "Query {} was deleted while subscribing {}, removing the subscription",
                subscription.query_name, subscription.subscriber_target
            );
            self.table
                .delete(&self.subscribers_table, &subscription.key())
                .await?;
            return Err(QueryError::UnknownQuery(subscription.query_name));
        }

        info!(
            "Subscribed {} to {}",
            subscription.subscriber_target, subscription.query_name
        );
        Ok(subscription)
    }

    /// Remove one subscription, returning whether it existed
    pub async fn unsubscribe(&self, request: &UnsubscribeRequest) -> QueryResult<bool> {
        validate_name(&request.query_name)?;
        let target = parse_target(&request.subscriber_target)?;
        let key = subscription_key(&request.query_name, &target);

        let existed = self.table.exists(&self.subscribers_table, &key).await?;
        if existed {
            self.table.delete(&self.subscribers_table, &key).await?;
            info!("Unsubscribed {target} from {}", request.query_name);
        } else {
            debug!("{target} was not subscribed to {}", request.query_name);
        }
        Ok(existed)
    }

    pub async fn for_query(&self, query_name: &str) -> QueryResult<Vec<Subscription>> {
        self.table
            .list(&self.subscribers_table, "query_name", query_name)
            .await?
            .into_iter()
            .map(|item| serde_json::from_value(Value::Object(item)).map_err(QueryError::from))
            .collect()
    }

    /// Remove every subscription of `query_name`, returning how many were removed
    pub async fn remove_all(&self, query_name: &str) -> QueryResult<usize> {
        let subscriptions = self.for_query(query_name).await?;
        for subscription in subscriptions.iter() {
            self.table
                .delete(&self.subscribers_table, &subscription.key())
                .await?;
        }
        Ok(subscriptions.len())
    }
}
