//!
//! Query definitions are stored as a SQL blob plus an existence marker in the queries table
//!
use bytes::Bytes;
use chrono::prelude::*;
use ghpulse::objects::BlobStore;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::log::*;

use std::sync::{Arc, OnceLock};

use crate::subscriptions::Subscriptions;
use crate::table::{Item, Key, Table};
use crate::{QueryError, QueryResult};

const QUERY_PREFIX: &str = "queries";
const QUERY_SUFFIX: &str = ".sql";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryDefinition {
    pub name: String,
    pub text: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeleteOutcome {
    Deleted { subscribers: usize },
    NotFound,
}

fn name_regex() -> &'static Regex {
    static NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.-]{1,128}$").expect("Failed to compile the query name regex")
    })
}

/// Query names end up in object keys and table keys so they are limited to a safe alphabet
pub fn validate_name(name: &str) -> QueryResult<()> {
    if name_regex().is_match(name) && name != "." && name != ".." {
        Ok(())
    } else {
        Err(QueryError::Validation(format!(
            "query_name `{name}` must be 1-128 letters, digits, `_`, `.` or `-`"
        )))
    }
}

/// Key of the existence marker for `name`
pub(crate) fn marker_key(name: &str) -> Key {
    Key::partition("query_name", name)
}

fn blob_key(name: &str) -> String {
    format!("{QUERY_PREFIX}/{name}{QUERY_SUFFIX}")
}

/// Owns the lifecycle of stored queries, including cascading deletes to their subscribers
#[derive(Clone)]
pub struct QueryBook {
    blobs: BlobStore,
    table: Arc<dyn Table>,
    queries_table: String,
    subscriptions: Subscriptions,
}

impl QueryBook {
    pub fn new(
        blobs: BlobStore,
        table: Arc<dyn Table>,
        queries_table: impl Into<String>,
        subscribers_table: impl Into<String>,
    ) -> Self {
        let queries_table = queries_table.into();
        let subscriptions = Subscriptions::new(
            table.clone(),
            queries_table.clone(),
            subscribers_table.into(),
        );
        Self {
            blobs,
            table,
            queries_table,
            subscriptions,
        }
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    pub async fn exists(&self, name: &str) -> QueryResult<bool> {
        self.table
            .exists(&self.queries_table, &marker_key(name))
            .await
    }

    /// Store a new query, an existing query of the same name is left untouched.
    ///
    /// The blob is written before the marker so that a query never appears to exist without
    /// its text.
    pub async fn create(&self, name: &str, text: &str) -> QueryResult<CreateOutcome> {
        validate_name(name)?;
        if text.trim().is_empty() {
            return Err(QueryError::Validation("query text must not be empty".into()));
        }

        if self.exists(name).await? {
            info!("Query {name} already exists, not overwriting it");
            return Ok(CreateOutcome::AlreadyExists);
        }

        self.blobs
            .put(&blob_key(name), Bytes::from(text.to_string()))
            .await
            .map_err(|e| QueryError::Store(format!("{name}: {e}")))?;

        let mut marker = Item::new();
        marker.insert(
            "created_at".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        self.table
            .put(&self.queries_table, &marker_key(name), marker)
            .await?;

        info!("Created query {name}");
        Ok(CreateOutcome::Created)
    }

    /// Delete a query along with every one of its subscriptions.
    ///
    /// Subscriptions go first and the marker goes last, an interrupted delete can simply be
    /// retried. Subscriptions are swept once more after the marker is gone to catch any written
    /// while the delete was running.
    pub async fn delete(&self, name: &str) -> QueryResult<DeleteOutcome> {
        validate_name(name)?;
        if !self.exists(name).await? {
            info!("Query {name} does not exist, nothing to delete");
            return Ok(DeleteOutcome::NotFound);
        }

        let subscribers = self.subscriptions.remove_all(name).await?;
        debug!("Removed {subscribers} subscriptions of {name}");

        match self.blobs.delete(&blob_key(name)).await {
            Ok(_) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(QueryError::Store(format!("{name}: {e}"))),
        }

        self.table
            .delete(&self.queries_table, &marker_key(name))
            .await?;

        let stragglers = self.subscriptions.remove_all(name).await?;
        if stragglers > 0 {
            warn!("Removed {stragglers} subscriptions of {name} written during its delete");
        }

        info!("Deleted query {name}");
        Ok(DeleteOutcome::Deleted {
            subscribers: subscribers + stragglers,
        })
    }

    /// Names of every stored query, sorted
    pub async fn names(&self) -> QueryResult<Vec<String>> {
        let keys = self
            .blobs
            .list(QUERY_PREFIX)
            .await
            .map_err(|e| QueryError::Store(format!("listing queries: {e}")))?;

        Ok(keys
            .iter()
            .filter_map(|key| {
                key.strip_prefix(QUERY_PREFIX)?
                    .strip_prefix('/')?
                    .strip_suffix(QUERY_SUFFIX)
            })
            .filter(|name| validate_name(name).is_ok())
            .map(String::from)
            .collect())
    }

    pub async fn load(&self, name: &str) -> QueryResult<QueryDefinition> {
        validate_name(name)?;
        let bytes = self
            .blobs
            .get(&blob_key(name))
            .await
            .map_err(|e| QueryError::Store(format!("{name}: {e}")))?;
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|e| QueryError::Store(format!("{name} is not valid UTF-8: {e}")))?;
        Ok(QueryDefinition {
            name: name.to_string(),
            text,
        })
    }
}
