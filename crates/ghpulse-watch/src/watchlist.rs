//!
//! The set of repositories whose statistics are collected
//!
use chrono::prelude::*;
use ghpulse_queries::table::{Item, Key, Table};
use serde_json::Value;
use tracing::log::*;

use std::sync::Arc;

use crate::repo::RepoName;
use crate::WatchResult;

const LIST_ATTR: &str = "list";
const LIST_NAME: &str = "watched";
const REPO_ATTR: &str = "repo";

#[derive(Clone)]
pub struct Watchlist {
    table: Arc<dyn Table>,
    table_name: String,
}

impl Watchlist {
    pub fn new(table: Arc<dyn Table>, table_name: impl Into<String>) -> Self {
        Self {
            table,
            table_name: table_name.into(),
        }
    }

    fn key(repo: &RepoName) -> Key {
        Key::partition(LIST_ATTR, LIST_NAME).with_sort(REPO_ATTR, repo.to_string())
    }

    pub async fn add(&self, repo: &RepoName) -> WatchResult<()> {
        let mut item = Item::new();
        item.insert(
            "added_at".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        self.table.put(&self.table_name, &Self::key(repo), item).await?;
        info!("Watching {repo}");
        Ok(())
    }

    pub async fn remove(&self, repo: &RepoName) -> WatchResult<()> {
        self.table.delete(&self.table_name, &Self::key(repo)).await?;
        info!("No longer watching {repo}");
        Ok(())
    }

    /// Every watched repository, entries which are no longer valid names are skipped
    pub async fn repos(&self) -> WatchResult<Vec<RepoName>> {
        let items = self
            .table
            .list(&self.table_name, LIST_ATTR, LIST_NAME)
            .await?;

        let mut repos: Vec<RepoName> = items
            .iter()
            .filter_map(|item| match item.get(REPO_ATTR).and_then(Value::as_str) {
                Some(name) => match name.parse() {
                    Ok(repo) => Some(repo),
                    Err(e) => {
                        warn!("Ignoring watched entry: {e}");
                        None
                    }
                },
                None => None,
            })
            .collect();
        repos.sort();
        Ok(repos)
    }
}
