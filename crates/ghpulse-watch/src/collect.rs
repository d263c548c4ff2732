use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::log::*;

use crate::github::{RepoStat, StatsSource};
use crate::repo::RepoName;

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CollectFailure {
    pub repo: RepoName,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Collection {
    pub stats: Vec<RepoStat>,
    pub failures: Vec<CollectFailure>,
}

/// Collect statistics for every repository with at most `concurrency` requests in flight,
/// every failure is kept
pub async fn collect(
    source: &dyn StatsSource,
    repos: &[RepoName],
    concurrency: usize,
) -> Collection {
    let outcomes: Vec<_> = stream::iter(repos)
        .map(|repo| async move { (repo, source.stats(repo).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut collection = Collection::default();
    for (repo, outcome) in outcomes {
        match outcome {
            Ok(stat) => collection.stats.push(stat),
            Err(e) => {
                error!("Failed to collect statistics for {repo}: {e}");
                collection.failures.push(CollectFailure {
                    repo: repo.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    collection.stats.sort_by(|a, b| a.name.cmp(&b.name));
    collection.failures.sort_by(|a, b| a.repo.cmp(&b.repo));
    collection
}
