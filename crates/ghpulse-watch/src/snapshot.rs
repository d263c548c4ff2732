//!
//! Collected statistics are stored as one JSON document per collection run
//!
use bytes::Bytes;
use chrono::prelude::*;
use ghpulse::objects::BlobStore;
use tracing::log::*;

use crate::github::RepoStat;
use crate::{WatchError, WatchResult};

const SNAPSHOT_PREFIX: &str = "stats";

#[derive(Clone, Debug)]
pub struct SnapshotStore {
    blobs: BlobStore,
}

impl SnapshotStore {
    pub fn new(blobs: BlobStore) -> Self {
        Self { blobs }
    }

    /// Key of the snapshot taken at `at`, keys sort chronologically
    pub fn key_for(at: DateTime<Utc>) -> String {
        format!("{SNAPSHOT_PREFIX}/{}.json", at.format("%Y-%m-%dT%H-%M-%SZ"))
    }

    pub async fn save(&self, stats: &[RepoStat], at: DateTime<Utc>) -> WatchResult<String> {
        let key = Self::key_for(at);
        let body = Bytes::from(serde_json::to_vec(stats)?);
        self.blobs
            .put(&key, body)
            .await
            .map_err(|e| WatchError::Store(format!("{key}: {e}")))?;
        info!("Saved {} repository statistics to {key}", stats.len());
        Ok(key)
    }

    /// Keys of every stored snapshot, oldest first
    pub async fn list(&self) -> WatchResult<Vec<String>> {
        self.blobs
            .list(SNAPSHOT_PREFIX)
            .await
            .map_err(|e| WatchError::Store(format!("listing snapshots: {e}")))
    }

    pub async fn load(&self, key: &str) -> WatchResult<Vec<RepoStat>> {
        let bytes = self
            .blobs
            .get(key)
            .await
            .map_err(|e| WatchError::Store(format!("{key}: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let store = SnapshotStore::new(BlobStore::in_memory());
        let at = Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).unwrap();
        let stat = RepoStat {
            name: "octo/cat".parse().unwrap(),
            time: at,
            stars: 10,
            watchers: 2,
            forks: 1,
            downloads: 0,
            health: 87,
            contributors: 4,
        };

        let key = store.save(&[stat.clone()], at).await.unwrap();
        assert_eq!("stats/2026-10-14T09-30-00Z.json", key);

        let later = store
            .save(&[], at + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(vec![key.clone(), later], store.list().await.unwrap());
        assert_eq!(vec![stat], store.load(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_missing() {
        let store = SnapshotStore::new(BlobStore::in_memory());
        assert!(matches!(
            store.load("stats/nope.json").await,
            Err(WatchError::Store(_))
        ));
    }
}
