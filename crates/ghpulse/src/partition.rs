//!
//! Reports are stored as partitions keyed by the archive hour they were produced from
//!
//! The layout is `YYYY/MM/DD/HH/<uuid>-count.json`, so that a prefix listing of a year or a month
//! picks up every report within it.
//!
use bytes::Bytes;
use chrono::prelude::*;
use regex::Regex;
use serde::{Serialize, Serializer};
use tracing::log::*;
use uuid::Uuid;

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use crate::archive::ArchiveHour;
use crate::objects::BlobStore;
use crate::{ArchiveError, ArchiveResult};

/// Key of a single stored report
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PartitionKey {
    pub hour: ArchiveHour,
    pub id: Uuid,
}

fn partition_regex() -> &'static Regex {
    static PARTITION_REGEX: OnceLock<Regex> = OnceLock::new();
    PARTITION_REGEX.get_or_init(|| {
        Regex::new(
            r"^(?P<year>\d{4})/(?P<month>\d{2})/(?P<day>\d{2})/(?P<hour>\d{2})/(?P<id>[0-9a-fA-F-]{36})-count\.json$",
        )
        .expect("Failed to compile the partition regular expression")
    })
}

impl PartitionKey {
    /// A key for a brand new report of `hour`, every call produces a distinct key
    pub fn generate(hour: ArchiveHour) -> Self {
        Self {
            hour,
            id: Uuid::new_v4(),
        }
    }

    /// Parse a relative key, returning [None] for anything that isn't a partition
    pub fn parse(key: &str) -> Option<Self> {
        let captures = partition_regex().captures(key)?;
        let hour = ArchiveHour::new(
            captures["year"].parse().ok()?,
            captures["month"].parse().ok()?,
            captures["day"].parse().ok()?,
            captures["hour"].parse().ok()?,
        )
        .ok()?;
        let id = Uuid::parse_str(&captures["id"]).ok()?;
        Some(Self { hour, id })
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}/{:02}/{:02}/{:02}/{}-count.json",
            self.hour.year(),
            self.hour.month(),
            self.hour.day(),
            self.hour.hour(),
            self.id
        )
    }
}

impl Serialize for PartitionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The set of key prefixes a listing should cover
#[derive(Clone, Debug, PartialEq)]
pub struct ListWindow {
    prefixes: Vec<String>,
}

impl ListWindow {
    pub fn year(year: i32) -> Self {
        Self {
            prefixes: vec![format!("{year:04}")],
        }
    }

    pub fn month(year: i32, month: u32) -> Self {
        Self {
            prefixes: vec![format!("{year:04}/{month:02}")],
        }
    }

    /// The current calendar year plus the remaining months of the previous one, so that the
    /// window always spans roughly a year of reports
    pub fn trailing(now: DateTime<Utc>) -> Self {
        let mut prefixes = vec![format!("{:04}", now.year())];
        for month in (now.month() + 1)..=12 {
            prefixes.push(format!("{:04}/{month:02}", now.year() - 1));
        }
        Self { prefixes }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// True if `key` falls within one of the prefixes
    pub fn contains(&self, key: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            key.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Stores and retrieves reports by [PartitionKey]
#[derive(Clone, Debug)]
pub struct PartitionStore {
    blobs: BlobStore,
}

impl PartitionStore {
    pub fn new(blobs: BlobStore) -> Self {
        Self { blobs }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Write `report` as a new partition of `hour`, an existing report is never overwritten
    pub async fn put(&self, hour: ArchiveHour, report: Bytes) -> ArchiveResult<PartitionKey> {
        let key = PartitionKey::generate(hour);
        self.blobs
            .put(&key.to_string(), report)
            .await
            .map_err(|e| ArchiveError::StoreWrite(format!("{key}: {e}")))?;
        info!("Stored report partition {key}");
        Ok(key)
    }

    /// Every partition key inside `window`, sorted by hour, objects which don't look like
    /// partitions are ignored
    pub async fn list(&self, window: &ListWindow) -> ArchiveResult<Vec<PartitionKey>> {
        let mut keys = vec![];
        for prefix in window.prefixes() {
            let found = self
                .blobs
                .list(prefix)
                .await
                .map_err(|e| ArchiveError::StoreList(format!("{prefix}: {e}")))?;
            debug!("Found {} objects under {prefix}", found.len());

            keys.extend(
                found
                    .iter()
                    .filter(|key| window.contains(key))
                    .filter_map(|key| PartitionKey::parse(key)),
            );
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    pub async fn get(&self, key: &PartitionKey) -> ArchiveResult<Bytes> {
        self.blobs
            .get(&key.to_string())
            .await
            .map_err(|e| ArchiveError::StoreRead {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    pub async fn delete(&self, key: &PartitionKey) -> ArchiveResult<()> {
        self.blobs
            .delete(&key.to_string())
            .await
            .map_err(|e| ArchiveError::StoreDelete {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    /// Presigned URLs for `keys`.
    ///
    /// When the backing store cannot sign, the plain relative keys are returned instead so that
    /// callers always get one entry per key.
    pub async fn signed_urls(
        &self,
        keys: &[PartitionKey],
        expires_in: Duration,
    ) -> ArchiveResult<Vec<String>> {
        let mut paths = Vec::with_capacity(keys.len());
        for key in keys {
            let relative = key.to_string();
            let signed = self
                .blobs
                .signed_url(&relative, expires_in)
                .await
                .map_err(|e| ArchiveError::StoreRead {
                    key: relative.clone(),
                    reason: e.to_string(),
                })?;
            paths.push(signed.map(String::from).unwrap_or(relative));
        }
        Ok(paths)
    }
}
