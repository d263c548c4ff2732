//!
//! Configuration for every lambda is read from the environment
//!
use ghpulse::archive::DEFAULT_ARCHIVE_URL;
use ghpulse::objects::BlobStore;
use ghpulse::{ArchiveError, ArchiveResult};
use url::Url;

use std::str::FromStr;
use std::time::Duration;

/// Read `name` from the environment, falling back to `default` when it is unset
pub fn env_or<T: FromStr>(name: &str, default: T) -> ArchiveResult<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|e| ArchiveError::Config(format!("{name}={value}: {e}"))),
        _ => Ok(default),
    }
}

/// Read a required variable from the environment
pub fn env_required(name: &str) -> ArchiveResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ArchiveError::Config(format!("`{name}` must be set in the environment")))
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Where reports, queries and snapshots are stored
#[derive(Clone, Debug, PartialEq)]
pub struct StoreConfig {
    pub url: Url,
}

impl StoreConfig {
    pub fn from_env() -> ArchiveResult<Self> {
        let raw = env_required("GHPULSE_STORE_URL")?;
        let url = Url::parse(&raw)
            .map_err(|e| ArchiveError::Config(format!("GHPULSE_STORE_URL={raw}: {e}")))?;
        Ok(Self { url })
    }

    pub fn blobs(&self) -> ArchiveResult<BlobStore> {
        BlobStore::from_url(&self.url)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArchiveConfig {
    pub base: Url,
    /// How many hours behind the trigger time scheduled ingestions read
    pub lag_hours: u32,
    pub backfill_concurrency: usize,
    /// Lifetime of presigned report URLs
    pub signed_url_expiry: Duration,
}

impl ArchiveConfig {
    pub fn from_env() -> ArchiveResult<Self> {
        let base = env_or("GHPULSE_ARCHIVE_URL", DEFAULT_ARCHIVE_URL.to_string())?;
        let base = Url::parse(&base)
            .map_err(|e| ArchiveError::Config(format!("GHPULSE_ARCHIVE_URL={base}: {e}")))?;
        Ok(Self {
            base,
            lag_hours: env_or("GHPULSE_ARCHIVE_LAG_HOURS", 1)?,
            backfill_concurrency: env_or(
                "GHPULSE_BACKFILL_CONCURRENCY",
                ghpulse::backfill::DEFAULT_CONCURRENCY,
            )?,
            signed_url_expiry: Duration::from_secs(env_or("GHPULSE_SIGNED_URL_SECS", 900)?),
        })
    }
}

/// DynamoDB table names
#[derive(Clone, Debug, PartialEq)]
pub struct TableConfig {
    pub queries: String,
    pub subscribers: String,
    pub repos: String,
}

impl TableConfig {
    pub fn from_env() -> ArchiveResult<Self> {
        Ok(Self {
            queries: env_or("GHPULSE_QUERIES_TABLE", "queries".to_string())?,
            subscribers: env_or("GHPULSE_SUBSCRIBERS_TABLE", "subscribers".to_string())?,
            repos: env_or("GHPULSE_REPOS_TABLE", "repos".to_string())?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AthenaConfig {
    pub workgroup: String,
    pub database: Option<String>,
    pub output_location: Option<String>,
}

impl AthenaConfig {
    pub fn from_env() -> ArchiveResult<Self> {
        Ok(Self {
            workgroup: env_or("ATHENA_WORKGROUP", "primary".to_string())?,
            database: env_optional("ATHENA_DATABASE"),
            output_location: env_optional("ATHENA_OUTPUT_LOCATION"),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WatchConfig {
    pub api_base: Url,
    pub token: Option<String>,
    pub concurrency: usize,
}

impl WatchConfig {
    pub fn from_env() -> ArchiveResult<Self> {
        let raw = env_or("GITHUB_API_URL", "https://api.github.com".to_string())?;
        let api_base = Url::parse(&raw)
            .map_err(|e| ArchiveError::Config(format!("GITHUB_API_URL={raw}: {e}")))?;
        Ok(Self {
            api_base,
            token: env_optional("GITHUB_TOKEN"),
            concurrency: env_or("GHPULSE_WATCH_CONCURRENCY", 4)?,
        })
    }
}

/// Bounds on every outbound HTTP call
#[derive(Clone, Debug, PartialEq)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Per delivery to a subscriber webhook
    pub webhook_timeout: Duration,
    /// Per archive file download
    pub fetch_timeout: Duration,
    /// Per GitHub API request
    pub github_timeout: Duration,
}

impl HttpConfig {
    pub fn from_env() -> ArchiveResult<Self> {
        let secs = |name, default| env_or(name, default).map(Duration::from_secs);
        Ok(Self {
            connect_timeout: secs("GHPULSE_CONNECT_TIMEOUT_SECS", 5)?,
            webhook_timeout: secs("GHPULSE_WEBHOOK_TIMEOUT_SECS", 10)?,
            fetch_timeout: secs(
                "GHPULSE_FETCH_TIMEOUT_SECS",
                ghpulse::archive::DEFAULT_FETCH_TIMEOUT.as_secs(),
            )?,
            github_timeout: secs("GHPULSE_GITHUB_TIMEOUT_SECS", 30)?,
        })
    }

    /// A client which gives up on connections that don't open within `connect_timeout`
    pub fn client(&self) -> ArchiveResult<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| ArchiveError::Config(format!("cannot build the HTTP client: {e}")))
    }
}
