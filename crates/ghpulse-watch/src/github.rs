//!
//! Repository statistics from the GitHub REST API
//!
use async_trait::async_trait;
use chrono::prelude::*;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::log::*;
use url::Url;

use std::time::Duration;

use crate::repo::RepoName;
use crate::{WatchError, WatchResult};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Per request bound, a stalled API call fails that repository only
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const PER_PAGE: usize = 100;
/// Upper bound on pages read from any paginated endpoint
const MAX_PAGES: usize = 50;

/// A point in time view of a single repository
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RepoStat {
    pub name: RepoName,
    pub time: DateTime<Utc>,
    pub stars: u64,
    pub watchers: u64,
    pub forks: u64,
    /// Downloads summed over every asset of every release
    pub downloads: u64,
    /// Community profile health percentage
    pub health: u64,
    pub contributors: u64,
}

#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn stats(&self, repo: &RepoName) -> WatchResult<RepoStat>;
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    stargazers_count: u64,
    subscribers_count: u64,
    forks_count: u64,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    #[serde(default)]
    assets: Vec<AssetResponse>,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    download_count: u64,
}

#[derive(Debug, Deserialize)]
struct CommunityResponse {
    health_percentage: u64,
}

/// [StatsSource] backed by the GitHub REST API.
///
/// Unauthenticated clients work but are heavily rate limited.
#[derive(Clone, Debug)]
pub struct GitHubClient {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
    timeout: Duration,
}

impl GitHubClient {
    pub fn new(client: reqwest::Client, base: Url, token: Option<String>) -> Self {
        Self {
            client,
            base,
            token,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The API URL for `suffix` underneath the repository
    pub fn endpoint(&self, repo: &RepoName, suffix: &str) -> WatchResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| WatchError::Validation(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(["repos", repo.owner(), repo.name()])
            .extend(suffix.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> WatchResult<T> {
        trace!("GET {url}");
        let mut request = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .header(USER_AGENT, "ghpulse")
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WatchError::GitHub(format!("{url}: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| WatchError::GitHub(format!("{url}: {e}")))
    }

    /// Read every page of a list endpoint
    async fn get_all<T: DeserializeOwned>(&self, mut url: Url) -> WatchResult<Vec<T>> {
        let mut all = vec![];
        for page in 1..=MAX_PAGES {
            url.query_pairs_mut()
                .clear()
                .append_pair("per_page", &PER_PAGE.to_string())
                .append_pair("page", &page.to_string());
            let items: Vec<T> = self.get(url.clone()).await?;
            let last = items.len() < PER_PAGE;
            all.extend(items);
            if last {
                return Ok(all);
            }
        }
        warn!("Stopped reading {url} after {MAX_PAGES} pages");
        Ok(all)
    }
}

#[async_trait]
impl StatsSource for GitHubClient {
    async fn stats(&self, repo: &RepoName) -> WatchResult<RepoStat> {
        let summary: RepoResponse = self.get(self.endpoint(repo, "")?).await?;
        let releases: Vec<ReleaseResponse> =
            self.get_all(self.endpoint(repo, "releases")?).await?;
        let community: CommunityResponse =
            self.get(self.endpoint(repo, "community/profile")?).await?;
        let contributors: Vec<serde_json::Value> =
            self.get_all(self.endpoint(repo, "contributors")?).await?;

        let downloads = releases
            .iter()
            .flat_map(|r| r.assets.iter())
            .map(|a| a.download_count)
            .sum();

        debug!("Collected statistics for {repo}");
        Ok(RepoStat {
            name: repo.clone(),
            time: Utc::now(),
            stars: summary.stargazers_count,
            watchers: summary.subscribers_count,
            forks: summary.forks_count,
            downloads,
            health: community.health_percentage,
            contributors: contributors.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        let client = GitHubClient::new(
            reqwest::Client::new(),
            Url::parse(DEFAULT_API_URL).unwrap(),
            None,
        );
        let repo: RepoName = "octo/cat".parse().unwrap();
        assert_eq!(
            "https://api.github.com/repos/octo/cat",
            client.endpoint(&repo, "").unwrap().as_str()
        );
        assert_eq!(
            "https://api.github.com/repos/octo/cat/community/profile",
            client.endpoint(&repo, "community/profile").unwrap().as_str()
        );

        let enterprise = GitHubClient::new(
            reqwest::Client::new(),
            Url::parse("https://github.example.com/api/v3/").unwrap(),
            Some("token".into()),
        );
        assert_eq!(
            "https://github.example.com/api/v3/repos/octo/cat/releases",
            enterprise.endpoint(&repo, "releases").unwrap().as_str()
        );
    }

    #[tokio::test]
    async fn test_stalled_api_fails_the_repository() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = vec![];
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let client = GitHubClient::new(
            reqwest::Client::new(),
            Url::parse(&format!("http://{addr}/")).unwrap(),
            None,
        )
        .with_timeout(Duration::from_millis(200));
        let repo: RepoName = "octo/cat".parse().unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), client.stats(&repo))
            .await
            .expect("the request should give up on its own");
        assert!(matches!(outcome, Err(WatchError::GitHub(_))));
    }

    #[test]
    fn test_release_downloads_parse() {
        let releases: Vec<ReleaseResponse> = serde_json::from_str(
            r#"[{"tag_name":"v1","assets":[{"download_count":5},{"download_count":7}]},{"tag_name":"v0"}]"#,
        )
        .unwrap();
        let total: u64 = releases
            .iter()
            .flat_map(|r| r.assets.iter())
            .map(|a| a.download_count)
            .sum();
        assert_eq!(12, total);
    }
}
