use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use tracing::log::*;
use url::Url;

use std::time::Duration;

use crate::{QueryError, QueryResult};

/// How long a subscriber has to accept and answer a delivery
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers a JSON body to a subscriber webhook and returns the response status
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, target: &Url, body: Bytes) -> QueryResult<u16>;
}

/// [Notifier] POSTing to the subscriber's URL.
///
/// Every delivery is bounded by a timeout covering connect through the end of the response, so
/// a subscriber which never answers fails its own delivery instead of stalling the run.
#[derive(Clone, Debug)]
pub struct HttpNotifier {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for HttpNotifier {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl HttpNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn deliver(&self, target: &Url, body: Bytes) -> QueryResult<u16> {
        debug!("POSTing {} bytes to {target}", body.len());
        let response = self
            .client
            .post(target.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| QueryError::Notify(format!("{target}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::Notify(format!("{target} responded {status}")));
        }
        Ok(status.as_u16())
    }
}
