//!
//! The runner executes every stored query and posts its rows to each subscriber.
//!
//! Failures are isolated: a query which cannot be loaded or executed is recorded and the runner
//! moves on to the next one, and every subscriber delivery is attempted independently.
//!
use bytes::Bytes;
use serde::Serialize;
use tracing::log::*;
use url::Url;

use std::sync::Arc;

use crate::engine::{QueryEngine, Row};
use crate::notify::Notifier;
use crate::queries::QueryBook;
use crate::QueryResult;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Delivery {
    pub target: Url,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QueryReport {
    pub name: String,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub deliveries: Vec<Delivery>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub queries: Vec<QueryReport>,
}

impl RunReport {
    /// Failed queries plus failed deliveries
    pub fn failures(&self) -> usize {
        self.queries
            .iter()
            .map(|q| {
                usize::from(q.error.is_some())
                    + q.deliveries.iter().filter(|d| !d.is_success()).count()
            })
            .sum()
    }
}

#[derive(Clone)]
pub struct Runner {
    book: QueryBook,
    engine: Arc<dyn QueryEngine>,
    notifier: Arc<dyn Notifier>,
}

impl Runner {
    pub fn new(book: QueryBook, engine: Arc<dyn QueryEngine>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            book,
            engine,
            notifier,
        }
    }

    /// Run every stored query, only failing to list the queries ends the run early
    pub async fn run(&self) -> QueryResult<RunReport> {
        let names = self.book.names().await?;
        info!("Running {} stored queries", names.len());

        let mut report = RunReport::default();
        for name in names {
            report.queries.push(self.run_query(&name).await);
        }

        let failures = report.failures();
        if failures > 0 {
            warn!("Query run finished with {failures} failures");
        }
        Ok(report)
    }

    async fn run_query(&self, name: &str) -> QueryReport {
        let mut report = QueryReport {
            name: name.to_string(),
            ..Default::default()
        };

        let (rows, targets) = match self.prepare(name).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Failed to run query {name}: {e}");
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.rows = rows.len();

        let body = match serde_json::to_vec(&rows) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                error!("Failed to serialize the rows of {name}: {e}");
                report.error = Some(e.to_string());
                return report;
            }
        };

        for target in targets {
            let delivery = match self.notifier.deliver(&target, body.clone()).await {
                Ok(status) => Delivery {
                    target,
                    status: Some(status),
                    error: None,
                },
                Err(e) => {
                    error!("Failed to deliver {name} results: {e}");
                    Delivery {
                        target,
                        status: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            report.deliveries.push(delivery);
        }
        report
    }

    /// Load, execute, and look up the subscribers of a single query
    async fn prepare(&self, name: &str) -> QueryResult<(Vec<Row>, Vec<Url>)> {
        let definition = self.book.load(name).await?;
        let rows = self.engine.execute(&definition.text).await?;
        debug!("Query {name} returned {} rows", rows.len());

        let targets = self
            .book
            .subscriptions()
            .for_query(name)
            .await?
            .into_iter()
            .map(|s| s.subscriber_target)
            .collect();
        Ok((rows, targets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::tests::silent_webhook;
    use crate::notify::HttpNotifier;
    use crate::subscriptions::SubscriptionRequest;
    use crate::table::MemoryTable;
    use crate::QueryError;
    use async_trait::async_trait;
    use ghpulse::objects::BlobStore;
    use serde_json::json;

    use std::sync::Mutex;

    /// Answers `select 1` and fails everything else
    struct FakeEngine;

    #[async_trait]
    impl QueryEngine for FakeEngine {
        async fn execute(&self, sql: &str) -> QueryResult<Vec<Row>> {
            match sql {
                "select 1" => Ok(vec![vec![json!("a/b"), json!("3")], vec![json!("c/d"), json!(null)]]),
                other => Err(QueryError::Execution(format!("syntax error in `{other}`"))),
            }
        }
    }

    /// Records every delivery and rejects hosts named `down.test`
    #[derive(Default)]
    struct RecordingNotifier {
        delivered: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn deliver(&self, target: &Url, body: Bytes) -> QueryResult<u16> {
            if target.host_str() == Some("down.test") {
                return Err(QueryError::Notify(format!("{target} responded 502")));
            }
            let body = serde_json::from_slice(&body).expect("Failed to parse delivered body");
            self.delivered
                .lock()
                .expect("Failed to lock")
                .push((target.to_string(), body));
            Ok(200)
        }
    }

    async fn subscribe(book: &QueryBook, query: &str, target: &str) {
        book.subscriptions()
            .subscribe(&SubscriptionRequest {
                query_name: query.into(),
                subscriber_target: target.into(),
                subscriber_name: None,
                subscriber_email: None,
            })
            .await
            .expect("Failed to subscribe");
    }

    #[tokio::test]
    async fn test_run_isolates_failures() {
        let book = QueryBook::new(
            BlobStore::in_memory(),
            Arc::new(MemoryTable::new()),
            "queries",
            "subscribers",
        );
        book.create("broken", "select nonsense").await.unwrap();
        book.create("working", "select 1").await.unwrap();
        subscribe(&book, "broken", "https://one.test/hook").await;
        subscribe(&book, "working", "https://down.test/hook").await;
        subscribe(&book, "working", "https://one.test/hook").await;

        let notifier = Arc::new(RecordingNotifier::default());
        let runner = Runner::new(book, Arc::new(FakeEngine), notifier.clone());
        let report = runner.run().await.expect("Listing should not fail");

        assert_eq!(2, report.queries.len());
        assert_eq!(2, report.failures());

        let broken = &report.queries[0];
        assert_eq!("broken", broken.name);
        assert!(broken.error.as_ref().unwrap().contains("syntax error"));
        assert!(broken.deliveries.is_empty());

        let working = &report.queries[1];
        assert_eq!(2, working.rows);
        assert_eq!(2, working.deliveries.len());
        assert_eq!(
            1,
            working.deliveries.iter().filter(|d| d.is_success()).count(),
            "the healthy subscriber still gets its delivery"
        );

        let delivered = notifier.delivered.lock().unwrap();
        assert_eq!(
            vec![(
                "https://one.test/hook".to_string(),
                json!([["a/b", "3"], ["c/d", null]])
            )],
            *delivered
        );
    }

    #[tokio::test]
    async fn test_run_without_queries() {
        let book = QueryBook::new(
            BlobStore::in_memory(),
            Arc::new(MemoryTable::new()),
            "queries",
            "subscribers",
        );
        let runner = Runner::new(
            book,
            Arc::new(FakeEngine),
            Arc::new(RecordingNotifier::default()),
        );
        let report = runner.run().await.unwrap();
        assert!(report.queries.is_empty());
        assert_eq!(0, report.failures());
    }

    #[tokio::test]
    async fn test_unresponsive_subscribers_do_not_stall_the_run() {
        let book = QueryBook::new(
            BlobStore::in_memory(),
            Arc::new(MemoryTable::new()),
            "queries",
            "subscribers",
        );
        book.create("first", "select 1").await.unwrap();
        book.create("second", "select 1").await.unwrap();
        let first = silent_webhook().await;
        let second = silent_webhook().await;
        subscribe(&book, "first", first.as_str()).await;
        subscribe(&book, "first", second.as_str()).await;
        subscribe(&book, "second", second.as_str()).await;

        let notifier = HttpNotifier::default().with_timeout(std::time::Duration::from_millis(200));
        let runner = Runner::new(book, Arc::new(FakeEngine), Arc::new(notifier));
        let report = tokio::time::timeout(std::time::Duration::from_secs(10), runner.run())
            .await
            .expect("the run should finish despite silent subscribers")
            .unwrap();

        assert_eq!(2, report.queries.len());
        assert_eq!(3, report.failures());
        for query in report.queries.iter() {
            assert!(query.error.is_none());
            assert!(query.deliveries.iter().all(|d| d.status.is_none() && d.error.is_some()));
        }
        assert_eq!(2, report.queries[0].deliveries.len());
    }
}
