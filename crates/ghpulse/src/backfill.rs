//!
//! Historic backfill ingests every hour of a range of days through a bounded pool of
//! concurrent ingestions
//!
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::log::*;

use crate::archive::ArchiveHour;
use crate::ingest::{IngestSummary, Ingestor};
use crate::{ArchiveError, ArchiveResult};

/// Default upper bound of ingestions in flight
pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BackfillRequest {
    pub year: i32,
    pub month: u32,
    #[serde(alias = "startDay")]
    pub start_day: u32,
    #[serde(alias = "endDay")]
    pub end_day: u32,
}

impl BackfillRequest {
    /// Every hour of every day from `start_day` through `end_day` inclusive
    pub fn hours(&self) -> ArchiveResult<Vec<ArchiveHour>> {
        if self.start_day > self.end_day {
            return Err(ArchiveError::Validation(format!(
                "start_day {} is after end_day {}",
                self.start_day, self.end_day
            )));
        }
        let mut hours = vec![];
        for day in self.start_day..=self.end_day {
            for hour in 0..24 {
                hours.push(ArchiveHour::new(self.year, self.month, day, hour)?);
            }
        }
        Ok(hours)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BackfillFailure {
    pub hour: ArchiveHour,
    pub error: String,
}

/// Every outcome of a backfill, nothing is dropped
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    pub succeeded: Vec<IngestSummary>,
    pub failed: Vec<BackfillFailure>,
}

impl BackfillReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ingest every hour of `request` with at most `concurrency` ingestions in flight.
///
/// Only an invalid request is returned as an error, failures of individual hours end up in the
/// [BackfillReport].
pub async fn backfill(
    ingestor: &Ingestor,
    request: &BackfillRequest,
    concurrency: usize,
) -> ArchiveResult<BackfillReport> {
    let hours = request.hours()?;
    let concurrency = concurrency.max(1);
    info!(
        "Backfilling {} hours of {}-{:02} with {concurrency} workers",
        hours.len(),
        request.year,
        request.month
    );

    let outcomes: Vec<(ArchiveHour, ArchiveResult<IngestSummary>)> = stream::iter(hours)
        .map(|hour| async move { (hour, ingestor.ingest(hour).await) })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut report = BackfillReport::default();
    for (hour, outcome) in outcomes {
        match outcome {
            Ok(summary) => report.succeeded.push(summary),
            Err(e) => {
                error!("Failed to backfill {hour}: {e}");
                report.failed.push(BackfillFailure {
                    hour,
                    error: e.to_string(),
                });
            }
        }
    }
    report.succeeded.sort_by_key(|s| s.hour);
    report.failed.sort_by_key(|f| f.hour);

    info!(
        "Backfill finished with {} succeeded and {} failed",
        report.succeeded.len(),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Fetcher;
    use crate::ingest::tests::StaticFetcher;
    use crate::objects::BlobStore;
    use crate::partition::PartitionStore;
    use crate::testing::gzipped;
    use async_trait::async_trait;
    use bytes::Bytes;
    use url::Url;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ingestor(fetcher: Arc<dyn Fetcher>) -> Ingestor {
        Ingestor::new(
            fetcher,
            PartitionStore::new(BlobStore::in_memory()),
            Url::parse("https://archive.test").unwrap(),
        )
    }

    /// Fails the even hours of every day
    struct FlakyFetcher {
        payload: Bytes,
    }

    #[async_trait]
    impl Fetcher for FlakyFetcher {
        async fn fetch(&self, url: &Url) -> ArchiveResult<Bytes> {
            let hour: u32 = url
                .path()
                .trim_end_matches(".json.gz")
                .rsplit('-')
                .next()
                .and_then(|h| h.parse().ok())
                .expect("Failed to read the hour back out of the url");
            if hour % 2 == 0 {
                Err(ArchiveError::Fetch(format!("{url}: 404 Not Found")))
            } else {
                Ok(self.payload.clone())
            }
        }
    }

    /// Tracks how many fetches are running at once
    struct SlowFetcher {
        payload: Bytes,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, _url: &Url) -> ArchiveResult<Bytes> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.payload.clone())
        }
    }

    #[test]
    fn test_request_aliases() {
        let request: BackfillRequest =
            serde_json::from_str(r#"{"year":2019,"month":1,"startDay":1,"endDay":2}"#).unwrap();
        assert_eq!(1, request.start_day);
        assert_eq!(2, request.end_day);

        let request: BackfillRequest =
            serde_json::from_str(r#"{"year":2019,"month":1,"start_day":3,"end_day":3}"#).unwrap();
        assert_eq!(24, request.hours().unwrap().len());
    }

    #[test]
    fn test_request_validation() {
        let reversed = BackfillRequest {
            year: 2019,
            month: 1,
            start_day: 5,
            end_day: 2,
        };
        assert!(matches!(reversed.hours(), Err(ArchiveError::Validation(_))));

        let past_month_end = BackfillRequest {
            year: 2019,
            month: 2,
            start_day: 27,
            end_day: 30,
        };
        assert!(matches!(
            past_month_end.hours(),
            Err(ArchiveError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_backfill_collects_every_failure() {
        let payload = gzipped(&[r#"{"type":"WatchEvent","repo":{"name":"a/b"}}"#]);
        let ingestor = ingestor(Arc::new(FlakyFetcher {
            payload: payload.into(),
        }));
        let request = BackfillRequest {
            year: 2019,
            month: 1,
            start_day: 1,
            end_day: 2,
        };

        let report = backfill(&ingestor, &request, 4).await.unwrap();
        assert!(!report.is_success());
        assert_eq!(24, report.succeeded.len());
        assert_eq!(24, report.failed.len(), "no failure may be dropped");
        assert!(report.failed.iter().all(|f| f.hour.hour() % 2 == 0));
        assert!(report.failed.windows(2).all(|w| w[0].hour < w[1].hour));
    }

    #[tokio::test]
    async fn test_backfill_is_bounded() {
        let fetcher = Arc::new(SlowFetcher {
            payload: gzipped(&[r#"{"type":"WatchEvent","repo":{"name":"a/b"}}"#]).into(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let ingestor = ingestor(fetcher.clone());
        let request = BackfillRequest {
            year: 2020,
            month: 6,
            start_day: 1,
            end_day: 1,
        };

        let report = backfill(&ingestor, &request, 3).await.unwrap();
        assert!(report.is_success());
        assert_eq!(24, report.succeeded.len());
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_runs() {
        let ingestor = ingestor(Arc::new(StaticFetcher::new(gzipped(&[]))));
        let request = BackfillRequest {
            year: 2020,
            month: 6,
            start_day: 1,
            end_day: 1,
        };
        let report = backfill(&ingestor, &request, 0).await.unwrap();
        assert_eq!(24, report.succeeded.len());
    }
}
