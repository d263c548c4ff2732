//!
//! The archive module knows how to retrieve one hour of the GitHub Archive and turn it into a
//! [CountReport] of events per repository
//!
use async_trait::async_trait;
use bytes::Bytes;
use chrono::prelude::*;
use flate2::bufread::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use tracing::log::*;
use url::Url;

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fmt;
use std::io::{BufRead, BufReader, Cursor, Split};
use std::path::Path;
use std::time::Duration;

use crate::{ArchiveError, ArchiveResult};

/// Where the hourly archive files are published
pub const DEFAULT_ARCHIVE_URL: &str = "https://data.gharchive.org";

/// Upper bound on downloading one archive file, busy hours run to a few hundred megabytes
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One UTC hour of the archive.
///
/// Construction validates the date so that an [ArchiveHour] always names a real hour
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ArchiveHour {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
}

impl ArchiveHour {
    pub fn new(year: i32, month: u32, day: u32, hour: u32) -> ArchiveResult<Self> {
        // partition keys carry exactly four year digits
        if !(0..=9999).contains(&year) {
            return Err(ArchiveError::Validation(format!(
                "year {year} is out of range"
            )));
        }
        if hour > 23 {
            return Err(ArchiveError::Validation(format!(
                "hour {hour} is out of range"
            )));
        }
        if NaiveDate::from_ymd_opt(year, month, day).is_none() {
            return Err(ArchiveError::Validation(format!(
                "{year}-{month:02}-{day:02} is not a valid date"
            )));
        }
        Ok(Self {
            year,
            month,
            day,
            hour,
        })
    }

    /// The hour containing the given instant
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
            day: at.day(),
            hour: at.hour(),
        }
    }

    /// The hour `lag_hours` before `now`.
    ///
    /// The archive for an hour is only published once that hour is over, so scheduled runs read
    /// at least one hour behind.
    pub fn previous(now: DateTime<Utc>, lag_hours: u32) -> Self {
        Self::from_datetime(now - chrono::Duration::hours(lag_hours.into()))
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    /// Name of the archive file for this hour, the hour is deliberately not zero padded
    pub fn file_name(&self) -> String {
        format!(
            "{}-{:02}-{:02}-{}.json.gz",
            self.year, self.month, self.day, self.hour
        )
    }

    /// Full URL of this hour's archive underneath `base`
    pub fn url(&self, base: &Url) -> ArchiveResult<Url> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(&self.file_name())
            .map_err(|e| ArchiveError::Validation(format!("cannot build archive url: {e}")))
    }
}

impl fmt::Display for ArchiveHour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:02}-{:02}T{:02}",
            self.year, self.month, self.day, self.hour
        )
    }
}

/// A [Fetcher] retrieves the raw bytes of an archive file
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> ArchiveResult<Bytes>;
}

/// [Fetcher] which performs a plain HTTP GET bounded by a timeout, there are no retries
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> ArchiveResult<Bytes> {
        debug!("Fetching archive file {url}");
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ArchiveError::Fetch(format!("{url}: {e}")))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ArchiveError::Fetch(format!("{url}: {e}")))?;
        info!("read {} bytes for {url}", bytes.len());
        Ok(bytes)
    }
}

/// Single pass sequence of raw, still undecoded, lines from a decompressed archive
pub type ArchiveLines = Split<BufReader<MultiGzDecoder<Cursor<Bytes>>>>;

/// Wrap the gzip framed `payload` in a decoder.
///
/// The first block is decoded eagerly so that a payload which isn't gzip at all is reported
/// here rather than on the first line read. Concatenated gzip members are read as one stream.
pub fn decompress(payload: Bytes) -> ArchiveResult<ArchiveLines> {
    if !payload.starts_with(&GZIP_MAGIC) {
        return Err(ArchiveError::Decompress(
            "payload does not start with a gzip header".into(),
        ));
    }
    let mut reader =
        BufReader::with_capacity(128 * 1024, MultiGzDecoder::new(Cursor::new(payload)));
    reader
        .fill_buf()
        .map_err(|e| ArchiveError::Decompress(e.to_string()))?;
    Ok(reader.split(b'\n'))
}

/// The two fields of an archive event which matter for counting
#[derive(Debug, Deserialize)]
pub struct ArchiveRecord {
    #[serde(rename = "type")]
    pub event_type: String,
    pub repo: RecordRepo,
}

#[derive(Debug, Deserialize)]
pub struct RecordRepo {
    pub name: String,
}

/// Repository name to event type to number of occurrences
pub type CountReport = BTreeMap<String, BTreeMap<String, u64>>;

/// The result of scanning one archive
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Aggregation {
    pub report: CountReport,
    /// Non-blank lines seen
    pub lines: usize,
    /// Lines which could not be decoded into an [ArchiveRecord] and were left out of the report
    pub skipped: usize,
}

impl Aggregation {
    pub fn count(&mut self, record: ArchiveRecord) {
        let counts = self.report.entry(record.repo.name).or_default();
        *counts.entry(record.event_type).or_insert(0) += 1;
    }

    /// Count a single raw line, malformed lines are skipped rather than failing the run
    pub fn count_line(&mut self, line: &[u8]) {
        let line = line.trim_ascii();
        if line.is_empty() {
            return;
        }
        self.lines += 1;

        match serde_json::from_slice::<ArchiveRecord>(line) {
            Ok(record) => self.count(record),
            Err(e) => {
                self.skipped += 1;
                debug!("Skipping undecodable archive line {}: {e}", self.lines);
            }
        }
    }

    /// Number of distinct repositories in the report
    pub fn repositories(&self) -> usize {
        self.report.len()
    }

    /// Serialize only the report, the line accounting is not part of the stored document
    pub fn to_json(&self) -> ArchiveResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(&self.report)?))
    }
}

/// Consume the `lines` of an archive and count every `(repo.name, type)` pair.
///
/// A read error from the underlying decoder is fatal for the whole run.
pub fn aggregate<I>(lines: I) -> ArchiveResult<Aggregation>
where
    I: IntoIterator<Item = std::io::Result<Vec<u8>>>,
{
    let mut aggregation = Aggregation::default();

    for line in lines {
        let line = line.map_err(|e| ArchiveError::Decompress(e.to_string()))?;
        aggregation.count_line(&line);

        if aggregation.lines > 0 && aggregation.lines % 100_000 == 0 {
            trace!("Counted {} lines so far", aggregation.lines);
        }
    }

    if aggregation.skipped > 0 {
        warn!(
            "Skipped {} of {} archive lines which could not be decoded",
            aggregation.skipped, aggregation.lines
        );
    }
    debug!(
        "Aggregated {} lines across {} repositories",
        aggregation.lines,
        aggregation.repositories()
    );
    Ok(aggregation)
}

/// Aggregate an archive file from the local filesystem, `.gz` files are decompressed
pub fn aggregate_file(path: &Path) -> ArchiveResult<Aggregation> {
    let bytes = std::fs::read(path)
        .map_err(|e| ArchiveError::Fetch(format!("{}: {e}", path.display())))?;

    if path.extension() == Some(OsStr::new("gz")) {
        aggregate(decompress(Bytes::from(bytes))?)
    } else {
        aggregate(Cursor::new(bytes).split(b'\n'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::gzipped;

    const WATCH: &str = r#"{"type":"WatchEvent","repo":{"name":"a/b"}}"#;
    const FORK: &str = r#"{"type":"ForkEvent","repo":{"name":"a/b"}}"#;

    #[tokio::test]
    async fn test_fetch_from_silent_host_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = vec![];
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let url = Url::parse(&format!("http://{addr}/2019-01-01-5.json.gz")).unwrap();
        let fetcher = HttpFetcher::default().with_timeout(Duration::from_millis(200));

        let outcome = tokio::time::timeout(Duration::from_secs(5), fetcher.fetch(&url))
            .await
            .expect("the fetch should give up on its own");
        assert!(matches!(outcome, Err(ArchiveError::Fetch(_))));
    }

    #[test]
    fn test_archive_hour_validation() {
        assert!(ArchiveHour::new(2024, 2, 29, 0).is_ok());
        assert!(ArchiveHour::new(2023, 2, 29, 0).is_err());
        assert!(ArchiveHour::new(2024, 13, 1, 0).is_err());
        assert!(ArchiveHour::new(2024, 1, 1, 24).is_err());
        assert!(ArchiveHour::new(9999, 12, 31, 23).is_ok());
        assert!(ArchiveHour::new(10000, 1, 1, 0).is_err());
        assert!(ArchiveHour::new(-1, 1, 1, 0).is_err());
    }

    #[test]
    fn test_archive_url() {
        let base = Url::parse(DEFAULT_ARCHIVE_URL).unwrap();
        let hour = ArchiveHour::new(2019, 1, 1, 5).unwrap();
        assert_eq!(
            "https://data.gharchive.org/2019-01-01-5.json.gz",
            hour.url(&base).unwrap().as_str()
        );

        let nested = Url::parse("http://localhost:8080/mirror").unwrap();
        assert_eq!(
            "http://localhost:8080/mirror/2019-01-01-5.json.gz",
            hour.url(&nested).unwrap().as_str()
        );
    }

    #[test]
    fn test_previous_hour_crosses_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 30, 0).unwrap();
        let previous = ArchiveHour::previous(now, 1);
        assert_eq!(ArchiveHour::new(2024, 2, 29, 23).unwrap(), previous);
    }

    #[test]
    fn test_end_to_end_counts() {
        let payload = gzipped(&[WATCH, WATCH, FORK, WATCH]);
        let aggregation = aggregate(decompress(payload.into()).unwrap()).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&aggregation.to_json().unwrap())
            .expect("Failed to read back the report");
        assert_eq!(
            serde_json::json!({"a/b": {"WatchEvent": 3, "ForkEvent": 1}}),
            json
        );
        assert_eq!(4, aggregation.lines);
        assert_eq!(0, aggregation.skipped);
    }

    #[test]
    fn test_counts_match_line_pairs() {
        let lines = [
            r#"{"type":"PushEvent","repo":{"name":"x/one"},"actor":{"login":"me"}}"#,
            r#"{"type":"PushEvent","repo":{"name":"x/two"}}"#,
            r#"{"type":"IssuesEvent","repo":{"name":"x/one"}}"#,
            r#"{"type":"PushEvent","repo":{"name":"x/one"}}"#,
        ];
        let aggregation = aggregate(decompress(gzipped(&lines).into()).unwrap()).unwrap();
        assert_eq!(2, aggregation.repositories());
        assert_eq!(2, aggregation.report["x/one"]["PushEvent"]);
        assert_eq!(1, aggregation.report["x/one"]["IssuesEvent"]);
        assert_eq!(1, aggregation.report["x/two"]["PushEvent"]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let lines = [
            WATCH,
            "this is not json",
            r#"{"type":"WatchEvent"}"#,
            r#"{"type":7,"repo":{"name":"a/b"}}"#,
            "",
            FORK,
        ];
        let aggregation = aggregate(decompress(gzipped(&lines).into()).unwrap()).unwrap();
        assert_eq!(5, aggregation.lines, "blank lines should not be counted");
        assert_eq!(3, aggregation.skipped);
        assert_eq!(1, aggregation.repositories());
        assert!(
            !aggregation.report.contains_key(""),
            "malformed lines must not land under an empty key"
        );
    }

    #[test]
    fn test_decompress_rejects_plain_text() {
        let result = decompress(Bytes::from_static(b"{\"type\":\"WatchEvent\"}"));
        assert!(matches!(result, Err(ArchiveError::Decompress(_))));
    }

    #[test]
    fn test_decompress_rejects_corrupt_header() {
        let mut payload = gzipped(&[WATCH]);
        // Corrupt the compression method byte
        payload[2] = 0x00;
        let result = decompress(payload.into());
        assert!(matches!(result, Err(ArchiveError::Decompress(_))));
    }

    #[test]
    fn test_concatenated_members() {
        let mut payload = gzipped(&[WATCH]);
        payload.extend(gzipped(&[FORK]));
        let aggregation = aggregate(decompress(payload.into()).unwrap()).unwrap();
        assert_eq!(2, aggregation.lines);
        assert_eq!(1, aggregation.report["a/b"]["ForkEvent"]);
    }

    #[test]
    fn test_aggregate_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../tests/data/archive-sample.json");
        let aggregation = aggregate_file(&path).expect("Failed to aggregate the sample");
        assert_eq!(10, aggregation.lines);
        assert_eq!(1, aggregation.skipped);
        assert_eq!(3, aggregation.report["octo/cat"]["WatchEvent"]);
        assert_eq!(1, aggregation.report["octo/cat"]["ForkEvent"]);
        assert_eq!(2, aggregation.report["rust-lang/rust"]["PushEvent"]);
    }
}
